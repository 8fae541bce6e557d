use std::collections::BTreeMap;
use std::path::Path;

use md5::{Digest, Md5};
use rand::RngCore;
use sha2::Sha256;
use ssh_key::certificate::{Builder, CertType};
use ssh_key::{PrivateKey, PublicKey};

use crate::store::{Store, StoreError};

#[derive(thiserror::Error, Debug)]
pub enum SshError {
	#[error("failed to read CA key: {0}")]
	ReadKey(#[from] std::io::Error),

	#[error("failed to parse pubkey")]
	ParseKey(#[source] ssh_key::Error),

	#[error("CA key is unusable: {0}")]
	BadCaKey(String),

	#[error("failed to sign pubkey: {0}")]
	Sign(#[source] ssh_key::Error),

	#[error(transparent)]
	Store(#[from] StoreError),
}

/// The SSH CA identity: a signer loaded once from disk plus its fingerprints.
///
/// The SHA-256 wire-format fingerprint keys the serial counter in the store;
/// the MD5 form goes into key-id strings so target-host logs can be matched
/// against `ssh-keygen -l -E md5` output.
pub struct SshAuthority {
	signer: PrivateKey,
	fingerprint: Vec<u8>,
	fingerprint_md5: String,
}

impl SshAuthority {
	pub fn load(path: &Path) -> Result<Self, SshError> {
		let signer = PrivateKey::read_openssh_file(path).map_err(|e| match e {
			ssh_key::Error::Io(kind) => SshError::ReadKey(kind.into()),
			other => SshError::BadCaKey(other.to_string()),
		})?;
		if signer.is_encrypted() {
			return Err(SshError::BadCaKey("CA key is passphrase-protected".to_string()));
		}
		let public = PublicKey::from(&signer);
		let wire = public
			.to_bytes()
			.map_err(|e| SshError::BadCaKey(e.to_string()))?;
		Ok(SshAuthority {
			signer,
			fingerprint: Sha256::digest(&wire).to_vec(),
			fingerprint_md5: md5_hex(&wire),
		})
	}

	/// SHA-256 of the wire-format public key; the CA's stable identifier.
	pub fn fingerprint(&self) -> &[u8] {
		&self.fingerprint
	}

	pub fn fingerprint_md5(&self) -> &str {
		&self.fingerprint_md5
	}

	pub fn public_key(&self) -> PublicKey {
		PublicKey::from(&self.signer)
	}
}

/// Policy-controlled fields of a certificate to be minted.
#[derive(Debug, Clone)]
pub struct CertOptions {
	pub key_id: String,
	pub principals: Vec<String>,
	pub source_address: String,
	/// Included as the `force-command` critical option iff non-empty.
	pub force_command: String,
	pub extensions: BTreeMap<String, String>,
	pub valid_after: u64,
	pub valid_before: u64,
}

pub fn parse_pubkey(raw: &str) -> Result<PublicKey, SshError> {
	PublicKey::from_openssh(raw).map_err(SshError::ParseKey)
}

/// Legacy MD5 fingerprint, colon-separated hex, matching
/// `ssh-keygen -l -E md5` so operators can grep server logs for a key.
pub fn fingerprint_md5(key: &PublicKey) -> Result<String, SshError> {
	let wire = key.to_bytes().map_err(SshError::ParseKey)?;
	Ok(md5_hex(&wire))
}

fn md5_hex(wire: &[u8]) -> String {
	let digest = Md5::digest(wire);
	digest
		.iter()
		.map(|b| format!("{b:02x}"))
		.collect::<Vec<_>>()
		.join(":")
}

/// Mint a user certificate: parse the submitted key, draw the next serial for
/// this CA, assemble critical options and extensions, sign, and render the
/// authorized-key line.
pub fn sign(
	authority: &SshAuthority,
	store: &Store,
	raw_key: &str,
	opts: &CertOptions,
) -> Result<SignedCert, SshError> {
	let pubkey = parse_pubkey(raw_key)?;
	let serial = store.next_ssh_serial(authority.fingerprint())?;

	let mut nonce = vec![0u8; 32];
	rand::rng().fill_bytes(&mut nonce);

	let mut builder = Builder::new(
		nonce,
		pubkey.key_data().clone(),
		opts.valid_after,
		opts.valid_before,
	)
	.map_err(SshError::Sign)?;
	builder.serial(serial).map_err(SshError::Sign)?;
	builder.cert_type(CertType::User).map_err(SshError::Sign)?;
	builder.key_id(opts.key_id.as_str()).map_err(SshError::Sign)?;
	for principal in &opts.principals {
		builder
			.valid_principal(principal.as_str())
			.map_err(SshError::Sign)?;
	}
	builder
		.critical_option("source-address", opts.source_address.as_str())
		.map_err(SshError::Sign)?;
	if !opts.force_command.is_empty() {
		builder
			.critical_option("force-command", opts.force_command.as_str())
			.map_err(SshError::Sign)?;
	}
	for (name, data) in &opts.extensions {
		builder
			.extension(name.as_str(), data.as_str())
			.map_err(SshError::Sign)?;
	}

	let cert = builder.sign(&authority.signer).map_err(SshError::Sign)?;
	let mut line = cert.to_openssh().map_err(SshError::Sign)?;
	line.push('\n');
	Ok(SignedCert {
		authorized_key: line,
		serial,
	})
}

#[derive(Debug)]
pub struct SignedCert {
	/// Authorized-key formatted certificate, newline terminated.
	pub authorized_key: String,
	pub serial: u64,
}

#[cfg(test)]
#[path = "ssh_tests.rs"]
mod tests;
