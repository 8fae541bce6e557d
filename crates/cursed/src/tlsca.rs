use std::path::Path;

use rcgen::{Issuer, KeyPair};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::config::Config;
use crate::store::{Store, StoreError};
use crate::x509::{self, CertOpts, X509Error};

#[derive(thiserror::Error, Debug)]
pub enum BootstrapError {
	#[error("tls material i/o: {0}")]
	Io(#[from] std::io::Error),

	#[error("inconsistent tls material: {0}")]
	HalfState(String),

	#[error("invalid tls material: {0}")]
	Pem(String),

	#[error(transparent)]
	X509(#[from] X509Error),

	#[error(transparent)]
	Store(#[from] StoreError),
}

/// The daemon's X.509 authority after bootstrap: signing issuer, serving
/// identity (the CA cert/key double as the TLS serving pair) and the trust
/// bundle used to verify client certificates.
#[derive(Debug)]
pub struct TlsAuthority {
	ca_cert_pem: String,
	ca_cert_der: CertificateDer<'static>,
	trust_der: Vec<CertificateDer<'static>>,
	serving_key_pkcs8: Vec<u8>,
	issuer: Issuer<'static, KeyPair>,
}

impl TlsAuthority {
	pub fn issuer(&self) -> &Issuer<'static, KeyPair> {
		&self.issuer
	}

	pub fn ca_cert_pem(&self) -> &str {
		&self.ca_cert_pem
	}

	pub fn serving_cert(&self) -> CertificateDer<'static> {
		self.ca_cert_der.clone()
	}

	pub fn serving_key(&self) -> PrivateKeyDer<'static> {
		PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.serving_key_pkcs8.clone()))
	}

	pub fn trust_anchors(&self) -> &[CertificateDer<'static>] {
		&self.trust_der
	}

	pub fn ca_fingerprint(&self) -> String {
		x509::cert_fingerprint(&self.ca_cert_der)
	}
}

/// Materialize or load the CA and broker serving material.
///
/// Missing everything: generate a fresh CA (serial 1) whose cert doubles as
/// the trust bundle and serving cert, then a broker cert signed by it. Key
/// without cert (or the reverse) is a fatal configuration error. Existing
/// material is loaded untouched, generating only the missing broker pair.
pub fn init(cfg: &Config, store: &Store) -> Result<TlsAuthority, BootstrapError> {
	match (cfg.ssl_key.exists(), cfg.ssl_cert.exists()) {
		(false, false) => generate_ca(cfg, store)?,
		(false, true) => {
			return Err(BootstrapError::HalfState(format!(
				"ssl_cert {} exists, but ssl_key {} does not",
				cfg.ssl_cert.display(),
				cfg.ssl_key.display()
			)));
		},
		(true, false) => {
			return Err(BootstrapError::HalfState(format!(
				"ssl_key {} exists, but ssl_cert {} does not",
				cfg.ssl_key.display(),
				cfg.ssl_cert.display()
			)));
		},
		(true, true) => {},
	}

	let trust_path = if cfg.ssl_ca.exists() {
		cfg.ssl_ca.clone()
	} else {
		warn!(
			"discrete CA cert {} not found, using ssl_cert {} as CA cert",
			cfg.ssl_ca.display(),
			cfg.ssl_cert.display()
		);
		cfg.ssl_cert.clone()
	};

	let key_pem = fs_err::read_to_string(&cfg.ssl_key)?;
	let ec = x509::load_key_pem(&key_pem)?;
	let cert_pem = fs_err::read_to_string(&cfg.ssl_cert)?;
	let key_pair = ec.key_pair()?;
	let issuer = Issuer::from_ca_cert_pem(&cert_pem, key_pair).map_err(X509Error::Build)?;

	if !cfg.ssl_broker_key.exists() || !cfg.ssl_broker_cert.exists() {
		generate_broker(cfg, store, &issuer)?;
	}

	let trust_pem = fs_err::read_to_string(&trust_path)?;
	let trust_der = pem_certs(&trust_pem)?;
	let ca_cert_der = pem_certs(&cert_pem)?
		.into_iter()
		.next()
		.ok_or_else(|| BootstrapError::Pem(format!("no certificate in {}", cfg.ssl_cert.display())))?;

	let authority = TlsAuthority {
		ca_cert_pem: cert_pem,
		ca_cert_der,
		trust_der,
		serving_key_pkcs8: ec.pkcs8_der,
		issuer,
	};
	info!(fingerprint = %authority.ca_fingerprint(), "tls authority ready");
	Ok(authority)
}

fn generate_ca(cfg: &Config, store: &Store) -> Result<(), BootstrapError> {
	info!("no tls material found, generating CA certificate");
	let key = x509::generate_key(cfg.ssl_key_curve)?;
	let not_before = OffsetDateTime::now_utc();
	let opts = CertOpts {
		cn: "curse".to_string(),
		san: cfg.ssl_cert_hostname.clone(),
		is_ca: true,
		not_before,
		not_after: not_before + cfg.ssl_ca_duration,
		serial: vec![1],
	};
	let (cert_pem, _issuer) = x509::self_signed_ca(&opts, key.key_pair()?)?;

	write_private(&cfg.ssl_key, key.sec1_pem.as_bytes())?;
	write_public(&cfg.ssl_cert, cert_pem.as_bytes())?;
	if cfg.ssl_ca != cfg.ssl_cert {
		write_public(&cfg.ssl_ca, cert_pem.as_bytes())?;
	}
	store.init_tls_serial(1)?;
	Ok(())
}

fn generate_broker(
	cfg: &Config,
	store: &Store,
	issuer: &Issuer<'static, KeyPair>,
) -> Result<(), BootstrapError> {
	info!("generating broker serving certificate");
	let key = x509::generate_key(cfg.ssl_key_curve)?;
	let serial = store.next_tls_serial()?;
	let not_before = OffsetDateTime::now_utc();
	let opts = CertOpts {
		cn: "nginx".to_string(),
		san: cfg.ssl_broker_hostname.clone(),
		is_ca: false,
		not_before,
		// Broker certs live as long as the CA; rotation means regenerating both.
		not_after: not_before + cfg.ssl_ca_duration,
		serial,
	};
	let cert_pem = x509::sign_cert(&opts, &key.key_pair()?, issuer)?;

	write_private(&cfg.ssl_broker_key, key.sec1_pem.as_bytes())?;
	write_public(&cfg.ssl_broker_cert, cert_pem.as_bytes())?;
	Ok(())
}

fn pem_certs(pem: &str) -> Result<Vec<CertificateDer<'static>>, BootstrapError> {
	rustls_pemfile::certs(&mut pem.as_bytes())
		.collect::<Result<Vec<_>, _>>()
		.map_err(|e| BootstrapError::Pem(e.to_string()))
}

fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
	fs_err::write(path, contents)?;
	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;
		fs_err::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
	}
	Ok(())
}

fn write_public(path: &Path, contents: &[u8]) -> std::io::Result<()> {
	fs_err::write(path, contents)?;
	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;
		fs_err::set_permissions(path, std::fs::Permissions::from_mode(0o644))?;
	}
	Ok(())
}

#[cfg(test)]
#[path = "tlsca_tests.rs"]
mod tests;
