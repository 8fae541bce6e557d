use rand_core::OsRng;
use ssh_key::{Algorithm, Certificate, HashAlg, LineEnding};
use tempfile::TempDir;

use super::*;

fn test_setup() -> (TempDir, SshAuthority, Store) {
	let dir = TempDir::new().unwrap();
	let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
	let key_path = dir.path().join("user_ca");
	key.write_openssh_file(&key_path, LineEnding::LF).unwrap();
	let authority = SshAuthority::load(&key_path).unwrap();
	let store = Store::open(&dir.path().join("cursed.db")).unwrap();
	(dir, authority, store)
}

fn client_key_line() -> String {
	let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
	PublicKey::from(&key).to_openssh().unwrap()
}

fn options() -> CertOptions {
	let mut extensions = BTreeMap::new();
	extensions.insert("permit-pty".to_string(), String::new());
	CertOptions {
		key_id: "user[alice] from[203.0.113.7] command[] sshKey[xx] ca[yy] valid to[t]".to_string(),
		principals: vec!["root".to_string()],
		source_address: "198.51.100.1".to_string(),
		force_command: String::new(),
		extensions,
		valid_after: 1_700_000_000 - 30,
		valid_before: 1_700_000_000 + 120,
	}
}

#[test]
fn signs_a_valid_user_cert() {
	let (_dir, authority, store) = test_setup();
	let signed = sign(&authority, &store, &client_key_line(), &options()).unwrap();
	assert!(signed.authorized_key.ends_with('\n'));
	assert_eq!(signed.serial, 1);

	let cert = Certificate::from_openssh(&signed.authorized_key).unwrap();
	assert_eq!(cert.cert_type(), CertType::User);
	assert_eq!(cert.serial(), 1);
	assert_eq!(cert.valid_principals(), ["root"]);
	assert_eq!(cert.valid_after(), 1_700_000_000 - 30);
	assert_eq!(cert.valid_before(), 1_700_000_000 + 120);
	assert_eq!(
		cert.critical_options().get("source-address").map(String::as_str),
		Some("198.51.100.1")
	);
	assert!(!cert.critical_options().contains_key("force-command"));
	assert!(cert.extensions().contains_key("permit-pty"));

	// Signature verifies against the CA public key.
	let ca_fp = authority.public_key().fingerprint(HashAlg::Sha256);
	cert.validate_at(1_700_000_000, [&ca_fp]).unwrap();
}

#[test]
fn force_command_included_when_set() {
	let (_dir, authority, store) = test_setup();
	let mut opts = options();
	opts.force_command = "rsync --server".to_string();
	let signed = sign(&authority, &store, &client_key_line(), &opts).unwrap();
	let cert = Certificate::from_openssh(&signed.authorized_key).unwrap();
	assert_eq!(
		cert.critical_options().get("force-command").map(String::as_str),
		Some("rsync --server")
	);
}

#[test]
fn serials_increment_per_signing() {
	let (_dir, authority, store) = test_setup();
	let opts = options();
	for expect in 1..=3u64 {
		let signed = sign(&authority, &store, &client_key_line(), &opts).unwrap();
		assert_eq!(signed.serial, expect);
	}
}

#[test]
fn malformed_pubkey_rejected() {
	let (_dir, authority, store) = test_setup();
	let err = sign(&authority, &store, "not an ssh key", &options()).unwrap_err();
	assert!(matches!(err, SshError::ParseKey(_)));
}

#[test]
fn md5_fingerprint_is_colon_hex() {
	let key = parse_pubkey(&client_key_line()).unwrap();
	let fp = fingerprint_md5(&key).unwrap();
	let parts: Vec<&str> = fp.split(':').collect();
	assert_eq!(parts.len(), 16);
	assert!(
		parts
			.iter()
			.all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
	);
}

#[test]
fn authority_fingerprints_are_stable() {
	let (_dir, authority, _store) = test_setup();
	assert_eq!(authority.fingerprint().len(), 32);
	assert_eq!(authority.fingerprint_md5().split(':').count(), 16);
}
