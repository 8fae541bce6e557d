use assert_matches::assert_matches;
use async_trait::async_trait;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_ECDSA_P256_SHA256};
use tempfile::TempDir;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use super::*;
use crate::config::parse_config;
use crate::verify::GroupCheck;

struct FakeVerifier {
	password: PasswordCheck,
}

#[async_trait]
impl Verifier for FakeVerifier {
	async fn check_password(&self, _user: &str, _pass: &str) -> PasswordCheck {
		self.password
	}

	async fn check_group(&self, _user: &str, _principal: &str) -> GroupCheck {
		GroupCheck::Denied
	}
}

fn test_state(dir: &TempDir, password: PasswordCheck) -> AuthState {
	let mut cfg = parse_config("{}".to_string(), None).unwrap();
	cfg.ssl_key = dir.path().join("ca.key");
	cfg.ssl_cert = dir.path().join("ca.crt");
	cfg.ssl_ca = dir.path().join("ca.crt");
	cfg.ssl_broker_key = dir.path().join("broker.key");
	cfg.ssl_broker_cert = dir.path().join("broker.crt");
	cfg.db_file = dir.path().join("cursed.db");

	let store = Arc::new(Store::open(&cfg.db_file).unwrap());
	let authority = Arc::new(crate::tlsca::init(&cfg, &store).unwrap());
	AuthState {
		cfg: Arc::new(cfg),
		store,
		verifier: Arc::new(FakeVerifier { password }),
		authority,
	}
}

fn csr_pem(cn: &str) -> String {
	let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
	let mut params = CertificateParams::new(Vec::new()).unwrap();
	let mut dn = DistinguishedName::new();
	dn.push(DnType::CommonName, cn);
	params.distinguished_name = dn;
	params.serialize_request(&key).unwrap().pem().unwrap()
}

fn body_with(csr: &str, user_ip: &str) -> Vec<u8> {
	serde_json::to_vec(&serde_json::json!({ "csr": csr, "user_ip": user_ip })).unwrap()
}

fn basic_auth(user: &str, pass: &str) -> http::HeaderMap {
	let mut headers = http::HeaderMap::new();
	headers.typed_insert(Authorization::basic(user, pass));
	headers
}

async fn run_issue(
	state: &AuthState,
	headers: &http::HeaderMap,
	body: &[u8],
) -> Result<IssuedClientCert, AuthError> {
	let mut caller = String::from("-");
	issue(state, &mut caller, headers, body).await
}

#[tokio::test]
async fn issues_client_cert_for_valid_request() {
	let dir = TempDir::new().unwrap();
	let state = test_state(&dir, PasswordCheck::Ok);
	let issued = run_issue(
		&state,
		&basic_auth("alice", "correct"),
		&body_with(&csr_pem("alice"), "203.0.113.7"),
	)
	.await
	.unwrap();

	assert!(issued.pem.starts_with("-----BEGIN CERTIFICATE-----"));
	let der = rustls_pemfile::certs(&mut issued.pem.as_bytes())
		.next()
		.unwrap()
		.unwrap();
	let (_, cert) = X509Certificate::from_der(&der).unwrap();
	assert_eq!(
		cert
			.subject()
			.iter_common_name()
			.next()
			.and_then(|cn| cn.as_str().ok()),
		Some("alice")
	);
	assert!(!cert.is_ca());
	// CA got serial 1, broker 2; first client cert draws 3.
	assert_eq!(cert.raw_serial(), &[3]);
	let eku = cert.extended_key_usage().unwrap().unwrap();
	assert!(eku.value.client_auth);
	assert!(!eku.value.server_auth);
}

#[tokio::test]
async fn serials_strictly_increase_per_issuance() {
	let dir = TempDir::new().unwrap();
	let state = test_state(&dir, PasswordCheck::Ok);
	let headers = basic_auth("alice", "correct");
	for expect in [3u8, 4, 5] {
		let issued = run_issue(&state, &headers, &body_with(&csr_pem("alice"), "")).await.unwrap();
		let der = rustls_pemfile::certs(&mut issued.pem.as_bytes())
			.next()
			.unwrap()
			.unwrap();
		let (_, cert) = X509Certificate::from_der(&der).unwrap();
		assert_eq!(cert.raw_serial(), &[expect]);
	}
}

#[tokio::test]
async fn missing_credentials_rejected() {
	let dir = TempDir::new().unwrap();
	let state = test_state(&dir, PasswordCheck::Ok);
	let err = run_issue(&state, &http::HeaderMap::new(), &body_with(&csr_pem("alice"), ""))
		.await
		.unwrap_err();
	assert_matches!(err, AuthError::MissingCredentials);
	assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn denied_password_rejected() {
	let dir = TempDir::new().unwrap();
	let state = test_state(&dir, PasswordCheck::Denied);
	let err = run_issue(
		&state,
		&basic_auth("alice", "wrong"),
		&body_with(&csr_pem("alice"), ""),
	)
	.await
	.unwrap_err();
	assert_matches!(err, AuthError::BadCredentials);
	assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn verifier_failure_maps_to_unauthorized() {
	let dir = TempDir::new().unwrap();
	let state = test_state(&dir, PasswordCheck::Error);
	let err = run_issue(
		&state,
		&basic_auth("alice", "correct"),
		&body_with(&csr_pem("alice"), ""),
	)
	.await
	.unwrap_err();
	assert_matches!(err, AuthError::VerifierFailure);
	assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invalid_json_rejected() {
	let dir = TempDir::new().unwrap();
	let state = test_state(&dir, PasswordCheck::Ok);
	let err = run_issue(&state, &basic_auth("alice", "correct"), b"not json")
		.await
		.unwrap_err();
	assert_matches!(err, AuthError::Body(_));
	assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_csr_rejected() {
	let dir = TempDir::new().unwrap();
	let state = test_state(&dir, PasswordCheck::Ok);
	let err = run_issue(&state, &basic_auth("alice", "correct"), b"{}")
		.await
		.unwrap_err();
	assert_matches!(err, AuthError::InvalidParam(_));
}

#[tokio::test]
async fn malformed_csr_rejected() {
	let dir = TempDir::new().unwrap();
	let state = test_state(&dir, PasswordCheck::Ok);
	let err = run_issue(
		&state,
		&basic_auth("alice", "correct"),
		&body_with("-----BEGIN CERTIFICATE REQUEST-----\nAAAA\n-----END CERTIFICATE REQUEST-----\n", ""),
	)
	.await
	.unwrap_err();
	assert_matches!(err, AuthError::Csr(_));
	assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn user_mismatch_rejected_when_forced() {
	let dir = TempDir::new().unwrap();
	let state = test_state(&dir, PasswordCheck::Ok);
	let err = run_issue(
		&state,
		&basic_auth("alice", "correct"),
		&body_with(&csr_pem("bob"), ""),
	)
	.await
	.unwrap_err();
	assert_matches!(err, AuthError::UserMismatch);
	assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn user_mismatch_allowed_when_not_forced() {
	let dir = TempDir::new().unwrap();
	let mut state = test_state(&dir, PasswordCheck::Ok);
	let mut cfg = (*state.cfg).clone();
	cfg.force_user_match = false;
	state.cfg = Arc::new(cfg);
	run_issue(
		&state,
		&basic_auth("alice", "correct"),
		&body_with(&csr_pem("bob"), ""),
	)
	.await
	.unwrap();
}

#[tokio::test]
async fn client_ip_required_when_configured() {
	let dir = TempDir::new().unwrap();
	let mut state = test_state(&dir, PasswordCheck::Ok);
	let mut cfg = (*state.cfg).clone();
	cfg.require_client_ip = true;
	state.cfg = Arc::new(cfg);

	let err = run_issue(
		&state,
		&basic_auth("alice", "correct"),
		&body_with(&csr_pem("alice"), "not-an-ip"),
	)
	.await
	.unwrap_err();
	assert_matches!(err, AuthError::InvalidParam(_));

	run_issue(
		&state,
		&basic_auth("alice", "correct"),
		&body_with(&csr_pem("alice"), "203.0.113.7"),
	)
	.await
	.unwrap();
}
