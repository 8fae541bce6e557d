use std::sync::Arc;

use headers::authorization::Basic;
use headers::{Authorization, HeaderMapExt};
use http::{Method, StatusCode};
use hyper::Request;
use hyper::body::Incoming;
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::config::Config;
use crate::serve::{Body, Peer, Response, collect_body, empty_response, plaintext_response};
use crate::store::{self, Store, StoreError};
use crate::tlsca::TlsAuthority;
use crate::validate;
use crate::verify::{PasswordCheck, Verifier};
use crate::x509::{self, X509Error};

/// Client-cert issuance request. Basic-auth credentials ride on the header;
/// `bastion_user` is informational only.
#[derive(Debug, Deserialize)]
struct AuthRequest {
	#[serde(default)]
	bastion_user: String,
	#[serde(default)]
	csr: String,
	#[serde(default)]
	user_ip: String,
}

pub struct AuthState {
	pub cfg: Arc<Config>,
	pub store: Arc<Store>,
	pub verifier: Arc<dyn Verifier>,
	pub authority: Arc<TlsAuthority>,
}

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
	#[error("bad request body: {0}")]
	Body(String),

	#[error("missing credentials")]
	MissingCredentials,

	#[error("rejected credentials")]
	BadCredentials,

	#[error("password verifier failure")]
	VerifierFailure,

	#[error("param validation failure: {0}")]
	InvalidParam(String),

	#[error("invalid csr: {0}")]
	Csr(X509Error),

	#[error("CSR CommonName field does not match logged-in user")]
	UserMismatch,

	#[error(transparent)]
	Store(#[from] StoreError),

	#[error("failed to sign certificate: {0}")]
	Sign(X509Error),
}

impl AuthError {
	pub fn status(&self) -> StatusCode {
		match self {
			AuthError::Body(_)
			| AuthError::InvalidParam(_)
			| AuthError::Csr(_)
			| AuthError::UserMismatch => StatusCode::BAD_REQUEST,
			AuthError::MissingCredentials
			| AuthError::BadCredentials
			| AuthError::VerifierFailure => StatusCode::UNAUTHORIZED,
			AuthError::Store(_) | AuthError::Sign(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	/// What the client sees; internal failure detail stays in the log.
	fn public_message(&self) -> String {
		match self.status() {
			StatusCode::BAD_REQUEST => self.to_string(),
			StatusCode::UNAUTHORIZED => "Not authorized".to_string(),
			_ => "Server error".to_string(),
		}
	}
}

#[derive(Debug)]
pub struct IssuedClientCert {
	pub pem: String,
	pub detail: String,
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;

pub async fn handle(
	state: Arc<AuthState>,
	peer: Peer,
	req: Request<Incoming>,
) -> Result<Response, anyhow::Error> {
	if req.method() != Method::POST || req.uri().path() != "/" {
		info!(
			target: "request",
			endpoint = "auth",
			remote = %peer.addr.ip(),
			caller = "-",
			status = StatusCode::NOT_FOUND.as_u16(),
			detail = %format!("{} {}", req.method(), req.uri().path()),
		);
		return Ok(empty_response(StatusCode::NOT_FOUND));
	}

	let (parts, body) = req.into_parts();
	let mut caller = String::from("-");
	let result = match collect_body(body).await {
		Ok(bytes) => issue(&state, &mut caller, &parts.headers, &bytes).await,
		Err(e) => Err(AuthError::Body(e)),
	};
	match result {
		Ok(issued) => {
			info!(
				target: "request",
				endpoint = "auth",
				remote = %peer.addr.ip(),
				caller = %caller,
				status = StatusCode::OK.as_u16(),
				detail = %issued.detail,
			);
			Ok(
				http::Response::builder()
					.status(StatusCode::OK)
					.header(hyper::header::CONTENT_TYPE, "application/x-pem-file")
					.body(Body::from(issued.pem))
					.expect("builder with known status code should not fail"),
			)
		},
		Err(e) => {
			let status = e.status();
			warn!(
				target: "request",
				endpoint = "auth",
				remote = %peer.addr.ip(),
				caller = %caller,
				status = status.as_u16(),
				detail = %e,
			);
			Ok(plaintext_response(status, e.public_message()))
		},
	}
}

/// The issuance pipeline of the auth endpoint; any failure short-circuits
/// into an HTTP status at the boundary above.
pub async fn issue(
	state: &AuthState,
	caller: &mut String,
	headers: &http::HeaderMap,
	body: &[u8],
) -> Result<IssuedClientCert, AuthError> {
	let payload: AuthRequest =
		serde_json::from_slice(body).map_err(|e| AuthError::Body(e.to_string()))?;

	let auth = headers
		.typed_get::<Authorization<Basic>>()
		.ok_or(AuthError::MissingCredentials)?;
	let user = auth.0.username().to_string();
	caller.clone_from(&user);

	match state.verifier.check_password(&user, auth.0.password()).await {
		PasswordCheck::Ok => {},
		PasswordCheck::Denied => return Err(AuthError::BadCredentials),
		PasswordCheck::Error => return Err(AuthError::VerifierFailure),
	}

	if !validate::valid_username(&user) {
		return Err(AuthError::InvalidParam("username is invalid".to_string()));
	}
	// bastion_user is informational, but a present value must still be sane.
	if !payload.bastion_user.is_empty() && !validate::valid_username(&payload.bastion_user) {
		return Err(AuthError::InvalidParam("bastion_user is invalid".to_string()));
	}
	if payload.csr.is_empty() {
		return Err(AuthError::InvalidParam("csr missing from request".to_string()));
	}
	if state.cfg.require_client_ip && !validate::valid_ip(&payload.user_ip) {
		return Err(AuthError::InvalidParam("invalid user_ip".to_string()));
	}

	let csr = x509::parse_csr(&payload.csr).map_err(AuthError::Csr)?;
	if state.cfg.force_user_match && csr.common_name().as_deref() != Some(user.as_str()) {
		return Err(AuthError::UserMismatch);
	}

	let serial = state.store.next_tls_serial()?;
	let not_before = OffsetDateTime::now_utc();
	let not_after = not_before + state.cfg.ssl_duration;
	let issued = x509::sign_client_csr(csr, state.authority.issuer(), not_before, not_after, serial.clone())
		.map_err(AuthError::Sign)?;

	let detail = format!(
		"user[{user}] from[{}] serial[{}] fingerprint[{}]",
		payload.user_ip,
		store::serial_display(&serial),
		issued.fingerprint,
	);
	Ok(IssuedClientCert {
		pem: issued.pem,
		detail,
	})
}
