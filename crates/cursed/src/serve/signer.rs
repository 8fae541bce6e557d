use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use http::{Method, StatusCode};
use hyper::Request;
use hyper::body::Incoming;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::serve::{Peer, Response, collect_body, empty_response, plaintext_response};
use crate::ssh::{self, CertOptions, SshAuthority, SshError};
use crate::store::{Store, StoreError};
use crate::validate;
use crate::verify::{GroupCheck, Verifier};

/// SSH signing request, submitted by the bastion helper over mTLS.
#[derive(Debug, Deserialize)]
struct SignRequest {
	#[serde(default)]
	bastion_ip: String,
	#[serde(default)]
	cmd: String,
	#[serde(default)]
	key: String,
	#[serde(default)]
	remote_user: String,
	#[serde(default)]
	user_ip: String,
}

pub struct SignerState {
	pub cfg: Arc<Config>,
	pub store: Arc<Store>,
	pub verifier: Arc<dyn Verifier>,
	pub ssh: Arc<SshAuthority>,
}

#[derive(thiserror::Error, Debug)]
pub enum SignError {
	#[error("bad request body: {0}")]
	Body(String),

	#[error("no verified client certificate")]
	NoClientCert,

	#[error("param validation failure: {0}")]
	InvalidParam(String),

	#[error("unable to parse authorized key")]
	Key(#[source] SshError),

	#[error("not authorized for principal")]
	GroupDenied,

	#[error("submitted pubkey is too old")]
	KeyExpired,

	#[error("pubkey age check failed: {0}")]
	AgeCheck(#[source] StoreError),

	#[error(transparent)]
	Store(#[from] StoreError),

	#[error("failed to sign pubkey: {0}")]
	Sign(#[source] SshError),
}

impl SignError {
	pub fn status(&self) -> StatusCode {
		match self {
			SignError::Body(_) | SignError::InvalidParam(_) | SignError::Key(_) => {
				StatusCode::BAD_REQUEST
			},
			SignError::NoClientCert | SignError::GroupDenied => StatusCode::UNAUTHORIZED,
			SignError::KeyExpired => StatusCode::UNPROCESSABLE_ENTITY,
			SignError::AgeCheck(_) | SignError::Store(_) | SignError::Sign(_) => {
				StatusCode::INTERNAL_SERVER_ERROR
			},
		}
	}

	fn public_message(&self) -> String {
		match self.status() {
			StatusCode::BAD_REQUEST => self.to_string(),
			StatusCode::UNAUTHORIZED => "Not authorized".to_string(),
			StatusCode::UNPROCESSABLE_ENTITY => {
				"Submitted pubkey is too old. Please generate new key.".to_string()
			},
			_ => "Server error".to_string(),
		}
	}
}

#[derive(Debug)]
pub struct SignedSshCert {
	pub authorized_key: String,
	pub detail: String,
}

#[cfg(test)]
#[path = "signer_tests.rs"]
mod tests;

pub async fn handle(
	state: Arc<SignerState>,
	peer: Peer,
	req: Request<Incoming>,
) -> Result<Response, anyhow::Error> {
	let caller = peer.caller.clone().unwrap_or_else(|| "-".to_string());
	if req.method() != Method::POST || req.uri().path() != "/" {
		info!(
			target: "request",
			endpoint = "ssh",
			remote = %peer.addr.ip(),
			caller = %caller,
			status = StatusCode::NOT_FOUND.as_u16(),
			detail = %format!("{} {}", req.method(), req.uri().path()),
		);
		return Ok(empty_response(StatusCode::NOT_FOUND));
	}

	let (_parts, body) = req.into_parts();
	let result = match collect_body(body).await {
		Ok(bytes) => sign(&state, &peer, &bytes).await,
		Err(e) => Err(SignError::Body(e)),
	};
	match result {
		Ok(signed) => {
			info!(
				target: "request",
				endpoint = "ssh",
				remote = %peer.addr.ip(),
				caller = %caller,
				status = StatusCode::OK.as_u16(),
				detail = %signed.detail,
			);
			Ok(plaintext_response(StatusCode::OK, signed.authorized_key))
		},
		Err(e) => {
			let status = e.status();
			warn!(
				target: "request",
				endpoint = "ssh",
				remote = %peer.addr.ip(),
				caller = %caller,
				status = status.as_u16(),
				detail = %e,
			);
			Ok(plaintext_response(status, e.public_message()))
		},
	}
}

/// The signing pipeline of the SSH endpoint.
pub async fn sign(
	state: &SignerState,
	peer: &Peer,
	body: &[u8],
) -> Result<SignedSshCert, SignError> {
	let payload: SignRequest =
		serde_json::from_slice(body).map_err(|e| SignError::Body(e.to_string()))?;

	// The TLS layer already verified the chain; an absent CN means no usable
	// identity, which only happens without a client certificate.
	let caller = peer.caller.clone().ok_or(SignError::NoClientCert)?;

	validate_params(&state.cfg, &caller, &payload)?;

	let pubkey = ssh::parse_pubkey(&payload.key).map_err(SignError::Key)?;
	let fp = ssh::fingerprint_md5(&pubkey).map_err(SignError::Key)?;

	match state.verifier.check_group(&caller, &payload.remote_user).await {
		GroupCheck::Ok => {},
		GroupCheck::Denied => return Err(SignError::GroupDenied),
	}

	check_key_age(state, &fp)?;

	let now = Utc::now();
	let valid_after = now - chrono::Duration::seconds(30);
	let valid_before =
		now + chrono::Duration::seconds(state.cfg.ssh_cert_duration.as_secs() as i64);
	let key_id = format!(
		"user[{caller}] from[{}] command[{}] sshKey[{fp}] ca[{}] valid to[{}]",
		payload.user_ip,
		payload.cmd,
		state.ssh.fingerprint_md5(),
		valid_before.to_rfc3339_opts(SecondsFormat::Secs, true),
	);

	let opts = CertOptions {
		key_id: key_id.clone(),
		principals: vec![payload.remote_user.clone()],
		source_address: payload.bastion_ip.clone(),
		force_command: payload.cmd.clone(),
		extensions: state.cfg.extensions.clone(),
		valid_after: valid_after.timestamp() as u64,
		valid_before: valid_before.timestamp() as u64,
	};
	let signed = ssh::sign(&state.ssh, &state.store, &payload.key, &opts).map_err(|e| match e {
		SshError::ParseKey(_) => SignError::Key(e),
		SshError::Store(e) => SignError::Store(e),
		other => SignError::Sign(other),
	})?;

	Ok(SignedSshCert {
		authorized_key: signed.authorized_key,
		detail: format!("serial[{}] {key_id}", signed.serial),
	})
}

fn validate_params(cfg: &Config, caller: &str, p: &SignRequest) -> Result<(), SignError> {
	if caller.is_empty() || !validate::valid_username(caller) {
		return Err(SignError::InvalidParam("invalid username in client certificate".to_string()));
	}
	if !validate::valid_ip(&p.bastion_ip) {
		return Err(SignError::InvalidParam("bastion_ip is invalid".to_string()));
	}
	if p.key.is_empty() {
		return Err(SignError::InvalidParam("key missing from request".to_string()));
	}
	if p.remote_user.is_empty() {
		return Err(SignError::InvalidParam("remote_user missing from request".to_string()));
	}
	// A non-empty cmd is always honored; force_cmd only rejects its absence.
	if cfg.force_cmd && p.cmd.is_empty() {
		return Err(SignError::InvalidParam("cmd missing from request".to_string()));
	}
	if cfg.require_client_ip && !validate::valid_ip(&p.user_ip) {
		return Err(SignError::InvalidParam("invalid user_ip".to_string()));
	}
	Ok(())
}

/// Freshness gate: the first sighting of a fingerprint is recorded, later
/// sightings must be younger than the configured maximum key age. Ledger
/// failures are fatal to the request only in `key_age_critical` mode.
fn check_key_age(state: &SignerState, fp: &str) -> Result<(), SignError> {
	let now = Utc::now().timestamp();
	let max_age = state.cfg.max_key_age.as_secs() as i64;
	match state.store.first_seen(fp) {
		Ok(Some(birthday)) => {
			if now - birthday > max_age {
				return Err(SignError::KeyExpired);
			}
		},
		Ok(None) => {
			if let Err(e) = state.store.record_first_seen(fp, now) {
				if state.cfg.key_age_critical {
					return Err(SignError::AgeCheck(e));
				}
				warn!("failed to record pubkey birthday for {fp}: {e}");
			}
		},
		Err(e) => {
			if state.cfg.key_age_critical {
				return Err(SignError::AgeCheck(e));
			}
			warn!("failed to check pubkey age for {fp}: {e}");
		},
	}
	Ok(())
}
