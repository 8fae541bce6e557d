use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::warn;

use crate::principals::{GroupAccess, PrincipalMap};

/// Outcome of a password check. `Error` covers spawn failures and timeouts,
/// which callers surface as 401 without leaking the distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordCheck {
	Ok,
	Denied,
	Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupCheck {
	Ok,
	Denied,
}

/// Credential and group-membership checks. The production implementation
/// shells out; tests substitute a deterministic fake.
#[async_trait]
pub trait Verifier: Send + Sync {
	async fn check_password(&self, user: &str, pass: &str) -> PasswordCheck;
	async fn check_group(&self, user: &str, principal: &str) -> GroupCheck;
}

/// Runs the configured verifier binaries, bounded by a timeout.
///
/// The subprocess contract keeps platform-specific PAM/NSS code out of the
/// daemon: the password verifier reads `user\n` then `pass\n` on stdin and
/// exits 0 to authenticate; the group verifier receives `USER` and `GROUP`
/// environment variables and exits 0 to confirm membership.
pub struct SubprocessVerifier {
	pwauth: PathBuf,
	unixgroup: PathBuf,
	timeout: Duration,
	principals: Arc<PrincipalMap>,
}

impl SubprocessVerifier {
	pub fn new(
		pwauth: PathBuf,
		unixgroup: PathBuf,
		timeout: Duration,
		principals: Arc<PrincipalMap>,
	) -> Self {
		SubprocessVerifier {
			pwauth,
			unixgroup,
			timeout,
			principals,
		}
	}

	async fn run_pwauth(&self, user: &str, pass: &str) -> std::io::Result<Option<bool>> {
		let mut child = Command::new(&self.pwauth)
			.stdin(Stdio::piped())
			.stdout(Stdio::null())
			.stderr(Stdio::null())
			.kill_on_drop(true)
			.spawn()?;

		if let Some(mut stdin) = child.stdin.take() {
			stdin.write_all(format!("{user}\n{pass}\n").as_bytes()).await?;
			stdin.shutdown().await?;
		}

		match tokio::time::timeout(self.timeout, child.wait()).await {
			Ok(status) => Ok(Some(status?.success())),
			Err(_) => {
				let _ = child.kill().await;
				Ok(None)
			},
		}
	}

	async fn run_unixgroup(&self, user: &str, groups: &str) -> std::io::Result<Option<bool>> {
		let mut child = Command::new(&self.unixgroup)
			.env_clear()
			.env("USER", user)
			.env("GROUP", groups)
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::null())
			.kill_on_drop(true)
			.spawn()?;

		match tokio::time::timeout(self.timeout, child.wait()).await {
			Ok(status) => Ok(Some(status?.success())),
			Err(_) => {
				let _ = child.kill().await;
				Ok(None)
			},
		}
	}
}

#[async_trait]
impl Verifier for SubprocessVerifier {
	async fn check_password(&self, user: &str, pass: &str) -> PasswordCheck {
		match self.run_pwauth(user, pass).await {
			Ok(Some(true)) => PasswordCheck::Ok,
			Ok(Some(false)) => PasswordCheck::Denied,
			Ok(None) => {
				warn!(user, "password verifier timed out");
				PasswordCheck::Error
			},
			Err(e) => {
				warn!(user, "password verifier failed to run: {e}");
				PasswordCheck::Error
			},
		}
	}

	async fn check_group(&self, user: &str, principal: &str) -> GroupCheck {
		let groups = match self.principals.lookup(principal) {
			Some(GroupAccess::Any) => return GroupCheck::Ok,
			Some(GroupAccess::Groups(groups)) => groups.clone(),
			None => return GroupCheck::Denied,
		};
		match self.run_unixgroup(user, &groups).await {
			Ok(Some(true)) => GroupCheck::Ok,
			Ok(Some(false)) => GroupCheck::Denied,
			Ok(None) => {
				warn!(user, principal, "group verifier timed out");
				GroupCheck::Denied
			},
			Err(e) => {
				warn!(user, principal, "group verifier failed to run: {e}");
				GroupCheck::Denied
			},
		}
	}
}

#[cfg(test)]
#[path = "verify_tests.rs"]
mod tests;
