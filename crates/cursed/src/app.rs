use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use cursed_core::drain::{self, DrainTrigger};
use cursed_core::signal;
use tracing::info;

use crate::config::Config;
use crate::principals::PrincipalMap;
use crate::serve::auth::{self, AuthState};
use crate::serve::signer::{self, SignerState};
use crate::serve::{self, Server};
use crate::ssh::SshAuthority;
use crate::store::Store;
use crate::tlsca;
use crate::verify::{SubprocessVerifier, Verifier};

/// Wire everything together and start both listeners.
///
/// Bootstrap (TLS material, SSH CA, store, principal table) happens before
/// any socket accepts traffic; after this returns, the daemon is serving.
pub async fn run(cfg: Arc<Config>) -> anyhow::Result<Bound> {
	info!("running with config: {cfg:?}");
	let store = Arc::new(Store::open(&cfg.db_file).context("opening durable store")?);
	let authority = Arc::new(tlsca::init(&cfg, &store).context("tls bootstrap")?);
	let ssh = Arc::new(SshAuthority::load(&cfg.ssh_ca_key).context("loading SSH CA key")?);
	info!(fingerprint = %ssh.fingerprint_md5(), "ssh CA loaded");

	let principals = Arc::new(
		PrincipalMap::load(&cfg.principal_aliases).context("loading principal aliases")?,
	);
	info!(entries = principals.len(), "principal alias table loaded");
	let verifier: Arc<dyn Verifier> = Arc::new(SubprocessVerifier::new(
		cfg.pwauth.clone(),
		cfg.unixgroup.clone(),
		cfg.auth_timeout,
		principals,
	));

	let shutdown = signal::Shutdown::new();
	let (drain_tx, drain_rx) = drain::new();

	let auth_tls = Arc::new(serve::server_config(&authority, false)?);
	let auth_server = Server::bind(
		"auth",
		cfg.auth_addr,
		auth_tls,
		drain_rx.clone(),
		AuthState {
			cfg: cfg.clone(),
			store: store.clone(),
			verifier: verifier.clone(),
			authority: authority.clone(),
		},
	)
	.await
	.context("auth listener")?;
	let auth_address = auth_server.address();

	let signer_tls = Arc::new(serve::server_config(&authority, true)?);
	let signer_server = Server::bind(
		"ssh-signer",
		cfg.signer_addr,
		signer_tls,
		drain_rx.clone(),
		SignerState {
			cfg: cfg.clone(),
			store: store.clone(),
			verifier,
			ssh,
		},
	)
	.await
	.context("ssh-signer listener")?;
	let signer_address = signer_server.address();

	auth_server.spawn(auth::handle);
	signer_server.spawn(signer::handle);

	Ok(Bound {
		auth_address,
		signer_address,
		shutdown,
		drain_tx,
	})
}

/// A running daemon: the bound listener addresses plus the handles needed to
/// stop it.
pub struct Bound {
	pub auth_address: SocketAddr,
	pub signer_address: SocketAddr,
	shutdown: signal::Shutdown,
	drain_tx: DrainTrigger,
}

impl Bound {
	pub fn shutdown_trigger(&self) -> signal::ShutdownTrigger {
		self.shutdown.trigger()
	}

	/// Block until a termination signal, then drain both listeners.
	pub async fn wait_termination(self) -> anyhow::Result<()> {
		self.shutdown.wait().await;
		info!("draining listeners");
		self.drain_tx.start_drain_and_wait().await;
		Ok(())
	}
}
