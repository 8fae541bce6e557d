use tokio::sync::mpsc;
use tracing::info;

/// Waits for a termination signal (SIGTERM/ctrl-c) or a programmatic trigger.
pub struct Shutdown {
	shutdown_tx: mpsc::Sender<()>,
	shutdown_rx: mpsc::Receiver<()>,
}

impl Default for Shutdown {
	fn default() -> Self {
		Self::new()
	}
}

impl Shutdown {
	pub fn new() -> Self {
		let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
		Shutdown {
			shutdown_tx,
			shutdown_rx,
		}
	}

	pub fn trigger(&self) -> ShutdownTrigger {
		ShutdownTrigger(self.shutdown_tx.clone())
	}

	/// Resolves once the process has been asked to stop.
	pub async fn wait(mut self) {
		tokio::select! {
			_ = wait_for_signal() => {},
			_ = self.shutdown_rx.recv() => {
				info!("received shutdown request");
			},
		}
	}
}

#[derive(Clone)]
pub struct ShutdownTrigger(mpsc::Sender<()>);

impl ShutdownTrigger {
	pub async fn shutdown_now(&self) {
		let _ = self.0.send(()).await;
	}
}

#[cfg(unix)]
async fn wait_for_signal() {
	use tokio::signal::unix::{SignalKind, signal};
	let mut sigterm = match signal(SignalKind::terminate()) {
		Ok(s) => s,
		Err(e) => {
			tracing::error!("failed to register SIGTERM handler: {e}");
			std::future::pending::<()>().await;
			return;
		},
	};
	tokio::select! {
		_ = sigterm.recv() => info!("received SIGTERM, starting shutdown"),
		_ = tokio::signal::ctrl_c() => info!("received interrupt, starting shutdown"),
	}
}

#[cfg(not(unix))]
async fn wait_for_signal() {
	let _ = tokio::signal::ctrl_c().await;
	info!("received interrupt, starting shutdown");
}
