//! Drain channel used to gracefully stop listeners.
//!
//! A [`DrainTrigger`] signals the start of a drain; every [`DrainWatcher`]
//! clone observes the signal, and the trigger resolves once all watchers
//! (and everything holding them) have been dropped.

use tokio::sync::{mpsc, watch};

pub fn new() -> (DrainTrigger, DrainWatcher) {
	let (signal_tx, signal_rx) = watch::channel(false);
	let (done_tx, done_rx) = mpsc::channel(1);
	(
		DrainTrigger {
			signal_tx,
			done_rx,
		},
		DrainWatcher {
			signal_rx,
			_done_tx: done_tx,
		},
	)
}

pub struct DrainTrigger {
	signal_tx: watch::Sender<bool>,
	done_rx: mpsc::Receiver<()>,
}

impl DrainTrigger {
	/// Signal all watchers to drain, then wait until every watcher has been dropped.
	pub async fn start_drain_and_wait(mut self) {
		let _ = self.signal_tx.send(true);
		// All senders are held by watchers; recv resolves None once they are gone.
		let _ = self.done_rx.recv().await;
	}
}

#[derive(Clone)]
pub struct DrainWatcher {
	signal_rx: watch::Receiver<bool>,
	_done_tx: mpsc::Sender<()>,
}

impl DrainWatcher {
	/// Resolves when a drain has been requested.
	pub async fn wait_for_drain(mut self) {
		while !*self.signal_rx.borrow_and_update() {
			if self.signal_rx.changed().await.is_err() {
				// Trigger dropped without draining; treat as drained so tasks exit.
				return;
			}
		}
	}
}
