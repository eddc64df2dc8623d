//! Cooperative shutdown: server tasks watch a boolean channel and wind
//! down once it flips to true.

use tokio::sync::watch;
use tracing::{error, info};

/// Completes once the channel orders an exit. A closed channel (every
/// sender dropped) counts as an exit order too.
pub async fn await_shutdown(mut exit_rx: watch::Receiver<bool>) {
	loop {
		if *exit_rx.borrow() {
			return;
		}
		if exit_rx.changed().await.is_err() {
			return;
		}
	}
}

/// A watch channel that flips to true on the first termination signal
#[cfg(unix)]
pub fn shutdown_on_signals() -> watch::Receiver<bool> {
	use tokio::signal::unix::{signal, SignalKind};

	let (exit_tx, exit_rx) = watch::channel(false);
	tokio::spawn(async move {
		let kinds = [
			("SIGINT", SignalKind::interrupt()),
			("SIGTERM", SignalKind::terminate()),
			("SIGHUP", SignalKind::hangup()),
		];
		let mut streams = vec![];
		for (name, kind) in kinds.iter() {
			match signal(*kind) {
				Ok(stream) => streams.push((*name, stream)),
				Err(e) => error!("cannot listen for {}: {}", name, e),
			}
		}

		let waiters = streams
			.iter_mut()
			.map(|(name, stream)| {
				let name = *name;
				Box::pin(async move {
					stream.recv().await;
					name
				})
			})
			.collect::<Vec<_>>();
		if waiters.is_empty() {
			return;
		}
		let (caught, _, _) = futures::future::select_all(waiters).await;

		info!("caught {}, winding down", caught);
		let _ = exit_tx.send(true);
	});
	exit_rx
}

#[cfg(windows)]
pub fn shutdown_on_signals() -> watch::Receiver<bool> {
	let (exit_tx, exit_rx) = watch::channel(false);
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			info!("caught ctrl-c, winding down");
			let _ = exit_tx.send(true);
		}
	});
	exit_rx
}
