use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use wallet_tx_logger::config::IngestConfig;
use wallet_tx_logger::ledger::SqliteLedgerStore;
use wallet_tx_logger::txlog::ingest::IngestOrchestrator;

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	info!("Starting wallet transaction logger");

	let config = match IngestConfig::from_env() {
		Ok(config) => config,
		Err(e) => {
			error!("Invalid configuration: {}", e);
			std::process::exit(1);
		}
	};

	info!(
		"Tailing {:?} into {:?} (state in {:?}, follow: {})",
		config.log_path, config.database_path, config.state_dir, config.follow
	);

	let store = match SqliteLedgerStore::open(&config.database_path) {
		Ok(store) => Arc::new(store),
		Err(e) => {
			error!(
				"Failed to open ledger database {:?}: {}",
				config.database_path, e
			);
			std::process::exit(1);
		}
	};

	let orchestrator = match IngestOrchestrator::new(&config, store.clone(), store).await {
		Ok(orchestrator) => orchestrator,
		Err(e) => {
			error!("Failed to start ingest: {}", e);
			std::process::exit(1);
		}
	};

	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	tokio::spawn(async move {
		wait_for_signal().await;
		info!("Received shutdown signal");
		let _ = shutdown_tx.send(true);
	});

	match orchestrator.run(shutdown_rx).await {
		Ok(stats) => info!("{}", stats.summary()),
		Err(e) => {
			error!("Ingest stopped: {}", e);
			std::process::exit(1);
		}
	}
}

#[cfg(unix)]
async fn wait_for_signal() {
	use tokio::signal::unix::{SignalKind, signal};

	match signal(SignalKind::terminate()) {
		Ok(mut terminate) => {
			tokio::select! {
				_ = tokio::signal::ctrl_c() => {}
				_ = terminate.recv() => {}
			}
		}
		Err(e) => {
			error!("Failed to install SIGTERM handler: {}", e);
			let _ = tokio::signal::ctrl_c().await;
		}
	}
}

#[cfg(not(unix))]
async fn wait_for_signal() {
	let _ = tokio::signal::ctrl_c().await;
}
