//! Server setup and lifecycle management

use crate::api::{create_router, AppState};
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::whitelist::WhitelistWatcher;
use corral_allocator::SimpleAllocator;
use corral_coordinator::{Coordinator, CoordinatorActor};
use corral_registry::{InMemoryRegistry, Registry};
use corral_types::{Clock, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Corral daemon server
pub struct Server {
    config: DaemonConfig,
    registry: Arc<dyn Registry>,
}

impl Server {
    /// Create a server backed by the in-process registry
    pub fn new(config: DaemonConfig) -> Self {
        Self::with_registry(config, Arc::new(InMemoryRegistry::new()))
    }

    pub fn with_registry(config: DaemonConfig, registry: Arc<dyn Registry>) -> Self {
        Self { config, registry }
    }

    /// Recover from the registry, then serve until a shutdown signal or
    /// until the coordinator loses leadership.
    pub async fn run(self) -> DaemonResult<()> {
        let coordinator_config = self.config.coordinator.to_coordinator_config()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let allocator = Box::new(SimpleAllocator::new(Arc::clone(&clock)));
        let coordinator = Coordinator::new(coordinator_config, clock, allocator);

        let (mut actor, handle) = CoordinatorActor::new(
            coordinator,
            Arc::clone(&self.registry),
            self.config.coordinator.channel_capacity,
        );
        let recovered = actor.recover().await?;
        info!(agents = recovered, "Recovered agents; awaiting reregistration");

        let (shutdown_tx, _) = broadcast::channel(1);
        let mut coordinator_task = tokio::spawn(actor.run(shutdown_tx.subscribe()));

        if let Some(path) = self.config.whitelist.file() {
            let watcher = WhitelistWatcher::new(
                path,
                Duration::from_secs(self.config.whitelist.poll_interval_secs.max(1)),
                handle.clone(),
            );
            tokio::spawn(watcher.run(shutdown_tx.subscribe()));
        }

        let addr = self.config.server.listen_addr;
        let app = create_router(AppState::new(handle), &self.config.server);
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %addr, "Corral daemon listening");

        let mut server_shutdown = shutdown_tx.subscribe();
        let serve = async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    tokio::select! {
                        _ = shutdown_signal() => {}
                        _ = server_shutdown.recv() => {}
                    }
                })
                .await
        };
        let mut server_task = tokio::spawn(serve);

        // Whichever finishes first decides the exit
        let outcome = tokio::select! {
            served = &mut server_task => {
                info!("Corral daemon shutting down");
                let _ = shutdown_tx.send(());
                let stopped = coordinator_task.await;
                served
                    .map_err(|e| DaemonError::Server(e.to_string()))?
                    .map_err(|e| DaemonError::Server(e.to_string()))?;
                stopped
            }
            stopped = &mut coordinator_task => {
                let _ = shutdown_tx.send(());
                let _ = server_task.await;
                stopped
            }
        };

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(error = %e, "Coordinator stopped");
                Err(e.into())
            }
            Err(e) => Err(DaemonError::Server(format!("Coordinator task failed: {}", e))),
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
