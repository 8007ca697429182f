/// Sysdig Monitor: per-container system call, file and network statistics.
///
/// Events are read from a `sysdig` subprocess, routed to one processor per
/// container, and exposed through a JSON query API and Prometheus gauges.
pub mod api;
pub mod config;
pub mod container;
pub mod error;
pub mod inspect;
pub mod layer;
pub mod metrics;
pub mod monitor;
pub mod stats;
pub mod sysdig;

use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::ResultOkLogExt;
use crate::inspect::DockerInspector;
use crate::metrics::{Metrics, MetricsPublisher};
use crate::monitor::Monitor;

/// Runs the monitor until SIGINT, SIGTERM or a tracer failure.
///
/// # Errors
///
/// Possible errors include:
/// - Failure to register the gauges.
/// - A missing or unusable `sysdig` binary.
/// - Failure to install the signal handlers.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    log::debug!("Configuration: {:?}", config);

    let registry = prometheus::Registry::new();
    let metrics = Metrics::new(&registry)?;
    let inspector = DockerInspector::new(&config.docker_socket, &config.rootfs);
    let monitor = Arc::new(Monitor::new(inspector, metrics, config.monitor));

    let mut server = sysdig::Server::new(
        sysdig::TracerCommand::sysdig(&config.sysdig_binary),
        config.event_buffer_size,
    );
    let events = server.subscribe();
    let mut tracer_failed = server.start().await?;
    log::info!("Started tracer `{}`", config.sysdig_binary.display());

    let token = CancellationToken::new();
    let router = tokio::spawn(Arc::clone(&monitor).run(events, token.clone()));
    let api = {
        let api = api::ApiServer::new(Arc::clone(&monitor), MetricsPublisher::new(registry));
        let addr = config.listen_addr;
        let token = token.clone();
        tokio::spawn(async move { api.listen(addr, token).await.ok_log() })
    };

    let mut terminate = signal(SignalKind::terminate())?;
    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Received SIGINT, shutting down");
            Ok(())
        }
        _ = terminate.recv() => {
            log::info!("Received SIGTERM, shutting down");
            Ok(())
        }
        err = &mut tracer_failed => match err {
            Ok(err) => {
                log::error!("Tracer failed: {}", err);
                Err(err.into())
            }
            // The server went away without reporting, nothing left to wait for.
            Err(_) => Ok(()),
        },
    };

    token.cancel();
    server.shutdown();
    router.await.ok_log();
    api.await.ok_log();
    result
}
