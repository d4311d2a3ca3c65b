use std::{net::SocketAddr, sync::Arc};

use courier_common::{Broker, Directory, MemoryDirectory, SettingsStore, Signal, internal, logging};
use courier_delivery::{DeliveryWorker, WorkerError};
use courier_endpoint::{EndpointError, HttpServer, SendEndpoint};
use courier_smtp::{SmtpConnector, TransportConnector};
use tokio::{sync::broadcast, task::JoinHandle};

use crate::config::Config;

/// Owns the configuration and starts every component from it.
pub struct Courier {
    config: Config,
    shutdown: broadcast::Sender<Signal>,
}

/// A started courier: the delivery worker and the HTTP server, each on its
/// own task.
pub struct Running {
    address: SocketAddr,
    broker: Broker,
    shutdown: broadcast::Sender<Signal>,
    worker: JoinHandle<Result<(), WorkerError>>,
    server: JoinHandle<Result<(), EndpointError>>,
}

impl Courier {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (shutdown, _receiver) = broadcast::channel(64);
        Self { config, shutdown }
    }

    /// Run until SIGINT or SIGTERM, then shut everything down.
    ///
    /// # Errors
    ///
    /// Fails if startup fails, or if either component ended with an error.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let running = self.start().await?;
        internal!(level = INFO, address = %running.local_addr(), "Controller running");

        wait_for_signal().await?;

        internal!(level = INFO, "Shutting down...");
        running.shutdown().await
    }

    /// Start the delivery worker and the HTTP server.
    ///
    /// The worker subscribes to the outgoing channel before the server
    /// accepts its first request.
    ///
    /// # Errors
    ///
    /// Fails if the sender address cannot be determined from the settings or
    /// the listen address cannot be bound.
    pub async fn start(self) -> anyhow::Result<Running> {
        let Config {
            settings,
            users,
            endpoint: endpoint_config,
            smtp,
        } = self.config;

        let broker = Broker::new();
        let settings: Arc<dyn SettingsStore> = Arc::new(settings);
        let directory: Arc<dyn Directory> = Arc::new(MemoryDirectory::new(users));
        let connector: Arc<dyn TransportConnector> = Arc::new(SmtpConnector::new(smtp));

        let worker = DeliveryWorker::new(&broker, directory, Arc::clone(&settings), connector)
            .with_span(tracing::info_span!("delivery"));

        let endpoint = SendEndpoint::new(broker.clone(), settings.as_ref())
            .await?
            .with_timeout(endpoint_config.timeout())
            .with_span(tracing::info_span!("endpoint"));

        let server = HttpServer::new(&endpoint_config, Arc::new(endpoint)).await?;
        let address = server.local_addr()?;

        let worker = tokio::spawn({
            let shutdown = self.shutdown.subscribe();
            async move {
                let result = worker.run(shutdown).await;
                if let Err(error) = &result {
                    internal!(level = ERROR, %error, "Delivery worker stopped");
                }
                result
            }
        });

        let server = tokio::spawn(server.serve(self.shutdown.subscribe()));

        Ok(Running {
            address,
            broker,
            shutdown: self.shutdown,
            worker,
            server,
        })
    }
}

impl Running {
    /// Where the send endpoint is listening.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.address
    }

    #[must_use]
    pub const fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Broadcast [`Signal::Shutdown`] and wait for both tasks to finish.
    ///
    /// # Errors
    ///
    /// Returns the first error either component ended with.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(Signal::Shutdown);

        let server = self.server.await?;
        let worker = self.worker.await?;

        server?;
        worker?;
        Ok(())
    }
}

async fn wait_for_signal() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate signal received, shutting down");
        }
    }

    Ok(())
}
