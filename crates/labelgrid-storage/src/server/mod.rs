//! The label storage gRPC server.
//!
//! ## Structure
//!
//! - [`config`] - CLI arguments and validated server configuration.
//! - [`session`] - a single open label file (`LabelFile`).
//! - [`registry`] - the service's one-session slot.
//! - [`service`] - the `LabelStore` gRPC handler.
//! - [`metrics`] - optional OpenTelemetry instruments.

pub mod config;
pub mod metrics;
pub mod registry;
pub mod service;
pub mod session;

use core::future::Future;
use futures::Stream;
use labelgrid_core::proto::{FILE_DESCRIPTOR_SET, label_store_server::LabelStoreServer};
use service::handler::LabelStoreService;
use tokio::io::{AsyncRead, AsyncWrite};
use tonic::transport::{Server, server::Connected};
use tonic_reflection::server::Builder;

/// Serves the label store, health and reflection services on `incoming`
/// until `signal` resolves.
///
/// On shutdown the health status flips to not-serving and the live session
/// is flushed, synced and closed before in-flight connections drain.
pub async fn serve_with_incoming<I, IO, IE, F>(
    service: LabelStoreService,
    incoming: I,
    signal: F,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
    F: Future<Output = ()>,
{
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<LabelStoreServer<LabelStoreService>>()
        .await;

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let shutdown = {
        let service = service.clone();
        async move {
            signal.await;
            tracing::info!("Shutdown signal received, terminating gracefully...");

            // 1. Publish the status
            health_reporter
                .set_not_serving::<LabelStoreServer<LabelStoreService>>()
                .await;

            // 2. Persist whatever the live session still buffers
            if let Err(e) = service.shutdown().await {
                tracing::error!("Error during service shutdown: {e}");
            }
        }
    };

    Server::builder()
        .http2_adaptive_window(Some(true))
        .add_service(health_service)
        .add_service(reflection)
        .add_service(service.into_server())
        .serve_with_incoming_shutdown(incoming, shutdown)
        .await?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::server::config::ServerConfig;
    use tokio::{net::TcpListener, sync::oneshot};
    use tokio_stream::wrappers::TcpListenerStream;

    /// A label store bound to an ephemeral local port.
    pub struct LocalServer {
        pub endpoint: String,
        stop: Option<oneshot::Sender<()>>,
        task: tokio::task::JoinHandle<anyhow::Result<()>>,
    }

    impl LocalServer {
        pub async fn start() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let endpoint = format!("http://{}", listener.local_addr().unwrap());
            let (stop, stopped) = oneshot::channel::<()>();
            let service = LabelStoreService::new(ServerConfig::default());
            let task = tokio::spawn(serve_with_incoming(
                service,
                TcpListenerStream::new(listener),
                async move {
                    let _ = stopped.await;
                },
            ));
            Self {
                endpoint,
                stop: Some(stop),
                task,
            }
        }

        pub async fn stop(mut self) {
            if let Some(stop) = self.stop.take() {
                let _ = stop.send(());
            }
            self.task.await.unwrap().unwrap();
        }
    }
}
