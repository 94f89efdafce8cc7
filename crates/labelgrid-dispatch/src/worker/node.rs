//! The compute node: a dispatch-protocol client that never gives up.
//!
//! [`ComputeNode::run`] loops forever until its cancellation token fires:
//! connect, handshake, then service work ranges until the connection fails.
//! Any failure, including a normal close by the dispatch server, returns
//! the node to [`WorkerState::Disconnected`]; it waits the configured
//! backoff and starts over with a full handshake.
//!
//! Engine initialisation failures also disconnect, without sending anything
//! after the handshake.

use crate::{
    engine::{ComputeEngine, EngineFactory, EngineParams},
    worker::{config::WorkerConfig, state::WorkerState},
};
use core::convert::Infallible;
use labelgrid_core::{
    Error, Result,
    codec::{WireConn, encode_solution},
    types::{PROTOCOL_TOKEN, WorkRange},
};
use portable_atomic::{AtomicU64, Ordering};
use std::{sync::Arc, time::Instant};
use tokio::{
    io::BufStream,
    net::TcpStream,
    sync::watch,
    time::sleep,
};
use tokio_util::sync::CancellationToken;

/// Counters kept across sessions.
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub sessions: AtomicU64,
    pub ranges_completed: AtomicU64,
    pub labels_computed: AtomicU64,
}

pub struct ComputeNode<F> {
    config: WorkerConfig,
    factory: Arc<F>,
    state: watch::Sender<WorkerState>,
    stats: Arc<WorkerStats>,
}

impl<F: EngineFactory> ComputeNode<F> {
    pub fn new(config: WorkerConfig, factory: Arc<F>) -> Self {
        let (state, _) = watch::channel(WorkerState::Disconnected);
        Self {
            config,
            factory,
            state,
            stats: Arc::default(),
        }
    }

    /// Observes state transitions.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Runs until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let server = self.config.target_server.as_str();
        loop {
            let connected = tokio::select! {
                () = shutdown.cancelled() => break,
                res = self.connect() => res,
            };

            match connected {
                Ok(stream) => {
                    tracing::info!(server, "Connected to dispatch server");
                    self.stats.sessions.fetch_add(1, Ordering::Relaxed);
                    let err = tokio::select! {
                        () = shutdown.cancelled() => break,
                        res = self.session(stream) => match res {
                            Ok(never) => match never {},
                            Err(e) => e,
                        },
                    };
                    self.set_state(WorkerState::Disconnected);
                    if err.is_connection() {
                        tracing::info!(server, "Disconnected: {err}");
                    } else {
                        tracing::warn!(server, "Session failed: {err}");
                    }
                }
                Err(e) => tracing::info!(server, "{e}"),
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = sleep(self.config.reconnect_backoff) => {}
            }
        }

        self.set_state(WorkerState::Disconnected);
        tracing::info!("Compute node stopped");
    }

    async fn connect(&self) -> Result<TcpStream> {
        let addr = &self.config.target_server;
        TcpStream::connect(addr.as_str())
            .await
            .map_err(|e| Error::Connect {
                addr: addr.clone(),
                source: Arc::new(e),
            })
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    async fn session(&self, stream: TcpStream) -> Result<Infallible> {
        let mut conn = WireConn::new(BufStream::new(stream));

        self.set_state(WorkerState::Handshaking);
        conn.write_bytes(PROTOCOL_TOKEN).await?;
        conn.write_u64(self.config.preferred_size).await?;
        conn.flush().await?;

        self.set_state(WorkerState::AwaitingCommitment);
        let commitment = conn.read_commitment().await?;
        let num_labels = conn.read_u64().await?;
        tracing::info!(%commitment, num_labels, "Ready for work");

        let params = EngineParams::for_dataset(self.config.provider_id, commitment, num_labels)?;
        let mut engine = self.factory.init(&params)?;

        self.set_state(WorkerState::Working);
        loop {
            let start = conn.read_u64().await?;
            let end = conn.read_u64().await?;
            let range = WorkRange::new(start, end)?;
            let expected_len = range.output_len()?;

            tracing::info!(%range, "Task started");
            let started = Instant::now();
            let (returned, computed) = tokio::task::spawn_blocking(move || {
                let res = engine.compute(range);
                (engine, res)
            })
            .await
            .map_err(|e| Error::Engine {
                reason: format!("compute task failed: {e}"),
            })?;
            engine = returned;
            let result = computed?;

            if result.output.len() != expected_len {
                return Err(Error::protocol(format!(
                    "engine output for {range} has {} bytes; expected: {expected_len}",
                    result.output.len()
                )));
            }
            tracing::info!(
                %range,
                duration = started.elapsed().as_secs_f64(),
                output_size = result.output.len(),
                solution = ?result.solution,
                "Task completed"
            );

            conn.write_u64(encode_solution(result.solution)?).await?;
            conn.write_bytes(&result.output).await?;
            conn.flush().await?;

            self.stats.ranges_completed.fetch_add(1, Ordering::Relaxed);
            self.stats.labels_computed.fetch_add(range.len(), Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::hash::HashEngineFactory;
    use core::time::Duration;
    use labelgrid_core::{codec::decode_solution, types::Commitment};
    use tokio::{
        io::AsyncReadExt,
        net::TcpListener,
        time::timeout,
    };

    const COMMITMENT: Commitment = Commitment([0x42; 32]);

    async fn spawn_node(
        addr: std::net::SocketAddr,
        provider_id: u32,
    ) -> (CancellationToken, tokio::task::JoinHandle<()>) {
        let mut config = WorkerConfig::new(addr.to_string());
        config.preferred_size = 8;
        config.provider_id = provider_id;
        config.reconnect_backoff = Duration::from_millis(10);

        let node = ComputeNode::new(config, Arc::new(HashEngineFactory::default()));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { node.run(shutdown).await }
        });
        (shutdown, task)
    }

    /// Accepts one connection and checks the worker's opening bytes.
    async fn accept_handshake(listener: &TcpListener) -> WireConn<TcpStream> {
        let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("worker should connect")
            .unwrap();
        let mut conn = WireConn::new(stream);
        assert_eq!(&conn.read_array::<16>().await.unwrap(), PROTOCOL_TOKEN);
        assert_eq!(conn.read_u64().await.unwrap(), 8);
        conn
    }

    #[tokio::test]
    async fn reconnects_with_a_full_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (shutdown, task) = spawn_node(listener.local_addr().unwrap(), 0).await;

        let mut conn = accept_handshake(&listener).await;
        conn.write_bytes(COMMITMENT.as_bytes()).await.unwrap();
        conn.write_u64(1000).await.unwrap();
        conn.write_u64(0).await.unwrap();
        conn.write_u64(4).await.unwrap();

        let solution = decode_solution(conn.read_u64().await.unwrap());
        let output = conn.read_bytes(4 * 16).await.unwrap();

        let params = EngineParams::for_dataset(0, COMMITMENT, 1000).unwrap();
        let mut engine = HashEngineFactory::default().init(&params).unwrap();
        let expected = engine.compute(WorkRange::new(0, 4).unwrap()).unwrap();
        assert_eq!(output, expected.output);
        assert_eq!(solution, expected.solution);

        // Drop the session mid-job; the worker must start over.
        drop(conn);
        let _conn = accept_handshake(&listener).await;

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn engine_init_failure_sends_nothing_more() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (shutdown, task) = spawn_node(listener.local_addr().unwrap(), 9).await;

        let mut conn = accept_handshake(&listener).await;
        conn.write_bytes(COMMITMENT.as_bytes()).await.unwrap();
        conn.write_u64(1000).await.unwrap();

        let mut rest = Vec::new();
        let mut stream = conn.into_inner();
        timeout(Duration::from_secs(5), stream.read_to_end(&mut rest))
            .await
            .expect("worker should hang up")
            .unwrap();
        assert!(rest.is_empty());

        // And it keeps trying.
        let _conn = accept_handshake(&listener).await;
        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn zero_labels_is_a_protocol_violation() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (shutdown, task) = spawn_node(listener.local_addr().unwrap(), 0).await;

        let mut conn = accept_handshake(&listener).await;
        conn.write_bytes(COMMITMENT.as_bytes()).await.unwrap();
        conn.write_u64(0).await.unwrap();

        let mut rest = Vec::new();
        let mut stream = conn.into_inner();
        timeout(Duration::from_secs(5), stream.read_to_end(&mut rest))
            .await
            .expect("worker should hang up")
            .unwrap();
        assert!(rest.is_empty());

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_sessions_report_disconnected_before_the_backoff() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = WorkerConfig::new(listener.local_addr().unwrap().to_string());
        config.preferred_size = 8;
        config.reconnect_backoff = Duration::from_secs(30);
        let node = ComputeNode::new(config, Arc::new(HashEngineFactory::default()));
        let mut state = node.subscribe();
        let shutdown = CancellationToken::new();
        let run = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { node.run(shutdown).await }
        });

        let mut conn = accept_handshake(&listener).await;
        conn.write_bytes(COMMITMENT.as_bytes()).await.unwrap();
        conn.write_u64(1000).await.unwrap();
        timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == WorkerState::Working),
        )
        .await
        .expect("worker should start working")
        .unwrap();

        drop(conn);
        timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == WorkerState::Disconnected),
        )
        .await
        .expect("worker should report the disconnect without waiting out the backoff")
        .unwrap();

        shutdown.cancel();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn connect_failures_are_connection_errors() {
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let node = ComputeNode::new(
            WorkerConfig::new(addr.to_string()),
            Arc::new(HashEngineFactory::default()),
        );

        let err = node.connect().await.unwrap_err();
        assert!(matches!(&err, Error::Connect { addr: a, .. } if *a == addr.to_string()));
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn unreachable_server_is_retried_until_cancelled() {
        // Bind and drop to get a port nothing listens on.
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let mut config = WorkerConfig::new(addr.to_string());
        config.reconnect_backoff = Duration::from_millis(10);
        let node = ComputeNode::new(config, Arc::new(HashEngineFactory::default()));
        let mut state = node.subscribe();
        let shutdown = CancellationToken::new();

        let run = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { node.run(shutdown).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*state.borrow_and_update(), WorkerState::Disconnected);

        shutdown.cancel();
        timeout(Duration::from_secs(5), run)
            .await
            .expect("node should stop")
            .unwrap();
    }
}
