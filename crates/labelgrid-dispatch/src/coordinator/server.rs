//! The dispatch server: accepts workers and drives a job to completion.
//!
//! Every connection runs in its own task. Sessions share only the
//! [`RangeAllocator`] and the channel into the single assembler loop, so a
//! misbehaving worker costs at most the range it was holding, which goes
//! back to the allocator.

use crate::coordinator::{
    allocator::RangeAllocator,
    assembler::{DispatchSummary, OrderedAssembler},
    session::{RangeOutput, serve_worker},
    sink::LabelSink,
};
use labelgrid_core::{Error, Result, types::Commitment};
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::{net::TcpListener, sync::mpsc};
use tokio_util::sync::CancellationToken;

/// Completed ranges buffered between sessions and the assembler.
const RESULT_BUFFER: usize = 64;

/// What to compute and how to split it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchJob {
    pub commitment: Commitment,
    /// Total labels in the dataset; also determines the difficulty.
    pub num_labels: u64,
    /// First label to hand out. Labels before it are already stored.
    pub first_label: u64,
    pub default_chunk: u64,
    pub max_chunk: u64,
}

#[derive(Debug, Default)]
pub struct DispatchStats {
    pub workers_connected: AtomicU64,
    pub sessions_failed: AtomicU64,
    pub ranges_received: AtomicU64,
}

/// Accepts workers on `listener` until every label of `job` has been
/// written to `sink`, then flushes the sink and returns it.
///
/// # Errors
///
/// - [`Error::ServiceShutdown`] if `shutdown` fires first.
/// - Any error from the sink; the job is abandoned.
pub async fn run_dispatch<S: LabelSink>(
    listener: TcpListener,
    job: DispatchJob,
    sink: S,
    shutdown: CancellationToken,
) -> Result<(S, DispatchSummary)> {
    run_dispatch_with_stats(listener, job, sink, shutdown, Arc::default()).await
}

pub async fn run_dispatch_with_stats<S: LabelSink>(
    listener: TcpListener,
    job: DispatchJob,
    sink: S,
    shutdown: CancellationToken,
    stats: Arc<DispatchStats>,
) -> Result<(S, DispatchSummary)> {
    let job = Arc::new(job);
    let allocator = Arc::new(RangeAllocator::new(
        job.first_label,
        job.num_labels,
        job.default_chunk,
        job.max_chunk,
    ));
    let (results_tx, mut results) = mpsc::channel(RESULT_BUFFER);
    let sessions = shutdown.child_token();

    tokio::spawn(accept_loop(
        listener,
        Arc::clone(&job),
        Arc::clone(&allocator),
        results_tx,
        sessions.clone(),
        Arc::clone(&stats),
    ));

    tracing::info!(
        commitment = %job.commitment,
        num_labels = job.num_labels,
        first_label = job.first_label,
        "Dispatching labels"
    );

    let mut assembler = OrderedAssembler::new(sink, job.first_label, job.num_labels);
    let res = assemble(&mut assembler, &mut results, &shutdown, &stats).await;

    allocator.close();
    sessions.cancel();
    if let Err(e) = res {
        if matches!(e, Error::ServiceShutdown) {
            // Persist the contiguous prefix so a restart resumes after it.
            if let Err(flush_err) = assembler.finish().await {
                tracing::warn!("Failed to flush labels on shutdown: {flush_err}");
            }
        }
        return Err(e);
    }

    let (sink, summary) = assembler.finish().await?;
    tracing::info!(
        labels_written = summary.labels_written,
        solution = ?summary.solution,
        "Dispatch complete"
    );
    Ok((sink, summary))
}

async fn assemble<S: LabelSink>(
    assembler: &mut OrderedAssembler<S>,
    results: &mut mpsc::Receiver<RangeOutput>,
    shutdown: &CancellationToken,
    stats: &DispatchStats,
) -> Result<()> {
    while !assembler.is_complete() {
        let RangeOutput { range, result } = tokio::select! {
            () = shutdown.cancelled() => return Err(Error::ServiceShutdown),
            received = results.recv() => received.ok_or_else(|| Error::ChannelError {
                context: "every session sender closed".to_string(),
            })?,
        };
        stats.ranges_received.fetch_add(1, Ordering::Relaxed);
        assembler.accept(range, result.output, result.solution).await?;
        tracing::debug!(%range, written_up_to = assembler.next_index(), "Range assembled");
    }
    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    job: Arc<DispatchJob>,
    allocator: Arc<RangeAllocator>,
    results: mpsc::Sender<RangeOutput>,
    cancel: CancellationToken,
    stats: Arc<DispatchStats>,
) {
    loop {
        let (stream, peer) = tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Failed to accept worker: {e}");
                    continue;
                }
            },
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, "Failed to set TCP_NODELAY: {e}");
        }
        stats.workers_connected.fetch_add(1, Ordering::Relaxed);
        tracing::info!(%peer, "Worker connected");

        let session = serve_worker(
            stream,
            Arc::clone(&job),
            Arc::clone(&allocator),
            results.clone(),
        );
        let cancel = cancel.clone();
        let stats = Arc::clone(&stats);
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                res = session => match res {
                    Ok(ranges) => tracing::info!(%peer, ranges, "Worker finished"),
                    Err(e) => {
                        stats.sessions_failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(%peer, "Worker session failed: {e}");
                    }
                },
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        coordinator::sink::memory::MemorySink,
        engine::{ComputeEngine, EngineFactory, EngineParams, hash::HashEngineFactory},
        worker::{ComputeNode, config::WorkerConfig},
    };
    use core::time::Duration;
    use labelgrid_core::{
        codec::{WireConn, encode_solution},
        types::{BITS_PER_LABEL, OpenParams, PROTOCOL_TOKEN, WorkRange},
    };
    use labelgrid_storage::server::session::LabelFile;
    use tokio::{net::TcpStream, time::timeout};

    const COMMITMENT: Commitment = Commitment([7; 32]);

    fn job(num_labels: u64, first_label: u64) -> DispatchJob {
        DispatchJob {
            commitment: COMMITMENT,
            num_labels,
            first_label,
            default_chunk: 16,
            max_chunk: 32,
        }
    }

    fn expected_labels(start: u64, end: u64, num_labels: u64) -> Vec<u8> {
        let params = EngineParams::for_dataset(0, COMMITMENT, num_labels).unwrap();
        let mut engine = HashEngineFactory::default().init(&params).unwrap();
        engine
            .compute(WorkRange::new(start, end).unwrap())
            .unwrap()
            .output
            .to_vec()
    }

    fn spawn_worker(addr: std::net::SocketAddr, preferred_size: u64, shutdown: &CancellationToken) {
        let mut config = WorkerConfig::new(addr.to_string());
        config.preferred_size = preferred_size;
        config.reconnect_backoff = Duration::from_millis(10);
        let node = ComputeNode::new(config, Arc::new(HashEngineFactory::default()));
        let shutdown = shutdown.clone();
        tokio::spawn(async move { node.run(shutdown).await });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn two_workers_produce_the_whole_dataset_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let workers = CancellationToken::new();
        spawn_worker(addr, 5, &workers);
        spawn_worker(addr, 0, &workers);

        let (sink, summary) = timeout(
            Duration::from_secs(30),
            run_dispatch(listener, job(300, 0), MemorySink::new(16), CancellationToken::new()),
        )
        .await
        .expect("dispatch should finish")
        .unwrap();
        workers.cancel();

        assert_eq!(summary.labels_written, 300);
        assert_eq!(sink.data, expected_labels(0, 300, 300));
        assert_eq!(sink.flushes, 1);

        let params = EngineParams::for_dataset(0, COMMITMENT, 300).unwrap();
        let mut engine = HashEngineFactory::default().init(&params).unwrap();
        let whole = engine.compute(WorkRange::new(0, 300).unwrap()).unwrap();
        assert_eq!(summary.solution, whole.solution);
    }

    #[tokio::test]
    async fn resumed_jobs_only_compute_the_tail() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let workers = CancellationToken::new();
        spawn_worker(addr, 8, &workers);

        let (sink, summary) = timeout(
            Duration::from_secs(30),
            run_dispatch(listener, job(40, 24), MemorySink::new(16), CancellationToken::new()),
        )
        .await
        .expect("dispatch should finish")
        .unwrap();
        workers.cancel();

        assert_eq!(summary.labels_written, 16);
        assert_eq!(sink.data, expected_labels(24, 40, 40));
    }

    #[tokio::test]
    async fn bad_tokens_do_not_disturb_other_workers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(DispatchStats::default());
        let dispatch = tokio::spawn(run_dispatch_with_stats(
            listener,
            job(20, 0),
            MemorySink::new(16),
            CancellationToken::new(),
            Arc::clone(&stats),
        ));

        let mut intruder = WireConn::new(TcpStream::connect(addr).await.unwrap());
        intruder.write_bytes(b"KEY NotAServer!!").await.unwrap();
        intruder.write_u64(4).await.unwrap();
        assert!(intruder.read_u64().await.is_err());

        let workers = CancellationToken::new();
        spawn_worker(addr, 4, &workers);
        let (sink, summary) = timeout(Duration::from_secs(30), dispatch)
            .await
            .expect("dispatch should finish")
            .unwrap()
            .unwrap();
        workers.cancel();

        assert_eq!(summary.labels_written, 20);
        assert_eq!(sink.data, expected_labels(0, 20, 20));
        assert!(stats.sessions_failed.load(Ordering::Relaxed) >= 1);
    }

    #[tokio::test]
    async fn abandoned_ranges_are_reissued() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dispatch = tokio::spawn(run_dispatch(
            listener,
            job(8, 0),
            MemorySink::new(16),
            CancellationToken::new(),
        ));

        // Take a range, then vanish without answering.
        let mut quitter = WireConn::new(TcpStream::connect(addr).await.unwrap());
        quitter.write_bytes(PROTOCOL_TOKEN).await.unwrap();
        quitter.write_u64(8).await.unwrap();
        let _commitment = quitter.read_commitment().await.unwrap();
        assert_eq!(quitter.read_u64().await.unwrap(), 8);
        assert_eq!(quitter.read_u64().await.unwrap(), 0);
        assert_eq!(quitter.read_u64().await.unwrap(), 8);
        drop(quitter);

        let workers = CancellationToken::new();
        spawn_worker(addr, 8, &workers);
        let (sink, summary) = timeout(Duration::from_secs(30), dispatch)
            .await
            .expect("dispatch should finish")
            .unwrap()
            .unwrap();
        workers.cancel();

        assert_eq!(summary.labels_written, 8);
        assert_eq!(sink.data, expected_labels(0, 8, 8));
    }

    #[tokio::test]
    async fn shutdown_abandons_the_job() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let shutdown = CancellationToken::new();
        let dispatch = tokio::spawn(run_dispatch(
            listener,
            job(8, 0),
            MemorySink::new(16),
            shutdown.clone(),
        ));
        shutdown.cancel();
        let res = timeout(Duration::from_secs(5), dispatch).await.unwrap().unwrap();
        assert!(matches!(res, Err(Error::ServiceShutdown)));
    }

    /// Connects without a `ComputeNode` and returns the first range issued.
    async fn manual_worker(addr: std::net::SocketAddr, hint: u64) -> (WireConn<TcpStream>, WorkRange) {
        let mut conn = WireConn::new(TcpStream::connect(addr).await.unwrap());
        conn.write_bytes(PROTOCOL_TOKEN).await.unwrap();
        conn.write_u64(hint).await.unwrap();
        let _commitment = conn.read_commitment().await.unwrap();
        let _num_labels = conn.read_u64().await.unwrap();
        let range = read_range(&mut conn).await;
        (conn, range)
    }

    async fn read_range(conn: &mut WireConn<TcpStream>) -> WorkRange {
        let start = conn.read_u64().await.unwrap();
        let end = conn.read_u64().await.unwrap();
        WorkRange::new(start, end).unwrap()
    }

    async fn answer(conn: &mut WireConn<TcpStream>, range: WorkRange, num_labels: u64) {
        let params = EngineParams::for_dataset(0, COMMITMENT, num_labels).unwrap();
        let mut engine = HashEngineFactory::default().init(&params).unwrap();
        let result = engine.compute(range).unwrap();
        conn.write_u64(encode_solution(result.solution).unwrap())
            .await
            .unwrap();
        conn.write_bytes(&result.output).await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_persists_the_contiguous_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let params = OpenParams::new(dir.path(), 0, BITS_PER_LABEL);
        let file = LabelFile::open(&params, 1 << 20).await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let stats = Arc::new(DispatchStats::default());
        let dispatch = tokio::spawn(run_dispatch_with_stats(
            listener,
            job(12, 0),
            file,
            shutdown.clone(),
            Arc::clone(&stats),
        ));

        // First worker finishes [0, 4) and takes [4, 8) without answering.
        let (mut first, range) = manual_worker(addr, 4).await;
        assert_eq!(range, WorkRange::new(0, 4).unwrap());
        answer(&mut first, range, 12).await;
        assert_eq!(read_range(&mut first).await, WorkRange::new(4, 8).unwrap());

        // Second worker finishes [8, 12), which cannot be written yet.
        let (mut second, range) = manual_worker(addr, 4).await;
        assert_eq!(range, WorkRange::new(8, 12).unwrap());
        answer(&mut second, range, 12).await;

        timeout(Duration::from_secs(5), async {
            while stats.ranges_received.load(Ordering::Relaxed) < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("both results should reach the assembler");

        shutdown.cancel();
        let res = timeout(Duration::from_secs(5), dispatch).await.unwrap().unwrap();
        assert!(matches!(res, Err(Error::ServiceShutdown)));

        let on_disk = tokio::fs::read(params.file_path()).await.unwrap();
        assert_eq!(on_disk, expected_labels(0, 4, 12));
    }

    #[tokio::test]
    async fn already_complete_jobs_just_flush() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (sink, summary) =
            run_dispatch(listener, job(8, 8), MemorySink::new(16), CancellationToken::new())
                .await
                .unwrap();
        assert_eq!(summary.labels_written, 0);
        assert_eq!(sink.flushes, 1);
    }
}
