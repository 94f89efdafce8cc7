//! Asynchronous writer for a remote label file.
//!
//! [`RemoteLabelsWriter`] decouples label producers from storage latency.
//! `write` places a buffer on a bounded queue and returns immediately unless
//! the queue is full; a single background task drains the queue and issues
//! one remote `Write` per buffer, strictly in the order they were enqueued.
//!
//! ## Sticky error
//!
//! The first remote failure is recorded and returned by every later
//! `write`, `flush` and `close`. After a failure the drain task keeps
//! accepting buffers, so producers never deadlock on a full queue, but it
//! stops sending them: a later write landing after a lost one would corrupt
//! the append order.
//!
//! Buffers larger than [`MAX_WRITE_CHUNK_BYTES`] are sent as several
//! consecutive `Write` calls so no single request approaches the service's
//! message size limit. A buffer is acknowledged once all of its pieces are.
//!
//! ## Flush
//!
//! `flush` waits until every buffer enqueued before the call has been
//! acknowledged, reports the sticky error if one was recorded, then asks the
//! service to force its own buffer to disk.

use bytes::Bytes;
use labelgrid_core::{
    Error, Result,
    proto::{
        CloseRequest, FlushRequest, NumLabelsWrittenRequest, OpenRequest, TruncateRequest,
        WriteRequest, label_store_client::LabelStoreClient,
    },
    types::OpenParams,
};
use std::sync::{Arc, OnceLock};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tonic::transport::Channel;

/// Number of buffers that may wait for transmission before `write` blocks.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Largest payload carried by a single remote `Write`.
pub const MAX_WRITE_CHUNK_BYTES: usize = 4 << 20;

/// Environment variable holding the storage service address.
pub const REMOTE_ADDR_ENV: &str = "REMOTE_ADDR";

type StickyError = Arc<OnceLock<Error>>;

/// Streams label bytes to a remote label file.
pub struct RemoteLabelsWriter {
    client: LabelStoreClient<Channel>,
    queue: mpsc::Sender<Bytes>,
    acked: watch::Receiver<u64>,
    enqueued: u64,
    error: StickyError,
    drain: JoinHandle<()>,
}

impl RemoteLabelsWriter {
    /// Connects to `endpoint` and opens the label file described by `params`.
    pub async fn connect(endpoint: impl Into<String>, params: OpenParams) -> Result<Self> {
        Self::connect_with_capacity(endpoint, params, DEFAULT_QUEUE_CAPACITY).await
    }

    /// Like [`connect`](Self::connect), reading the address from
    /// `REMOTE_ADDR`.
    pub async fn connect_from_env(params: OpenParams) -> Result<Self> {
        let addr = std::env::var(REMOTE_ADDR_ENV)
            .map_err(|_| Error::invalid_argument(format!("{REMOTE_ADDR_ENV} is not set")))?;
        Self::connect(endpoint_uri(&addr), params).await
    }

    /// Connects with a custom queue capacity.
    pub async fn connect_with_capacity(
        endpoint: impl Into<String>,
        params: OpenParams,
        capacity: usize,
    ) -> Result<Self> {
        let endpoint = endpoint.into();
        let mut client = LabelStoreClient::connect(endpoint.clone()).await?;
        client
            .open(OpenRequest {
                data_dir: params.data_dir.display().to_string(),
                file_index: params.file_index,
                bits_per_label: params.bits_per_label,
            })
            .await?;

        tracing::info!(
            %endpoint,
            path = %params.file_path().display(),
            "Opened remote label file"
        );

        let (queue, rx) = mpsc::channel(capacity.max(1));
        let (acked_tx, acked) = watch::channel(0);
        let error = StickyError::default();
        let drain = tokio::spawn(drain_writes(
            client.clone(),
            rx,
            acked_tx,
            Arc::clone(&error),
        ));

        Ok(Self {
            client,
            queue,
            acked,
            enqueued: 0,
            error,
            drain,
        })
    }

    /// Queues `data` for transmission.
    ///
    /// Blocks only while the queue is full. Cancelling a blocked call
    /// enqueues nothing.
    ///
    /// # Errors
    ///
    /// Returns the sticky error if a previous write failed, whether the
    /// failure was recorded before or during this call.
    pub async fn write(&mut self, data: impl Into<Bytes>) -> Result<()> {
        self.check()?;
        let permit = self
            .queue
            .reserve()
            .await
            .map_err(|_| Error::ChannelError {
                context: "remote write queue closed".to_string(),
            })?;
        permit.send(data.into());
        self.enqueued += 1;
        self.check()
    }

    /// Waits for every queued buffer to be acknowledged, then flushes the
    /// remote file.
    pub async fn flush(&mut self) -> Result<()> {
        self.drain().await?;
        self.check()?;
        self.client.flush(FlushRequest {}).await?;
        Ok(())
    }

    /// Number of labels in the remote file, counted after the queue drains.
    pub async fn num_labels_written(&mut self) -> Result<u64> {
        self.drain().await?;
        let res = self
            .client
            .num_labels_written(NumLabelsWrittenRequest {})
            .await?;
        Ok(res.into_inner().num_labels)
    }

    /// Truncates the remote file to `num_labels` labels once the queue
    /// drains.
    pub async fn truncate(&mut self, num_labels: u64) -> Result<()> {
        self.drain().await?;
        self.client.truncate(TruncateRequest { num_labels }).await?;
        Ok(())
    }

    /// Drains the queue and closes the remote file.
    pub async fn close(mut self) -> Result<()> {
        self.drain().await?;
        self.check()?;
        self.client.close(CloseRequest {}).await?;

        let Self { queue, drain, .. } = self;
        drop(queue);
        drain.await.map_err(|e| Error::ChannelError {
            context: format!("drain task failed: {e}"),
        })?;
        Ok(())
    }

    /// The recorded sticky error, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.get()
    }

    fn check(&self) -> Result<()> {
        match self.error.get() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn drain(&mut self) -> Result<()> {
        let target = self.enqueued;
        self.acked
            .wait_for(|&acked| acked >= target)
            .await
            .map(|_| ())
            .map_err(|_| Error::ChannelError {
                context: "drain task stopped".to_string(),
            })
    }
}

async fn drain_writes(
    mut client: LabelStoreClient<Channel>,
    mut rx: mpsc::Receiver<Bytes>,
    acked: watch::Sender<u64>,
    error: StickyError,
) {
    while let Some(data) = rx.recv().await {
        if error.get().is_none() {
            let len = data.len();
            if let Err(err) = send_in_chunks(&mut client, data).await {
                tracing::error!(len, "Remote write failed: {err}");
                let _ = error.set(err);
            }
        }
        acked.send_modify(|count| *count += 1);
    }
}

async fn send_in_chunks(client: &mut LabelStoreClient<Channel>, mut data: Bytes) -> Result<()> {
    loop {
        let chunk = data.split_to(data.len().min(MAX_WRITE_CHUNK_BYTES));
        client.write(WriteRequest { data: chunk }).await?;
        if data.is_empty() {
            return Ok(());
        }
    }
}

/// Prefixes a bare `host:port` with `http://`.
pub fn endpoint_uri(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    }
}
