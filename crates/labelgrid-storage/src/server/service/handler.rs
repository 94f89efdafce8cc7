//! gRPC service implementation for remote append-only label files.
//!
//! [`LabelStoreService`] implements the [`LabelStore`] service from
//! `proto/labelstore.proto` on top of a single [`SessionSlot`]. `Open` binds
//! the slot; every other call operates on the bound [`LabelFile`] and fails
//! with `FAILED_PRECONDITION` when nothing is open.
//!
//! [`LabelFile`]: crate::server::session::LabelFile

use crate::server::{
    config::ServerConfig,
    metrics::{
        increment_request_errors, increment_sessions_opened, record_flush_duration, record_write,
    },
    registry::SessionSlot,
};
use labelgrid_core::{
    Error, Result,
    proto::{
        Ack, CloseRequest, FlushRequest, NumLabelsWrittenRequest, NumLabelsWrittenResponse,
        OpenRequest, TruncateRequest, WriteRequest,
        label_store_server::{LabelStore, LabelStoreServer},
    },
    types::OpenParams,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, codec::CompressionEncoding};

/// gRPC service that exposes one label file at a time.
#[derive(Clone)]
pub struct LabelStoreService {
    config: ServerConfig,
    slot: Arc<SessionSlot>,
    shutdown_token: CancellationToken,
}

impl LabelStoreService {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            slot: Arc::new(SessionSlot::new()),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Wraps the service in its generated server, accepting compressed
    /// requests and capping decoded message size.
    pub fn into_server(self) -> LabelStoreServer<Self> {
        let max_message_bytes = self.config.max_message_bytes;
        LabelStoreServer::new(self)
            .accept_compressed(CompressionEncoding::Zstd)
            .accept_compressed(CompressionEncoding::Gzip)
            .max_decoding_message_size(max_message_bytes)
    }

    /// Refuses new requests and closes the live session, flushing and
    /// syncing it to disk.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Refusing new requests");
        self.shutdown_token.cancel();
        self.slot.close_if_open().await
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }
        Ok(())
    }
}

fn reject(err: Error) -> Status {
    increment_request_errors();
    tracing::warn!("Request failed: {err}");
    err.into()
}

#[tonic::async_trait]
impl LabelStore for LabelStoreService {
    #[tracing::instrument(skip_all, fields(file_index = req.get_ref().file_index))]
    async fn open(&self, req: Request<OpenRequest>) -> std::result::Result<Response<Ack>, Status> {
        self.ensure_running().map_err(reject)?;
        let OpenRequest {
            data_dir,
            file_index,
            bits_per_label,
        } = req.into_inner();
        let params = OpenParams::new(data_dir, file_index, bits_per_label);

        self.slot
            .open(&params, self.config.write_buffer_bytes)
            .await
            .map_err(reject)?;

        increment_sessions_opened();
        tracing::info!(
            path = %params.file_path().display(),
            bits_per_label,
            "Opened session"
        );
        Ok(Response::new(Ack {}))
    }

    async fn write(
        &self,
        req: Request<WriteRequest>,
    ) -> std::result::Result<Response<Ack>, Status> {
        self.ensure_running().map_err(reject)?;
        let data = req.into_inner().data;

        let mut session = self.slot.session().await.map_err(reject)?;
        session.write(&data).await.map_err(reject)?;

        record_write(data.len() as u64);
        Ok(Response::new(Ack {}))
    }

    #[tracing::instrument(skip_all)]
    async fn flush(
        &self,
        _req: Request<FlushRequest>,
    ) -> std::result::Result<Response<Ack>, Status> {
        self.ensure_running().map_err(reject)?;
        let start = std::time::Instant::now();

        let mut session = self.slot.session().await.map_err(reject)?;
        session.flush().await.map_err(reject)?;

        record_flush_duration(start.elapsed().as_secs_f64() * 1000.0);
        Ok(Response::new(Ack {}))
    }

    async fn num_labels_written(
        &self,
        _req: Request<NumLabelsWrittenRequest>,
    ) -> std::result::Result<Response<NumLabelsWrittenResponse>, Status> {
        self.ensure_running().map_err(reject)?;

        let session = self.slot.session().await.map_err(reject)?;
        let num_labels = session.num_labels_written().await.map_err(reject)?;

        Ok(Response::new(NumLabelsWrittenResponse { num_labels }))
    }

    #[tracing::instrument(skip_all, fields(num_labels = req.get_ref().num_labels))]
    async fn truncate(
        &self,
        req: Request<TruncateRequest>,
    ) -> std::result::Result<Response<Ack>, Status> {
        self.ensure_running().map_err(reject)?;
        let num_labels = req.into_inner().num_labels;

        let mut session = self.slot.session().await.map_err(reject)?;
        session.truncate(num_labels).await.map_err(reject)?;

        tracing::info!(num_labels, "Truncated session");
        Ok(Response::new(Ack {}))
    }

    #[tracing::instrument(skip_all)]
    async fn close(
        &self,
        _req: Request<CloseRequest>,
    ) -> std::result::Result<Response<Ack>, Status> {
        self.ensure_running().map_err(reject)?;
        self.slot.close().await.map_err(reject)?;

        tracing::info!("Closed session");
        Ok(Response::new(Ack {}))
    }
}
