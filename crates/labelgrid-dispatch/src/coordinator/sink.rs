//! Destinations for assembled label output.

use bytes::Bytes;
use core::future::Future;
use labelgrid_core::Result;
use labelgrid_storage::{client::RemoteLabelsWriter, server::session::LabelFile};

/// An append-only label file, local or remote.
pub trait LabelSink: Send {
    /// Appends packed labels.
    fn write_labels(&mut self, labels: Bytes) -> impl Future<Output = Result<()>> + Send;

    /// Makes every appended byte durable as far as the sink allows.
    fn flush(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn num_labels_written(&mut self) -> impl Future<Output = Result<u64>> + Send;

    fn truncate(&mut self, num_labels: u64) -> impl Future<Output = Result<()>> + Send;

    fn close(self) -> impl Future<Output = Result<()>> + Send
    where
        Self: Sized;
}

impl LabelSink for RemoteLabelsWriter {
    async fn write_labels(&mut self, labels: Bytes) -> Result<()> {
        self.write(labels).await
    }

    async fn flush(&mut self) -> Result<()> {
        RemoteLabelsWriter::flush(self).await
    }

    async fn num_labels_written(&mut self) -> Result<u64> {
        RemoteLabelsWriter::num_labels_written(self).await
    }

    async fn truncate(&mut self, num_labels: u64) -> Result<()> {
        RemoteLabelsWriter::truncate(self, num_labels).await
    }

    async fn close(self) -> Result<()> {
        RemoteLabelsWriter::close(self).await
    }
}

impl LabelSink for LabelFile {
    async fn write_labels(&mut self, labels: Bytes) -> Result<()> {
        self.write(&labels).await
    }

    async fn flush(&mut self) -> Result<()> {
        LabelFile::flush(self).await
    }

    async fn num_labels_written(&mut self) -> Result<u64> {
        LabelFile::num_labels_written(self).await
    }

    async fn truncate(&mut self, num_labels: u64) -> Result<()> {
        LabelFile::truncate(self, num_labels).await
    }

    async fn close(self) -> Result<()> {
        LabelFile::close(self).await
    }
}

/// Drops any partial label at the end of `sink` and returns the index to
/// resume from, clamped to `num_labels`.
pub async fn resume_point<S: LabelSink>(sink: &mut S, num_labels: u64) -> Result<u64> {
    let written = sink.num_labels_written().await?.min(num_labels);
    sink.truncate(written).await?;
    if written > 0 {
        tracing::info!(written, num_labels, "Resuming from existing labels");
    }
    Ok(written)
}

#[cfg(test)]
pub(crate) mod memory {
    use super::*;

    /// Collects labels in memory.
    #[derive(Debug, Default)]
    pub struct MemorySink {
        pub data: Vec<u8>,
        pub flushes: usize,
        pub label_bytes: usize,
    }

    impl MemorySink {
        pub fn new(label_bytes: usize) -> Self {
            Self {
                label_bytes,
                ..Self::default()
            }
        }
    }

    impl LabelSink for MemorySink {
        async fn write_labels(&mut self, labels: Bytes) -> Result<()> {
            self.data.extend_from_slice(&labels);
            Ok(())
        }

        async fn flush(&mut self) -> Result<()> {
            self.flushes += 1;
            Ok(())
        }

        async fn num_labels_written(&mut self) -> Result<u64> {
            Ok((self.data.len() / self.label_bytes) as u64)
        }

        async fn truncate(&mut self, num_labels: u64) -> Result<()> {
            self.data.truncate(num_labels as usize * self.label_bytes);
            Ok(())
        }

        async fn close(self) -> Result<()> {
            Ok(())
        }
    }
}
