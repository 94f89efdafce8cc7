//! A single open label file.
//!
//! [`LabelFile`] owns an append-mode file handle behind a write buffer. Bytes
//! reach the file when the buffer fills up or on [`LabelFile::flush`]; label
//! counts and truncation always operate on the on-disk size.
//!
//! The file is opened with `O_APPEND`, so writes that follow a truncation
//! land at the new end of the file rather than at the old write offset.

use labelgrid_core::{
    Error, Result,
    types::{OpenParams, labels_in},
};
use std::path::{Path, PathBuf};
use tokio::{
    fs::{DirBuilder, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
};

#[cfg(unix)]
const DIR_MODE: u32 = 0o700;
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// The storage state bound by a successful `Open`.
#[derive(Debug)]
pub struct LabelFile {
    path: PathBuf,
    writer: BufWriter<File>,
    bits_per_label: u32,
}

impl LabelFile {
    /// Creates the data directory if needed and opens the label file for
    /// appending, creating it when absent.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] when `bits_per_label` is zero.
    /// - [`Error::Io`] when the directory or the file cannot be created.
    pub async fn open(params: &OpenParams, buffer_capacity: usize) -> Result<Self> {
        if params.bits_per_label == 0 {
            return Err(Error::invalid_argument("bits_per_label must be greater than 0"));
        }

        let mut dir = DirBuilder::new();
        dir.recursive(true);
        #[cfg(unix)]
        dir.mode(DIR_MODE);
        dir.create(&params.data_dir).await.map_err(|e| {
            Error::io(format!("create directory {}", params.data_dir.display()), e)
        })?;

        let path = params.file_path();
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(FILE_MODE);
        let file = options
            .open(&path)
            .await
            .map_err(|e| Error::io(format!("open {}", path.display()), e))?;

        tracing::debug!(path = %path.display(), bits_per_label = params.bits_per_label, "Opened label file");

        Ok(Self {
            path,
            writer: BufWriter::with_capacity(buffer_capacity.max(1), file),
            bits_per_label: params.bits_per_label,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn bits_per_label(&self) -> u32 {
        self.bits_per_label
    }

    /// Appends `data` to the write buffer.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer
            .write_all(data)
            .await
            .map_err(|e| Error::io("write", e))
    }

    /// Forces buffered bytes to the file.
    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await.map_err(|e| Error::io("flush", e))
    }

    /// Number of whole labels in the file on disk. Buffered bytes are not
    /// counted.
    pub async fn num_labels_written(&self) -> Result<u64> {
        let metadata = self
            .writer
            .get_ref()
            .metadata()
            .await
            .map_err(|e| Error::io("stat", e))?;
        Ok(labels_in(metadata.len(), self.bits_per_label))
    }

    /// Cuts the file to exactly `num_labels` labels and syncs it.
    ///
    /// The request is validated before anything is touched: a failed
    /// truncation leaves both the buffer and the file as they were.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the bit size overflows or does not end
    ///   on a byte boundary.
    /// - [`Error::Io`] if flushing, resizing or syncing fails.
    pub async fn truncate(&mut self, num_labels: u64) -> Result<()> {
        let bit_size = num_labels
            .checked_mul(u64::from(self.bits_per_label))
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "{num_labels} labels of {} bits overflow a 64-bit bit count",
                    self.bits_per_label
                ))
            })?;
        if bit_size % 8 != 0 {
            return Err(Error::invalid_argument(format!(
                "{num_labels} labels of {} bits is {bit_size} bits, which is not byte aligned",
                self.bits_per_label
            )));
        }

        self.flush().await?;
        let file = self.writer.get_ref();
        file.set_len(bit_size / 8)
            .await
            .map_err(|e| Error::io("truncate", e))?;
        file.sync_all().await.map_err(|e| Error::io("sync", e))?;

        tracing::debug!(path = %self.path.display(), num_labels, "Truncated label file");
        Ok(())
    }

    /// Flushes, syncs and releases the file.
    pub async fn close(mut self) -> Result<()> {
        self.flush().await?;
        self.writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|e| Error::io("sync", e))?;
        tracing::debug!(path = %self.path.display(), "Closed label file");
        Ok(())
    }
}
