//! The service's single session slot.
//!
//! The storage service holds at most one [`LabelFile`] at a time. The slot is
//! an async mutex, so every RPC that touches the session is serialised behind
//! it, including slow disk operations.

use crate::server::session::LabelFile;
use labelgrid_core::{Error, Result, types::OpenParams};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct SessionSlot {
    inner: Mutex<Option<LabelFile>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a freshly opened file, closing any previous session first.
    ///
    /// Closing the previous session is best effort: a failure is logged and
    /// does not prevent the new session from opening. If the new file cannot
    /// be opened the slot is left empty.
    pub async fn open(&self, params: &OpenParams, buffer_capacity: usize) -> Result<()> {
        let mut slot = self.inner.lock().await;
        if let Some(previous) = slot.take() {
            let path = previous.path().to_path_buf();
            if let Err(e) = previous.close().await {
                tracing::warn!(path = %path.display(), "Failed to close replaced session: {e}");
            } else {
                tracing::info!(path = %path.display(), "Replaced open session");
            }
        }
        *slot = Some(LabelFile::open(params, buffer_capacity).await?);
        Ok(())
    }

    /// Locks the slot and returns the live session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveSession`] if nothing has been opened.
    pub async fn session(&self) -> Result<MappedMutexGuard<'_, LabelFile>> {
        MutexGuard::try_map(self.inner.lock().await, Option::as_mut)
            .map_err(|_| Error::NoActiveSession)
    }

    /// Closes the live session and empties the slot.
    pub async fn close(&self) -> Result<()> {
        let file = self
            .inner
            .lock()
            .await
            .take()
            .ok_or(Error::NoActiveSession)?;
        file.close().await
    }

    /// Closes the live session if there is one.
    pub async fn close_if_open(&self) -> Result<()> {
        match self.close().await {
            Err(Error::NoActiveSession) => Ok(()),
            res => res,
        }
    }

    pub async fn is_open(&self) -> bool {
        self.inner.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn operations_without_open_fail() {
        let slot = SessionSlot::new();
        assert!(matches!(slot.session().await, Err(Error::NoActiveSession)));
        assert!(matches!(slot.close().await, Err(Error::NoActiveSession)));
        assert!(slot.close_if_open().await.is_ok());
    }

    #[tokio::test]
    async fn open_replaces_and_flushes_previous_session() {
        let dir = tempfile::tempdir().unwrap();
        let slot = SessionSlot::new();

        slot.open(&OpenParams::new(dir.path(), 0, 8), 64).await.unwrap();
        slot.session().await.unwrap().write(b"first").await.unwrap();

        slot.open(&OpenParams::new(dir.path(), 1, 8), 64).await.unwrap();
        let first = tokio::fs::read(dir.path().join("postdata_0.bin")).await.unwrap();
        assert_eq!(first, b"first");

        let session = slot.session().await.unwrap();
        assert!(session.path().ends_with("postdata_1.bin"));
    }

    #[tokio::test]
    async fn close_empties_the_slot() {
        let dir = tempfile::tempdir().unwrap();
        let slot = SessionSlot::new();

        slot.open(&OpenParams::new(dir.path(), 0, 8), 64).await.unwrap();
        assert!(slot.is_open().await);
        slot.close().await.unwrap();
        assert!(!slot.is_open().await);
    }

    #[tokio::test]
    async fn failed_open_leaves_slot_empty() {
        let dir = tempfile::tempdir().unwrap();
        let slot = SessionSlot::new();

        slot.open(&OpenParams::new(dir.path(), 0, 8), 64).await.unwrap();
        assert!(slot.open(&OpenParams::new(dir.path(), 0, 0), 64).await.is_err());
        assert!(!slot.is_open().await);
    }
}
