//! Fixed-width binary encoding for the work-dispatch protocol.
//!
//! The dispatch protocol is a plain sequence of fixed-width fields: 64-bit
//! little-endian integers and fixed-size byte arrays with no length prefix.
//! There is no message framing, so both ends must agree on the exact order of
//! fields. [`WireConn`] wraps any async byte stream with typed read and write
//! operations for those fields.
//!
//! ## Failure modes
//!
//! - A read that cannot fill the exact byte count fails with
//!   [`Error::IncompleteRead`]. A peer closing the connection surfaces this
//!   way.
//! - A write or flush that cannot complete fails with [`Error::WriteFailure`].
//!
//! ## Solution sentinel
//!
//! The optional solution index is encoded as [`NO_SOLUTION`] (`u64::MAX`) when
//! absent. [`encode_solution`] and [`decode_solution`] are the only places the
//! sentinel is handled; everything above the codec works with `Option<u64>`.
//! A real index equal to the sentinel cannot be represented and is rejected
//! by the encoder.

use crate::{Error, Result, types::Commitment, types::COMMITMENT_SIZE};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of an encoded integer field.
pub const U64_SIZE: usize = core::mem::size_of::<u64>();

/// Wire value meaning "no solution found in this range".
pub const NO_SOLUTION: u64 = u64::MAX;

pub const fn encode_u64_le(value: u64) -> [u8; U64_SIZE] {
    value.to_le_bytes()
}

/// Decodes an integer field from exactly eight bytes.
pub fn decode_u64_le(bytes: &[u8]) -> Result<u64> {
    let array: [u8; U64_SIZE] = bytes.try_into().map_err(|_| {
        Error::protocol(format!(
            "invalid integer field length; expected: {U64_SIZE}, given: {}",
            bytes.len()
        ))
    })?;
    Ok(u64::from_le_bytes(array))
}

/// Translates an optional solution index to its wire value.
pub fn encode_solution(solution: Option<u64>) -> Result<u64> {
    match solution {
        None => Ok(NO_SOLUTION),
        Some(NO_SOLUTION) => Err(Error::protocol(
            "solution index collides with the no-solution sentinel",
        )),
        Some(index) => Ok(index),
    }
}

/// Translates a wire value back to an optional solution index.
pub const fn decode_solution(value: u64) -> Option<u64> {
    if value == NO_SOLUTION {
        None
    } else {
        Some(value)
    }
}

/// Typed field access over a raw byte stream.
#[derive(Debug)]
pub struct WireConn<S> {
    inner: S,
}

impl<S> WireConn<S> {
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }

    pub const fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> WireConn<S> {
    /// Reads exactly `buf.len()` bytes.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let expected = buf.len();
        self.inner
            .read_exact(buf)
            .await
            .map(|_| ())
            .map_err(|e| Error::IncompleteRead {
                expected,
                source: Arc::new(e),
            })
    }

    pub async fn read_u64(&mut self) -> Result<u64> {
        let buf = self.read_array::<U64_SIZE>().await?;
        Ok(u64::from_le_bytes(buf))
    }

    pub async fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0_u8; N];
        self.read_exact(&mut buf).await?;
        Ok(buf)
    }

    pub async fn read_commitment(&mut self) -> Result<Commitment> {
        self.read_array::<COMMITMENT_SIZE>().await.map(Commitment)
    }

    /// Reads a field whose length both ends derive independently.
    pub async fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        let mut buf = BytesMut::zeroed(len);
        self.read_exact(&mut buf).await?;
        Ok(buf.freeze())
    }
}

impl<S: AsyncWrite + Unpin> WireConn<S> {
    pub async fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner
            .write_all(bytes)
            .await
            .map_err(|e| Error::WriteFailure {
                source: Arc::new(e),
            })
    }

    pub async fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_bytes(&encode_u64_le(value)).await
    }

    /// Pushes buffered fields to the peer. Call at the end of each message
    /// group when the stream is buffered.
    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await.map_err(|e| Error::WriteFailure {
            source: Arc::new(e),
        })
    }
}
