//! # Shared Label Types and Constants
//!
//! Types that both protocols agree on: the 32-byte [`Commitment`], the
//! half-open [`WorkRange`], the [`ComputeResult`] returned by a compute
//! engine, the parameters used to open a remote label file, and the size
//! arithmetic for bit-packed label files.
//!
//! ## Label geometry
//!
//! A label file holds labels packed contiguously at `bits_per_label` bits
//! each. The dispatch protocol itself never transmits the label size: both
//! ends use [`BITS_PER_LABEL`], so the byte length of a range's output is
//! implied by the range alone (see [`WorkRange::output_len`]).

use crate::{Error, Result};
use core::fmt;
use std::path::PathBuf;

/// Size of a commitment on the wire.
pub const COMMITMENT_SIZE: usize = 32;

/// Label size used by the dispatch protocol.
pub const BITS_PER_LABEL: u32 = 128;

/// Identification token a worker sends first on every connection.
pub const PROTOCOL_TOKEN: &[u8; 16] = b"KEY ScryptServer";

/// Scrypt cost parameter the compute engine is initialised with.
pub const SCRYPT_N: u32 = 8192;

// Range outputs are concatenated by the coordinator, which is only valid when
// every label ends on a byte boundary.
const _: () = assert!(BITS_PER_LABEL % 8 == 0);

/// Identifies the storage commitment labels are computed for.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Commitment(pub [u8; COMMITMENT_SIZE]);

impl Commitment {
    pub const fn as_bytes(&self) -> &[u8; COMMITMENT_SIZE] {
        &self.0
    }

    /// Builds a commitment from a slice that must be exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; COMMITMENT_SIZE] = bytes.try_into().map_err(|_| {
            Error::protocol(format!(
                "invalid commitment length; expected: {COMMITMENT_SIZE}, given: {}",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commitment({self})")
    }
}

/// A half-open interval `[start, end)` of label indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkRange {
    pub start: u64,
    pub end: u64,
}

impl WorkRange {
    /// Creates a range, rejecting `end < start`.
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if end < start {
            return Err(Error::protocol(format!(
                "invalid range; expected: start <= end, given: [{start}, {end})"
            )));
        }
        Ok(Self { start, end })
    }

    pub const fn len(&self) -> u64 {
        self.end - self.start
    }

    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub const fn contains(&self, index: u64) -> bool {
        self.start <= index && index < self.end
    }

    /// Number of output bytes a compute engine produces for this range.
    pub fn output_len(&self) -> Result<usize> {
        let bytes = packed_len(self.len(), BITS_PER_LABEL)?;
        usize::try_from(bytes)
            .map_err(|_| Error::protocol(format!("range output of {bytes} bytes is too large")))
    }
}

impl fmt::Display for WorkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// The outcome of computing one [`WorkRange`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComputeResult {
    /// Packed label output for the whole range.
    pub output: bytes::Bytes,
    /// An index in the range whose value satisfies the difficulty target.
    pub solution: Option<u64>,
}

/// Identifies a label file on the storage service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenParams {
    pub data_dir: PathBuf,
    pub file_index: u32,
    pub bits_per_label: u32,
}

impl OpenParams {
    pub fn new(data_dir: impl Into<PathBuf>, file_index: u32, bits_per_label: u32) -> Self {
        Self {
            data_dir: data_dir.into(),
            file_index,
            bits_per_label,
        }
    }

    /// Full path of the label file inside the data directory.
    pub fn file_path(&self) -> PathBuf {
        self.data_dir.join(init_file_name(self.file_index))
    }
}

/// Name of the `index`-th label file in a data directory.
pub fn init_file_name(index: u32) -> String {
    format!("postdata_{index}.bin")
}

/// Bytes needed to hold `num_labels` labels of `bits_per_label` bits, rounded
/// up to a whole byte.
pub fn packed_len(num_labels: u64, bits_per_label: u32) -> Result<u64> {
    let bits = num_labels
        .checked_mul(u64::from(bits_per_label))
        .ok_or_else(|| {
            Error::invalid_argument(format!(
                "{num_labels} labels of {bits_per_label} bits overflow a 64-bit bit count"
            ))
        })?;
    Ok(bits.div_ceil(8))
}

/// Number of complete labels stored in `file_size` bytes. Trailing bits that
/// do not form a whole label are ignored. Counts that do not fit in a `u64`
/// (sub-byte labels in a file above 2 EiB) saturate.
pub fn labels_in(file_size: u64, bits_per_label: u32) -> u64 {
    debug_assert!(bits_per_label > 0);
    let labels = (u128::from(file_size) * 8) / u128::from(bits_per_label);
    u64::try_from(labels).unwrap_or(u64::MAX)
}
