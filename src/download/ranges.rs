//! Byte-range partitioning for chunked blob downloads

use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};

/// Blobs smaller than this are fetched with a single request
pub const DEFAULT_SIZE_FLOOR: u64 = 10 * 1024 * 1024;
pub const DEFAULT_FAN_OUT: usize = 5;

/// How a blob is split into concurrent range requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPolicy {
    /// Minimum bytes per range
    pub size_floor: u64,
    /// Maximum number of ranges per blob
    pub fan_out: usize,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            size_floor: DEFAULT_SIZE_FLOOR,
            fan_out: DEFAULT_FAN_OUT,
        }
    }
}

impl ChunkPolicy {
    pub fn new(size_floor: u64, fan_out: usize) -> Self {
        Self { size_floor, fan_out }
    }

    pub fn validate(&self) -> Result<()> {
        if self.size_floor == 0 {
            return Err(RegistryError::Config("chunk size floor must be positive".to_string()));
        }
        if self.fan_out == 0 {
            return Err(RegistryError::Config("chunk fan-out must be positive".to_string()));
        }
        Ok(())
    }
}

/// Inclusive byte range `[start, end]` written to part file `index`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Range` header value, `bytes=<start>-<end>`
    pub fn header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Splits `[0, length)` into contiguous ranges.
///
/// Below the floor the blob is one range. Above it, the step is
/// `max(length / fan_out, floor)`, at most `fan_out` ranges are produced and
/// the last one absorbs the remainder. A zero-length blob has no ranges.
pub fn split_ranges(length: u64, policy: &ChunkPolicy) -> Vec<ByteRange> {
    if length == 0 {
        return Vec::new();
    }
    let floor = policy.size_floor.max(1);
    if length < floor {
        return vec![ByteRange {
            index: 0,
            start: 0,
            end: length - 1,
        }];
    }

    let fan_out = policy.fan_out.max(1) as u64;
    let step = (length / fan_out).max(floor);
    let count = fan_out.min(length / step).max(1);

    (0..count)
        .map(|i| ByteRange {
            index: i as usize,
            start: i * step,
            end: if i + 1 == count { length - 1 } else { (i + 1) * step - 1 },
        })
        .collect()
}
