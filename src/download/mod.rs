//! Blob downloads: range planning, chunked transfer, whole-image fan-out

pub mod chunked;
pub mod parallel;
pub mod ranges;

pub use chunked::ChunkedDownloader;
pub use parallel::{LayerDownloader, layer_path};
pub use ranges::{ByteRange, ChunkPolicy, split_ranges};

use crate::error::{RegistryError, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// `sha256:<hex>` of a file, read in 64 KiB blocks
pub async fn file_digest(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

/// Checks a downloaded file against its `sha256:` digest. Other algorithms are not checked.
pub async fn verify_file_digest(path: &Path, expected: &str) -> Result<()> {
    if !expected.starts_with("sha256:") {
        return Ok(());
    }
    let actual = file_digest(path).await?;
    if actual != expected {
        return Err(RegistryError::DigestMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
