//! Parallel ranged download of one blob
//!
//! The blob is split with [`split_ranges`], every range is fetched by its own
//! task into `<target>.part<index>`, and the parts are folded back together
//! from the last one down before `part0` is renamed onto the target. The first
//! failing range aborts the rest; part files never outlive the download.

use super::ranges::{ByteRange, ChunkPolicy, split_ranges};
use crate::error::{RegistryError, Result};
use crate::registry::operations::RegistryEndpoint;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct ChunkedDownloader {
    endpoint: RegistryEndpoint,
    policy: ChunkPolicy,
}

impl ChunkedDownloader {
    pub fn new(endpoint: RegistryEndpoint, policy: ChunkPolicy) -> Self {
        Self { endpoint, policy }
    }

    pub fn policy(&self) -> &ChunkPolicy {
        &self.policy
    }

    /// Downloads `blob_path` (`/v2/<name>/blobs/<digest>`) of `total_length` bytes to `target`
    pub async fn download(&self, blob_path: &str, total_length: u64, target: &Path) -> Result<()> {
        let ranges = split_ranges(total_length, &self.policy);
        // Dropped after `tasks`, which aborts the range tasks without joining them.
        // A task aborted inside `File::create` can still create its part once the
        // blocking call returns, after this guard has already cleaned up.
        let parts = PartFiles::new(target, ranges.len().max(1));

        if ranges.is_empty() {
            File::create(parts.path(0)).await?;
            fs::rename(parts.path(0), target).await?;
            parts.disarm();
            return Ok(());
        }

        let started = Instant::now();
        debug!(blob_path, total_length, parts = ranges.len(), "starting chunked download");

        let mut tasks = JoinSet::new();
        for range in ranges {
            let endpoint = self.endpoint.clone();
            let blob_path = blob_path.to_string();
            let path = parts.path(range.index);
            tasks.spawn(async move {
                fetch_part(&endpoint, &blob_path, &range, total_length, &path)
                    .await
                    .map_err(|source| RegistryError::Chunk {
                        index: range.index,
                        source: Box::new(source),
                    })
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(err) => err.into(),
            };
            warn!(blob_path, error = %failure, "aborting chunked download");
            tasks.shutdown().await;
            return Err(failure);
        }
        debug!(blob_path, elapsed = ?started.elapsed(), "all parts downloaded");

        merge_parts(&parts).await?;
        fs::rename(parts.path(0), target).await?;
        parts.disarm();

        info!(
            target = %target.display(),
            bytes = total_length,
            elapsed = ?started.elapsed(),
            "blob downloaded"
        );
        Ok(())
    }
}

async fn fetch_part(
    endpoint: &RegistryEndpoint,
    blob_path: &str,
    range: &ByteRange,
    total_length: u64,
    path: &Path,
) -> Result<()> {
    let mut response = endpoint.get_range(blob_path, range).await?;
    let status = response.status();
    let operation = format!("ranged download {} of {}", range.header(), blob_path);
    let whole_blob = range.start == 0 && range.end + 1 == total_length;

    match status {
        StatusCode::PARTIAL_CONTENT => {}
        StatusCode::OK if whole_blob => {}
        status if status.is_success() => {
            return Err(RegistryError::Status {
                operation,
                status,
                message: "server ignored the Range header".to_string(),
            });
        }
        _ => return Err(RegistryError::from_response(operation, response).await),
    }

    let expected = range.len();
    let mut file = File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        written += chunk.len() as u64;
        if written > expected {
            return Err(RegistryError::Incomplete {
                expected,
                actual: written,
            });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    if written != expected {
        return Err(RegistryError::Incomplete {
            expected,
            actual: written,
        });
    }
    Ok(())
}

/// Appends every part onto its predecessor, highest index first, leaving only part 0
async fn merge_parts(parts: &PartFiles) -> Result<()> {
    for index in (1..parts.count).rev() {
        let current = parts.path(index);
        let mut source = File::open(&current).await?;
        let mut destination = OpenOptions::new()
            .append(true)
            .open(parts.path(index - 1))
            .await?;
        tokio::io::copy(&mut source, &mut destination).await?;
        destination.flush().await?;
        drop(source);
        fs::remove_file(&current).await?;
    }
    Ok(())
}

/// Owns `<target>.part<i>` files and removes them on drop unless disarmed
struct PartFiles {
    prefix: PathBuf,
    count: usize,
    armed: bool,
}

impl PartFiles {
    fn new(target: &Path, count: usize) -> Self {
        Self {
            prefix: target.to_path_buf(),
            count,
            armed: true,
        }
    }

    fn path(&self, index: usize) -> PathBuf {
        let mut name = self.prefix.clone().into_os_string();
        name.push(format!(".part{}", index));
        PathBuf::from(name)
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PartFiles {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for index in 0..self.count {
            let path = self.path(index);
            if std::fs::remove_file(&path).is_ok() {
                debug!(path = %path.display(), "removed part file");
            }
        }
    }
}
