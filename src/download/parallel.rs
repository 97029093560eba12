//! Concurrent download of every layer of an image

use super::{ChunkedDownloader, verify_file_digest};
use crate::error::{RegistryError, Result};
use crate::image::Descriptor;
use crate::registry::operations::RegistryEndpoint;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// `<prefix>.<index>.<hex>.tgz`; a digest that is not `<algorithm>:<hex>` is a manifest error
pub fn layer_path(prefix: &str, index: usize, layer: &Descriptor) -> Result<PathBuf> {
    Ok(PathBuf::from(format!("{}.{}.{}.tgz", prefix, index, layer.checked_hex()?)))
}

pub struct LayerDownloader {
    endpoint: RegistryEndpoint,
    chunks: ChunkedDownloader,
    max_concurrent: usize,
}

impl LayerDownloader {
    pub fn new(endpoint: RegistryEndpoint, chunks: ChunkedDownloader, max_concurrent: usize) -> Self {
        Self {
            endpoint,
            chunks,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Downloads all `layers` of `repository`; the first failing layer aborts the others.
    ///
    /// Every layer digest is checked before anything is requested, and every
    /// file is verified against its digest once written. Returns the written
    /// paths in layer order.
    pub async fn download_layers(
        &self,
        repository: &str,
        layers: &[Descriptor],
        prefix: &str,
    ) -> Result<Vec<PathBuf>> {
        let started = Instant::now();
        let total: u64 = layers.iter().map(|layer| layer.size).sum();
        info!(repository, layers = layers.len(), bytes = total, "downloading image layers");

        let targets = layers
            .iter()
            .enumerate()
            .map(|(index, layer)| layer_path(prefix, index, layer))
            .collect::<Result<Vec<_>>>()?;

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        for ((index, layer), target) in layers.iter().cloned().enumerate().zip(targets) {
            let endpoint = self.endpoint.clone();
            let chunks = self.chunks.clone();
            let semaphore = Arc::clone(&semaphore);
            let repository = repository.to_string();

            tasks.spawn(async move {
                let result = async {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| RegistryError::Task(e.to_string()))?;
                    let length = endpoint.blob_length(&repository, &layer.digest).await?;
                    debug!(index, digest = %layer.digest, length, "layer download started");
                    let blob_path = RegistryEndpoint::blob_path(&repository, &layer.digest);
                    chunks.download(&blob_path, length, &target).await?;
                    if let Err(err) = verify_file_digest(&target, &layer.digest).await {
                        warn!(index, digest = %layer.digest, "removing layer that failed verification");
                        let _ = tokio::fs::remove_file(&target).await;
                        return Err(err);
                    }
                    Ok::<_, RegistryError>(target)
                }
                .await;
                result.map(|path| (index, path)).map_err(|source| RegistryError::Layer {
                    index,
                    digest: layer.digest.clone(),
                    source: Box::new(source),
                })
            });
        }

        let mut paths = vec![PathBuf::new(); layers.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((index, path))) => paths[index] = path,
                Ok(Err(err)) => {
                    tasks.shutdown().await;
                    return Err(err);
                }
                Err(err) => {
                    tasks.shutdown().await;
                    return Err(err.into());
                }
            }
        }

        info!(repository, elapsed = ?started.elapsed(), "image layers downloaded");
        Ok(paths)
    }
}
