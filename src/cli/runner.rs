//! Executes a parsed command line against a registry

use crate::cli::args::{Args, Command, split_image_reference};
use crate::config::{ClientConfig, ListOptions};
use crate::error::Result;
use crate::registry::{RegistryClient, Repository};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

pub struct Runner {
    args: Args,
}

impl Runner {
    pub fn new(args: Args) -> Self {
        Self { args }
    }

    /// Client configuration derived from the global flags
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.args.registry.clone())
            .with_skip_tls(self.args.skip_tls)
            .with_timeout(self.args.timeout)
            .with_max_concurrency(self.args.concurrency);
        config.username = self.args.username.clone();
        config.password = self.args.password.clone();
        if let Some(size) = self.args.chunk_size {
            config.chunk.size_floor = size;
        }
        config
    }

    pub async fn run(&self) -> Result<()> {
        let started = Instant::now();
        let client = RegistryClient::connect(self.client_config()).await?;

        match &self.args.command {
            Command::Repos {
                start,
                end,
                with_tags,
                stream,
                namespace,
                prefix,
            } => {
                let mut options = ListOptions::new().with_tags(*with_tags).window(*start, *end);
                options.namespace = namespace.clone();
                options.prefix = prefix.clone();
                if *stream {
                    self.stream_repositories(&client, &options).await?;
                } else {
                    for repository in client.repositories(&options).await? {
                        print_repository(&repository, *with_tags);
                    }
                }
            }
            Command::Tags { repository } => {
                for tag in client.tags(repository).await? {
                    println!("{}:{}", repository, tag);
                }
            }
            Command::Image { image } => {
                let (repository, reference) = split_image_reference(image);
                let image = client.image(&repository, &reference).await?;
                println!("Image:    {}", image.full_name());
                if let Some(digest) = &image.digest {
                    println!("Digest:   {}", digest);
                }
                if let Some(created) = image.created() {
                    println!("Created:  {}", created.to_rfc3339());
                }
                println!("Platform: {}/{}", image.config.os, image.config.architecture);
                println!("Size:     {}", image.size());
                for (index, layer) in image.layers().iter().enumerate() {
                    println!("  [{}] {} {}", index, layer.digest, crate::image::ImageSize(layer.size));
                }
            }
            Command::Download { image, dir } => {
                let (repository, reference) = split_image_reference(image);
                let image = client.image(&repository, &reference).await?;
                let prefix = layer_prefix(dir, &repository);
                let paths = client.download_image(&image, &prefix).await?;
                for path in paths {
                    println!("{}", path.display());
                }
            }
            Command::Blob {
                repository,
                digest,
                output,
            } => {
                let target = output.clone().unwrap_or_else(|| default_blob_path(digest));
                client.download_blob(repository, digest, &target).await?;
                println!("{}", target.display());
            }
        }

        info!(elapsed = ?started.elapsed(), "done");
        Ok(())
    }

    async fn stream_repositories(&self, client: &RegistryClient, options: &ListOptions) -> Result<()> {
        let mut stream = client.repositories_stream(options)?;
        while let Some(item) = stream.next().await {
            print_repository(&item?, options.with_tags);
        }
        Ok(())
    }
}

fn print_repository(repository: &Repository, with_tags: bool) {
    if !with_tags {
        println!("{}", repository.name());
        return;
    }
    match repository.tag_error() {
        Some(err) => println!("{} (tags unavailable: {})", repository.name(), err),
        None => println!("{} [{}]", repository.name(), repository.tag_names().join(", ")),
    }
}

/// `<dir>/<repository with '/' replaced by '_'>`
fn layer_prefix(dir: &Path, repository: &str) -> String {
    dir.join(repository.replace('/', "_")).to_string_lossy().into_owned()
}

fn default_blob_path(digest: &str) -> PathBuf {
    let hex = digest.split_once(':').map(|(_, hex)| hex).unwrap_or(digest);
    PathBuf::from(hex)
}
