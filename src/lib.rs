//! reglib: Docker Registry v2 client library
//!
//! Lists repositories and tags, fetches image manifests and downloads blobs
//! from a registry speaking the v2 distribution API. Authentication
//! challenges are answered transparently by the transport, catalog pages are
//! enriched concurrently, and large blobs are fetched as parallel byte ranges.
//!
//! ```no_run
//! use reglib::{ClientConfig, ListOptions, RegistryClient};
//!
//! # async fn example() -> reglib::Result<()> {
//! let client = RegistryClient::connect(ClientConfig::new("registry.example.com")).await?;
//! for repository in client.repositories(&ListOptions::new().with_tags(true)).await? {
//!     println!("{} {:?}", repository.name(), repository.tag_names());
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod credentials;
pub mod download;
pub mod error;
pub mod image;
pub mod logging;
pub mod registry;

pub use config::{ClientConfig, ListOptions};
pub use download::{ChunkPolicy, ChunkedDownloader};
pub use error::{RegistryError, Result};
pub use image::{Image, ImageSize};
pub use registry::{RegistryClient, RegistryClientBuilder, Repository, Tag};
