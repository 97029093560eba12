//! Image metadata as served by a registry
//!
//! An [`Image`] joins a schema-2/OCI manifest (config and layer descriptors)
//! with the image config blob it points to. [`manifest`] holds the
//! [`ManifestService`](manifest::ManifestService) seam that produces them.

pub mod manifest;

pub use manifest::{ManifestService, RegistryManifests};

use crate::error::{RegistryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const KB: u64 = 1 << 10;
const MB: u64 = KB << 10;
const GB: u64 = MB << 10;

/// Content descriptor: a blob addressed by digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub size: u64,
}

impl Descriptor {
    /// Digest without its algorithm prefix
    pub fn hex(&self) -> &str {
        self.digest
            .split_once(':')
            .map(|(_, hex)| hex)
            .unwrap_or(&self.digest)
    }

    /// Hex part of a well-formed `<algorithm>:<hex>` digest.
    ///
    /// The result is safe to embed in a file name.
    pub fn checked_hex(&self) -> Result<&str> {
        let well_formed = self.digest.split_once(':').filter(|(algorithm, hex)| {
            !algorithm.is_empty()
                && algorithm
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b"+._-".contains(&b))
                && !hex.is_empty()
                && hex.bytes().all(|b| b.is_ascii_hexdigit())
        });
        match well_formed {
            Some((_, hex)) => Ok(hex),
            None => Err(RegistryError::Manifest(format!(
                "malformed layer digest {:?}",
                self.digest
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: String,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub empty_layer: bool,
}

/// The parts of the image config blob worth reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub history: Vec<History>,
}

#[derive(Debug, Clone)]
pub struct Image {
    pub repository: String,
    pub reference: String,
    /// `Docker-Content-Digest` of the manifest, when the registry reported one
    pub digest: Option<String>,
    pub manifest: Manifest,
    pub config: ImageConfig,
}

impl Image {
    /// `<repository>:<tag>` or `<repository>@<digest>`
    pub fn full_name(&self) -> String {
        if self.reference.contains(':') {
            format!("{}@{}", self.repository, self.reference)
        } else {
            format!("{}:{}", self.repository, self.reference)
        }
    }

    pub fn layers(&self) -> &[Descriptor] {
        &self.manifest.layers
    }

    /// Sum of the compressed layer sizes
    pub fn size(&self) -> ImageSize {
        ImageSize(self.manifest.layers.iter().map(|layer| layer.size).sum())
    }

    /// Creation time from the config, falling back to the newest history entry
    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.config
            .created
            .or_else(|| self.config.history.iter().rev().find_map(|h| h.created))
    }

    pub fn history(&self) -> &[History] {
        &self.config.history
    }
}

/// Byte count that prints in the largest fitting binary unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ImageSize(pub u64);

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        match bytes {
            b if b > GB => write!(f, "{:.3}GB", b as f64 / GB as f64),
            b if b > MB => write!(f, "{:.3}MB", b as f64 / MB as f64),
            b if b > KB => write!(f, "{:.3}KB", b as f64 / KB as f64),
            b => write!(f, "{}Bytes", b),
        }
    }
}
