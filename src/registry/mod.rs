//! Registry module for Docker Registry HTTP API v2
//!
//! Layers, bottom up:
//! - [`auth`] and [`token_manager`]: credentials, challenges, cached tokens
//! - [`transport`]: the authenticating transport every request goes through
//! - [`operations`]: the raw API calls
//! - [`catalog`], [`enricher`], [`records`]: paginated listing and concurrent enrichment
//! - [`client`]: the facade tying it together

pub mod api;
pub mod auth;
pub mod catalog;
pub mod client;
pub mod enricher;
pub mod operations;
pub mod records;
pub mod token_manager;
pub mod transport;

pub use api::RegistryApi;
pub use auth::{Challenge, Credential, Token};
pub use catalog::PaginatedCatalog;
pub use client::{RegistryClient, RegistryClientBuilder};
pub use enricher::{ConcurrentEnricher, RepositoryStream};
pub use operations::{CatalogPage, ManifestResponse, RegistryEndpoint};
pub use records::{Repository, Tag};
pub use token_manager::TokenCache;
pub use transport::TokenAuthTransport;
