//! Command-line argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "reglib")]
#[command(about = "Browse a Docker registry and download images from it")]
#[command(version)]
pub struct Args {
    /// Registry address
    #[arg(
        long = "registry",
        short = 'r',
        env = "REGISTRY_ADDRESS",
        help = "Registry address, e.g. registry.example.com:5000"
    )]
    pub registry: String,

    #[arg(
        long = "username",
        short = 'u',
        env = "REGISTRY_USERNAME",
        help = "Username for registry authentication"
    )]
    pub username: Option<String>,

    #[arg(
        long = "password",
        short = 'p',
        env = "REGISTRY_PASSWORD",
        hide_env_values = true,
        help = "Password for registry authentication"
    )]
    pub password: Option<String>,

    #[arg(
        long = "skip-tls",
        short = 'k',
        env = "SKIP_TLS",
        help = "Skip TLS certificate verification"
    )]
    pub skip_tls: bool,

    #[arg(long = "verbose", short = 'v', help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        long = "timeout",
        short = 't',
        default_value = "60",
        help = "Timeout for each request in seconds"
    )]
    pub timeout: u64,

    #[arg(
        long = "chunk-size",
        env = "CHUNK_SIZE",
        help = "Minimum bytes per ranged request when downloading blobs"
    )]
    pub chunk_size: Option<u64>,

    #[arg(
        long = "concurrency",
        short = 'j',
        default_value = "16",
        help = "Maximum repositories enriched or layers downloaded at once"
    )]
    pub concurrency: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List repositories in the catalog
    Repos {
        #[arg(long, default_value = "0", help = "Index of the first repository")]
        start: usize,
        #[arg(long, default_value = "0", help = "Index past the last repository; 0 lists all")]
        end: usize,
        #[arg(long = "with-tags", help = "Also list the tags of every repository")]
        with_tags: bool,
        #[arg(long, help = "Print repositories as soon as they are enriched")]
        stream: bool,
        #[arg(long, help = "Only repositories in this namespace")]
        namespace: Option<String>,
        #[arg(long, help = "Only repositories whose name starts with this prefix")]
        prefix: Option<String>,
    },
    /// List the tags of a repository
    Tags { repository: String },
    /// Show the manifest summary of an image
    Image {
        /// repository[:tag] or repository@digest
        image: String,
    },
    /// Download every layer of an image
    Download {
        /// repository[:tag] or repository@digest
        image: String,
        #[arg(long, short = 'd', default_value = ".", help = "Directory to write layers into")]
        dir: PathBuf,
    },
    /// Download a single blob
    Blob {
        repository: String,
        digest: String,
        #[arg(long, short = 'o', help = "Output file (defaults to the digest hex)")]
        output: Option<PathBuf>,
    },
}

/// Splits `repo[:tag]` or `repo@digest` into repository and reference (`latest` by default)
pub fn split_image_reference(image: &str) -> (String, String) {
    if let Some((repository, digest)) = image.split_once('@') {
        return (repository.to_string(), digest.to_string());
    }
    match image.rsplit_once(':') {
        Some((repository, tag)) if !tag.contains('/') && !repository.is_empty() => {
            (repository.to_string(), tag.to_string())
        }
        _ => (image.to_string(), "latest".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_image_reference() {
        assert_eq!(split_image_reference("alpine"), ("alpine".into(), "latest".into()));
        assert_eq!(split_image_reference("library/alpine:3.19"), ("library/alpine".into(), "3.19".into()));
        assert_eq!(
            split_image_reference("app@sha256:abc"),
            ("app".into(), "sha256:abc".into())
        );
        assert_eq!(
            split_image_reference("localhost:5000/app"),
            ("localhost:5000/app".into(), "latest".into())
        );
    }

    #[test]
    fn test_parse_repos_command() {
        let args = Args::try_parse_from([
            "reglib", "-r", "r.example.com", "repos", "--start", "2", "--end", "5", "--with-tags",
        ])
        .unwrap();
        assert_eq!(args.registry, "r.example.com");
        match args.command {
            Command::Repos { start, end, with_tags, stream, .. } => {
                assert_eq!((start, end), (2, 5));
                assert!(with_tags);
                assert!(!stream);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
