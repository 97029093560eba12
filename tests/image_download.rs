//! Manifest resolution and whole-image downloads against a mock registry

use httpmock::prelude::*;
use httpmock::Method::HEAD;
use reglib::download::{ChunkPolicy, layer_path};
use reglib::image::manifest::ACCEPTED_MANIFESTS;
use reglib::registry::{RegistryApi, RegistryEndpoint, Tag};
use reglib::{ClientConfig, RegistryClient, RegistryError};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;

const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

fn client(server: &MockServer) -> RegistryClient {
    let config = ClientConfig::new(server.base_url())
        .with_chunk_policy(ChunkPolicy::new(64, 2))
        .with_max_concurrency(2);
    RegistryClient::builder(config)
        .without_credential_store()
        .build()
        .unwrap()
}

fn digest_of(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

struct Layer {
    data: Vec<u8>,
    digest: String,
}

fn layer(len: usize, seed: u8) -> Layer {
    let data: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(seed)).collect();
    let digest = digest_of(&data);
    Layer { data, digest }
}

/// Serves manifest, config and layers of `lib/app:1.0`; layers answer HEAD and a whole-blob ranged GET
async fn serve_image(server: &MockServer, layers: &[Layer]) {
    let config = json!({
        "architecture": "amd64",
        "os": "linux",
        "created": "2024-03-01T12:00:00Z",
        "history": [{"created": "2024-03-01T11:59:00Z", "created_by": "/bin/sh -c #(nop) ADD file"}]
    })
    .to_string();
    let config_digest = digest_of(config.as_bytes());

    let manifest = json!({
        "schemaVersion": 2,
        "mediaType": DOCKER_MANIFEST,
        "config": {
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "size": config.len(),
            "digest": config_digest,
        },
        "layers": layers.iter().map(|layer| json!({
            "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
            "size": layer.data.len(),
            "digest": layer.digest,
        })).collect::<Vec<_>>(),
    });

    server
        .mock_async(|when, then| {
            when.method(GET).path("/v2/lib/app/manifests/1.0");
            then.status(200)
                .header("content-type", DOCKER_MANIFEST)
                .header("docker-content-digest", "sha256:0123")
                .json_body(manifest);
        })
        .await;
    let config_path = RegistryEndpoint::blob_path("lib/app", &config_digest);
    server
        .mock_async(|when, then| {
            when.method(GET).path(config_path.as_str());
            then.status(200).body(config.clone());
        })
        .await;

    for layer in layers {
        let path = RegistryEndpoint::blob_path("lib/app", &layer.digest);
        let len = layer.data.len();
        server
            .mock_async(|when, then| {
                when.method(HEAD).path(path.as_str());
                then.status(200).header("content-length", len.to_string());
            })
            .await;
        // Registries may answer ranged requests with the whole blob when the range covers it
        server
            .mock_async(|when, then| {
                when.method(GET).path(path.as_str()).header("range", format!("bytes=0-{}", len - 1));
                then.status(200).body(layer.data.clone());
            })
            .await;
    }
}

#[tokio::test]
async fn test_image_resolves_manifest_and_config() {
    let server = MockServer::start_async().await;
    let layers = [layer(40, 3), layer(50, 7)];
    serve_image(&server, &layers).await;

    let image = client(&server).image("lib/app", "1.0").await.unwrap();
    assert_eq!(image.full_name(), "lib/app:1.0");
    assert_eq!(image.digest.as_deref(), Some("sha256:0123"));
    assert_eq!(image.layers().len(), 2);
    assert_eq!(image.size().0, 90);
    assert_eq!(image.config.os, "linux");
    assert_eq!(image.created().unwrap().to_rfc3339(), "2024-03-01T12:00:00+00:00");
    assert_eq!(image.history().len(), 1);
}

#[tokio::test]
async fn test_tag_image_is_fetched_once() {
    let server = MockServer::start_async().await;
    let layers = [layer(40, 3)];
    serve_image(&server, &layers).await;

    let api: Arc<dyn RegistryApi> = Arc::new(client(&server));
    let tag = Tag::new("lib/app", "1.0", api);
    let first = tag.image().await.unwrap().manifest.layers.len();
    let second = tag.image().await.unwrap().manifest.layers.len();
    assert_eq!((first, second), (1, 1));
}

#[tokio::test]
async fn test_index_manifest_is_rejected() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/v2/lib/app/manifests/multi");
            then.status(200)
                .header("content-type", "application/vnd.oci.image.index.v1+json")
                .json_body(json!({"schemaVersion": 2, "manifests": []}));
        })
        .await;

    let api: Arc<dyn RegistryApi> = Arc::new(client(&server));
    let tag = Tag::new("lib/app", "multi", api);
    let err = tag.image().await.unwrap_err();
    assert!(matches!(*err, RegistryError::Manifest(_)));
    assert!(tag.image_error().is_some());
}

#[tokio::test]
async fn test_download_image_writes_every_layer() {
    let server = MockServer::start_async().await;
    let layers = [layer(40, 3), layer(140, 5), layer(7, 11)];
    serve_image(&server, &layers).await;
    // The 140 byte layer is above the 64 byte floor and splits into two ranges
    let big = RegistryEndpoint::blob_path("lib/app", &layers[1].digest);
    for (range, bytes) in [("bytes=0-69", 0..70), ("bytes=70-139", 70..140)] {
        let body = layers[1].data[bytes].to_vec();
        server
            .mock_async(|when, then| {
                when.method(GET).path(big.as_str()).header("range", range);
                then.status(206).body(body);
            })
            .await;
    }

    let client = client(&server);
    let image = client.image("lib/app", "1.0").await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("out").join("lib_app_1.0");
    let prefix = prefix.to_str().unwrap();

    let paths = client.download_image(&image, prefix).await.unwrap();
    assert_eq!(paths.len(), 3);
    for (index, (path, layer)) in paths.iter().zip(&layers).enumerate() {
        assert_eq!(path, &layer_path(prefix, index, &image.layers()[index]).unwrap());
        assert_eq!(std::fs::read(path).unwrap(), layer.data);
    }
}

#[tokio::test]
async fn test_missing_layer_fails_the_image_download() {
    let server = MockServer::start_async().await;
    let layers = [layer(40, 3)];
    serve_image(&server, &layers).await;
    let client = client(&server);
    let mut image = client.image("lib/app", "1.0").await.unwrap();
    image.manifest.layers[0].digest = format!("sha256:{}", "f".repeat(64));

    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("app");
    let err = client
        .download_image(&image, prefix.to_str().unwrap())
        .await
        .unwrap_err();
    match err {
        RegistryError::Layer { index, source, .. } => {
            assert_eq!(index, 0);
            assert!(matches!(*source, RegistryError::Status { .. }));
        }
        other => panic!("expected a layer error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_layer_digest_is_rejected_before_any_request() {
    let server = MockServer::start_async().await;
    let layers = [layer(40, 3), layer(50, 7)];
    serve_image(&server, &layers).await;
    let client = client(&server);
    let mut image = client.image("lib/app", "1.0").await.unwrap();
    image.manifest.layers[1].digest = "sha256:/../../escaped".to_string();
    let heads = server
        .mock_async(|when, then| {
            when.method(HEAD);
            then.status(200).header("content-length", "1");
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let err = client
        .download_image(&image, out.join("app").to_str().unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, RegistryError::Manifest(_)), "got {:?}", err);
    assert_eq!(heads.hits_async().await, 0);
    assert!(!dir.path().join("escaped.tgz").exists());
}

#[tokio::test]
async fn test_layer_with_wrong_content_is_removed() {
    let server = MockServer::start_async().await;
    let layers = [layer(40, 3)];
    serve_image(&server, &layers).await;
    let client = client(&server);
    let mut image = client.image("lib/app", "1.0").await.unwrap();

    // Serve the same bytes under a digest they do not hash to
    let forged = format!("sha256:{}", "a".repeat(64));
    let path = RegistryEndpoint::blob_path("lib/app", &forged);
    server
        .mock_async(|when, then| {
            when.method(HEAD).path(path.as_str());
            then.status(200).header("content-length", "40");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(path.as_str());
            then.status(200).body(layers[0].data.clone());
        })
        .await;
    image.manifest.layers[0].digest = forged;

    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("app");
    let prefix = prefix.to_str().unwrap();
    let err = client.download_image(&image, prefix).await.unwrap_err();

    match err {
        RegistryError::Layer { index, source, .. } => {
            assert_eq!(index, 0);
            assert!(matches!(*source, RegistryError::DigestMismatch { .. }));
        }
        other => panic!("expected a layer error, got {:?}", other),
    }
    assert!(!layer_path(prefix, 0, &image.layers()[0]).unwrap().exists());
}

#[tokio::test]
async fn test_accept_header_survives_manifest_redirect() {
    let server = MockServer::start_async().await;
    let accept = ACCEPTED_MANIFESTS.join(", ");
    server
        .mock_async(|when, then| {
            when.method(GET).path("/v2/lib/app/manifests/1.0");
            then.status(307).header("location", "/mirror/lib/app/1.0");
        })
        .await;
    let mirror = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/mirror/lib/app/1.0")
                .header("accept", accept.as_str());
            then.status(200)
                .header("content-type", DOCKER_MANIFEST)
                .body(r#"{"schemaVersion":2,"config":{"digest":"sha256:aa"},"layers":[]}"#);
        })
        .await;

    let response = client(&server)
        .manifest("lib/app", "1.0", &ACCEPTED_MANIFESTS)
        .await
        .unwrap();

    assert_eq!(response.content_type, DOCKER_MANIFEST);
    assert!(!response.data.is_empty());
    assert_eq!(mirror.hits_async().await, 1);
}
