//! Integration tests: full export pipeline against an on-disk store.
//!
//! Each test builds images in a temporary `LocalImageStore`, exports them
//! into an in-memory buffer and reads the result back with the `tar` crate.

mod common;

use std::sync::Arc;

use common::{archive_map, paths, read_archive, CancellingStore, Fixture};
use imgpack_core::config::ExportConfig;
use imgpack_core::error::{ErrorKind, ExportError};
use imgpack_runtime::oci::digest::Digest;
use imgpack_runtime::{ExportPhase, ExportRequest, Exporter, Platform};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

fn json(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn test_two_tags_share_base_layer() {
    let fx = Fixture::new();
    let v1 = fx.manifest(br#"{"v":1}"#, &[b"base", b"mid-one"]).await;
    let v2 = fx.manifest(br#"{"v":2}"#, &[b"base", b"mid-two"]).await;
    fx.tag("repo/app:v1", &v1).await;
    fx.tag("repo/app:v2", &v2).await;

    let mut out = Vec::new();
    let report = Exporter::new(fx.store.clone(), ExportConfig::default())
        .export(&ExportRequest::new(["repo/app:v1", "repo/app:v2"]), &mut out)
        .await
        .unwrap();

    // 3 layers + 2 configs + 2 manifests
    assert_eq!(report.blobs, 7);
    assert_eq!(report.bytes_written, out.len() as u64);

    let files = archive_map(&out);
    let blobs = files.keys().filter(|p| p.starts_with("blobs/")).count();
    assert_eq!(blobs, 7);

    let index = json(&files["index.json"]);
    let manifests = index["manifests"].as_array().unwrap();
    assert_eq!(manifests.len(), 2);
    let names: Vec<&str> = manifests
        .iter()
        .map(|m| m["annotations"]["io.containerd.image.name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["docker.io/repo/app:v1", "docker.io/repo/app:v2"]);

    let docker = json(&files["manifest.json"]);
    let docker = docker.as_array().unwrap();
    assert_eq!(docker.len(), 2);
    assert_eq!(docker[0]["RepoTags"][0], "repo/app:v1");
    assert_eq!(docker[1]["RepoTags"][0], "repo/app:v2");
    assert_eq!(docker[0]["Layers"][0], docker[1]["Layers"][0]);
}

#[tokio::test]
async fn test_layer_and_config_bytes_round_trip() {
    let fx = Fixture::new();
    let config = br#"{"architecture":"amd64","os":"linux"}"#;
    let layers: [&[u8]; 2] = [b"first layer bytes", b"second layer bytes"];
    let desc = fx.manifest(config, &layers).await;
    fx.tag("nginx:1.25", &desc).await;

    let mut out = Vec::new();
    Exporter::new(fx.store.clone(), ExportConfig::default())
        .export(&ExportRequest::new(["nginx:1.25"]), &mut out)
        .await
        .unwrap();

    let files = archive_map(&out);
    for (path, data) in files.iter().filter(|(p, _)| p.starts_with("blobs/")) {
        let digest = Digest::sha256(data);
        assert_eq!(path, &digest.blob_path(), "content of {path} does not match its name");
    }

    let docker = json(&files["manifest.json"]);
    let entry = &docker[0];
    assert_eq!(entry["RepoTags"][0], "nginx:1.25");
    assert_eq!(
        files[entry["Config"].as_str().unwrap()].as_slice(),
        config.as_slice()
    );
    for (i, layer) in layers.iter().enumerate() {
        let path = entry["Layers"][i].as_str().unwrap();
        assert_eq!(files[path].as_slice(), *layer);
    }
}

#[tokio::test]
async fn test_archive_entry_order() {
    let fx = Fixture::new();
    let desc = fx.manifest(b"{}", &[b"a", b"b"]).await;
    fx.tag("repo/app:v1", &desc).await;

    let mut out = Vec::new();
    Exporter::new(fx.store.clone(), ExportConfig::default())
        .export(&ExportRequest::new(["repo/app:v1"]), &mut out)
        .await
        .unwrap();

    let entries = read_archive(&out);
    let order = paths(&entries);
    assert_eq!(order.len(), 7);
    assert_eq!(order[0], Digest::sha256(b"a").blob_path());
    assert_eq!(order[1], Digest::sha256(b"b").blob_path());
    assert_eq!(order[2], Digest::sha256(b"{}").blob_path());
    assert_eq!(order[3], desc.digest.blob_path());
    assert_eq!(&order[4..], &["oci-layout", "manifest.json", "index.json"]);
}

#[tokio::test]
async fn test_dedup_count_matches_unique_digests() {
    let fx = Fixture::new();
    let shared: &[u8] = b"shared";
    let a = fx.manifest(b"{\"a\":1}", &[shared, b"only-a"]).await;
    let b = fx.manifest(b"{\"b\":1}", &[shared, shared]).await;
    fx.tag("repo/a:latest", &a).await;
    fx.tag("repo/b:latest", &b).await;

    let mut out = Vec::new();
    let report = Exporter::new(fx.store.clone(), ExportConfig::default())
        .export(&ExportRequest::new(["repo/a", "repo/b"]), &mut out)
        .await
        .unwrap();

    // shared, only-a, 2 configs, 2 manifests
    assert_eq!(report.blobs, 6);
    let entries = read_archive(&out);
    let blob_paths: Vec<&str> = paths(&entries)
        .into_iter()
        .filter(|p| p.starts_with("blobs/"))
        .collect();
    let mut unique = blob_paths.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), blob_paths.len());
}

#[tokio::test]
async fn test_multi_platform_export() {
    let fx = Fixture::new();
    let amd = fx.manifest(b"{\"arch\":\"amd64\"}", &[b"amd-layer"]).await;
    let arm = fx.manifest(b"{\"arch\":\"arm64\"}", &[b"arm-layer"]).await;
    let index = fx
        .index(vec![
            (amd, Platform::new("linux", "amd64")),
            (arm, Platform::new("linux", "arm64")),
        ])
        .await;
    fx.tag("repo/multi:v1", &index).await;

    let mut out = Vec::new();
    let report = Exporter::new(fx.store.clone(), ExportConfig::default())
        .export(&ExportRequest::new(["repo/multi:v1"]), &mut out)
        .await
        .unwrap();

    // 2 layers + 2 configs + 2 manifests + index
    assert_eq!(report.blobs, 7);
    let files = archive_map(&out);
    assert!(files.contains_key(&index.digest.blob_path()));
    // no single manifest to hand to docker load
    assert_eq!(json(&files["manifest.json"]), serde_json::json!([]));
    assert_eq!(
        json(&files["index.json"])["manifests"][0]["digest"],
        index.digest.to_string()
    );
}

#[tokio::test]
async fn test_platform_filter_selects_one_manifest() {
    let fx = Fixture::new();
    let amd = fx.manifest(b"{\"arch\":\"amd64\"}", &[b"amd-layer"]).await;
    let arm = fx.manifest(b"{\"arch\":\"arm64\"}", &[b"arm-layer"]).await;
    let index = fx
        .index(vec![
            (amd, Platform::new("linux", "amd64")),
            (arm.clone(), Platform::new("linux", "arm64")),
        ])
        .await;
    fx.tag("repo/multi:v1", &index).await;

    let request =
        ExportRequest::new(["repo/multi:v1"]).with_platform(Platform::new("linux", "arm64"));
    let mut out = Vec::new();
    let report = Exporter::new(fx.store.clone(), ExportConfig::default())
        .export(&request, &mut out)
        .await
        .unwrap();

    // arm layer + config + manifest + index
    assert_eq!(report.blobs, 4);
    let files = archive_map(&out);
    assert!(files.contains_key(&Digest::sha256(b"arm-layer").blob_path()));
    assert!(!files.contains_key(&Digest::sha256(b"amd-layer").blob_path()));

    let docker = json(&files["manifest.json"]);
    assert_eq!(docker.as_array().unwrap().len(), 1);
    assert_eq!(docker[0]["RepoTags"][0], "repo/multi:v1");
    assert_eq!(
        docker[0]["Layers"][0],
        Digest::sha256(b"arm-layer").blob_path()
    );
}

#[tokio::test]
async fn test_platform_not_found_writes_nothing() {
    let fx = Fixture::new();
    let amd = fx.manifest(b"{}", &[b"amd-layer"]).await;
    let index = fx.index(vec![(amd, Platform::new("linux", "amd64"))]).await;
    fx.tag("repo/multi:v1", &index).await;

    let request =
        ExportRequest::new(["repo/multi:v1"]).with_platform(Platform::new("windows", "amd64"));
    let mut exporter = Exporter::new(fx.store.clone(), ExportConfig::default());
    let mut out = Vec::new();
    let err = exporter.export(&request, &mut out).await.unwrap_err();

    assert!(matches!(err, ExportError::PlatformNotFound { .. }));
    assert!(out.is_empty());
    assert_eq!(
        exporter.phase(),
        ExportPhase::Failed(ErrorKind::PlatformNotFound)
    );
}

#[tokio::test]
async fn test_corrupted_blob_fails_without_index() {
    let fx = Fixture::new();
    let good = fx.manifest(b"{}", &[b"good layer"]).await;
    fx.tag("repo/app:v1", &good).await;
    fx.corrupt(&Digest::sha256(b"good layer"));

    let mut exporter = Exporter::new(fx.store.clone(), ExportConfig::default());
    let mut out = Vec::new();
    let err = exporter
        .export(&ExportRequest::new(["repo/app:v1"]), &mut out)
        .await
        .unwrap_err();

    assert!(matches!(err, ExportError::DigestMismatch { .. }));
    assert_eq!(exporter.phase(), ExportPhase::Failed(ErrorKind::DigestMismatch));
    assert!(!out.windows(10).any(|w| w == b"index.json"));
}

#[tokio::test]
async fn test_corrupted_manifest_fails_before_writing() {
    let fx = Fixture::new();
    let manifest = fx.manifest(b"{}", &[b"layer"]).await;
    fx.tag("repo/app:v1", &manifest).await;
    fx.corrupt(&manifest.digest);

    let mut exporter = Exporter::new(fx.store.clone(), ExportConfig::default());
    let mut out = Vec::new();
    let err = exporter
        .export(&ExportRequest::new(["repo/app:v1"]), &mut out)
        .await
        .unwrap_err();

    assert!(matches!(err, ExportError::DigestMismatch { .. }));
    assert_eq!(exporter.phase(), ExportPhase::Failed(ErrorKind::DigestMismatch));
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_cancellation_mid_stream_leaves_no_index() {
    let fx = Fixture::new();
    let desc = fx.manifest(b"{}", &[b"one", b"two", b"three"]).await;
    fx.tag("repo/app:v1", &desc).await;

    let cancel = CancellationToken::new();
    let store = CancellingStore::new(fx.store.clone(), cancel.clone(), 2);
    let mut exporter =
        Exporter::new(store, ExportConfig::default()).with_cancellation(cancel.clone());

    let mut out = Vec::new();
    let err = exporter
        .export(&ExportRequest::new(["repo/app:v1"]), &mut out)
        .await
        .unwrap_err();

    assert!(matches!(err, ExportError::Cancelled));
    assert_eq!(exporter.phase(), ExportPhase::Failed(ErrorKind::Cancelled));
    // the blob being copied when cancellation fired completes; nothing after it
    assert!(!out.is_empty());
    assert!(!out.windows(10).any(|w| w == b"index.json"));
}

#[tokio::test]
async fn test_duplicate_reference_listed_once() {
    let fx = Fixture::new();
    let desc = fx.manifest(b"{}", &[b"layer"]).await;
    fx.tag("nginx:latest", &desc).await;

    let mut out = Vec::new();
    let report = Exporter::new(fx.store.clone(), ExportConfig::default())
        .export(
            &ExportRequest::new([
                "nginx",
                "library/nginx",
                "docker.io/nginx",
                "docker.io/library/nginx:latest",
            ]),
            &mut out,
        )
        .await
        .unwrap();

    assert_eq!(report.images, vec!["docker.io/library/nginx:latest".to_string()]);
    let files = archive_map(&out);
    assert_eq!(
        json(&files["index.json"])["manifests"].as_array().unwrap().len(),
        1
    );
    assert_eq!(json(&files["manifest.json"])[0]["RepoTags"], serde_json::json!(["nginx:latest"]));
}

#[tokio::test]
async fn test_digest_reference_has_no_repo_tags() {
    let fx = Fixture::new();
    let desc = fx.manifest(b"{}", &[b"layer"]).await;
    fx.tag("repo/app:v1", &desc).await;

    let reference = format!("repo/app@{}", desc.digest);
    let mut out = Vec::new();
    Exporter::new(fx.store.clone(), ExportConfig::default())
        .export(&ExportRequest::new([reference]), &mut out)
        .await
        .unwrap();

    let files = archive_map(&out);
    let docker = json(&files["manifest.json"]);
    assert_eq!(docker[0]["RepoTags"], serde_json::json!([]));
    let annotations = &json(&files["index.json"])["manifests"][0]["annotations"];
    assert!(annotations.get("org.opencontainers.image.ref.name").is_none());
}

#[tokio::test]
async fn test_concurrent_exports_share_store() {
    let fx = Fixture::new();
    let a = fx.manifest(b"{\"a\":1}", &[b"base", b"a"]).await;
    let b = fx.manifest(b"{\"b\":1}", &[b"base", b"b"]).await;
    fx.tag("repo/a:v1", &a).await;
    fx.tag("repo/b:v1", &b).await;

    let mut handles = Vec::new();
    for reference in ["repo/a:v1", "repo/b:v1", "repo/a:v1"] {
        let store = Arc::clone(&fx.store);
        handles.push(tokio::spawn(async move {
            let mut out = Vec::new();
            let report = Exporter::new(store, ExportConfig::default())
                .export(&ExportRequest::new([reference]), &mut out)
                .await
                .unwrap();
            (report, out)
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    for (report, out) in &results {
        assert_eq!(report.blobs, 4);
        assert_eq!(report.bytes_written, out.len() as u64);
    }
    // identical requests produce identical archives
    assert_eq!(results[0].1, results[2].1);
}
