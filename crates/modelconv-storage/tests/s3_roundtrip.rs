//! S3 integration tests.
//!
//! Require a reachable S3-compatible endpoint and `S3_TEST_BUCKET`.
//! Run with: `cargo test -p modelconv-storage --test s3_roundtrip -- --ignored`

use modelconv_models::ObjectLocator;
use modelconv_storage::{ObjectStore, S3Store};

fn test_bucket() -> String {
    std::env::var("S3_TEST_BUCKET").expect("S3_TEST_BUCKET must be set")
}

/// Upload a file, download it again, and compare contents.
#[tokio::test]
#[ignore = "requires S3 credentials"]
async fn test_upload_download() {
    dotenvy::dotenv().ok();

    let store = S3Store::from_env().await.expect("Failed to create S3 store");
    store
        .check_connectivity(&test_bucket())
        .await
        .expect("Test bucket is not reachable");
    let dir = tempfile::tempdir().expect("Failed to create temp dir");

    let source = dir.path().join("model.glb");
    tokio::fs::write(&source, b"glTF integration test payload")
        .await
        .expect("Failed to write source file");

    let locator = ObjectLocator::new(test_bucket(), "test/integration/model.glb");
    store
        .upload(&source, &locator, "model/gltf-binary")
        .await
        .expect("Failed to upload");

    let destination = dir.path().join("downloaded.glb");
    store
        .download(&locator, &destination)
        .await
        .expect("Failed to download");

    let content = tokio::fs::read(&destination).await.expect("Failed to read download");
    assert_eq!(content, b"glTF integration test payload");
}

/// A missing key must be reported as not-found, never as transient.
#[tokio::test]
#[ignore = "requires S3 credentials"]
async fn test_missing_object_is_not_found() {
    dotenvy::dotenv().ok();

    let store = S3Store::from_env().await.expect("Failed to create S3 store");
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let destination = dir.path().join("missing.blend");

    let err = store
        .download(
            &ObjectLocator::new(test_bucket(), "test/integration/does-not-exist.blend"),
            &destination,
        )
        .await
        .expect_err("download of a missing key should fail");

    assert!(err.is_not_found(), "unexpected error: {err}");
    assert!(!destination.exists());
}
