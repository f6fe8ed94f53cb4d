//! Shared fixtures for the end-to-end tests: a single ephemeral MinIO
//! container for the whole binary, bucket/versioning/object setup, a
//! `tracing_subscriber` logging helper, and a helper that builds a
//! throwaway `.db` file the same way the reference test suite's `get_db`
//! does.

#![allow(dead_code)]

use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Once;

use testcontainers::core::IntoContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::minio::MinIO;
use tokio::sync::OnceCell;

pub const MINIO_ACCESS_KEY: &str = "minioadmin";
pub const MINIO_SECRET_KEY: &str = "minioadmin";

static MINIO_CONTAINER: OnceCell<ContainerGuard> = OnceCell::const_new();
static PREFIX_COUNTER: AtomicU64 = AtomicU64::new(0);
static LOGGING: Once = Once::new();

/// Installs a `tracing_subscriber::fmt` subscriber gated by `EnvFilter`, so
/// `RUST_LOG=sqlite_s3_query=debug cargo test -- --nocapture` shows the
/// fetcher's ranged-GET traces during a test run. Safe to call from every
/// test; only the first call installs anything.
pub fn init_logging() {
    LOGGING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// Registers an atexit handler to force-remove the Docker container, since
/// `static` values are never dropped and `ContainerAsync::Drop` would
/// otherwise never run.
struct ContainerGuard {
    inner: ContainerAsync<MinIO>,
}

impl ContainerGuard {
    fn new(container: ContainerAsync<MinIO>) -> Self {
        let id = container.id().to_string();
        let id_leaked: &'static str = String::leak(id);
        unsafe {
            libc::atexit(cleanup_container_trampoline);
        }
        CONTAINER_ID_FOR_CLEANUP
            .set(id_leaked)
            .unwrap_or_else(|_| panic!("ContainerGuard created more than once"));

        Self { inner: container }
    }
}

static CONTAINER_ID_FOR_CLEANUP: std::sync::OnceLock<&'static str> = std::sync::OnceLock::new();

extern "C" fn cleanup_container_trampoline() {
    if let Some(id) = CONTAINER_ID_FOR_CLEANUP.get() {
        let _ = Command::new("docker")
            .args(["rm", "-f", id])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status();
    }
}

/// Generates a unique bucket/key prefix so concurrently-run tests never
/// collide on the same object.
pub fn unique_prefix() -> String {
    let counter = PREFIX_COUNTER.fetch_add(1, Ordering::SeqCst);
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis();
    format!("qtest-{timestamp}-{counter}")
}

/// Gets or starts the shared MinIO container, returning its S3 endpoint.
pub async fn minio_endpoint() -> String {
    init_logging();
    let guard = MINIO_CONTAINER
        .get_or_init(|| async {
            let container = MinIO::default()
                .start()
                .await
                .expect("failed to start MinIO container");
            ContainerGuard::new(container)
        })
        .await;

    let host = guard.inner.get_host().await.unwrap();
    let port = guard.inner.get_host_port_ipv4(9000.tcp()).await.unwrap();
    format!("http://{host}:{port}")
}

fn minio_direct_client(endpoint: &str) -> aws_sdk_s3::Client {
    let credentials = aws_credential_types::Credentials::new(
        MINIO_ACCESS_KEY,
        MINIO_SECRET_KEY,
        None,
        None,
        "test",
    );

    let config = aws_sdk_s3::Config::builder()
        .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
        .region(aws_sdk_s3::config::Region::new("us-east-1"))
        .endpoint_url(endpoint)
        .credentials_provider(credentials)
        .force_path_style(true)
        .build();

    aws_sdk_s3::Client::from_conf(config)
}

/// Creates `bucket`, turns on versioning, and uploads `content` to `key`.
/// Mirrors the reference test suite's `put_object`: create then version
/// then PUT, every time, so each test's fixture object always carries a
/// real `x-amz-version-id`.
pub async fn put_object(endpoint: &str, bucket: &str, key: &str, content: Vec<u8>) -> String {
    let client = minio_direct_client(endpoint);
    let _ = client.create_bucket().bucket(bucket).send().await;
    client
        .put_bucket_versioning()
        .bucket(bucket)
        .versioning_configuration(
            aws_sdk_s3::types::VersioningConfiguration::builder()
                .status(aws_sdk_s3::types::BucketVersioningStatus::Enabled)
                .build(),
        )
        .send()
        .await
        .expect("failed to enable bucket versioning");

    let output = client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(content.into())
        .send()
        .await
        .expect("failed to put fixture object");

    output.version_id().expect("MinIO did not return a version id").to_string()
}

/// Uploads `content` to a bucket with versioning left disabled, to exercise
/// the "no version id on the HEAD response" error path.
pub async fn put_object_unversioned(endpoint: &str, bucket: &str, key: &str, content: Vec<u8>) {
    let client = minio_direct_client(endpoint);
    let _ = client.create_bucket().bucket(bucket).send().await;
    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(content.into())
        .send()
        .await
        .expect("failed to put fixture object");
}

/// Builds a `.db` file by running `sqls` in order against a fresh, local
/// sqlite3 database, then reads back the raw file bytes. Mirrors the
/// reference test suite's `get_db`.
pub fn get_db(sqls: &[&str]) -> Vec<u8> {
    let file = tempfile::NamedTempFile::new().expect("failed to create temp db file");
    let conn = rusqlite::Connection::open(file.path()).expect("failed to open fixture db");
    for sql in sqls {
        conn.execute_batch(sql).expect("fixture sql failed");
    }
    drop(conn);
    std::fs::read(file.path()).expect("failed to read back fixture db")
}

/// Checks Docker availability by shelling out to `docker version`.
pub fn docker_available() -> bool {
    Command::new("docker")
        .arg("version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Skips the calling test if Docker isn't available. Use at the top of
/// every `#[tokio::test]` that needs the ephemeral MinIO container.
#[macro_export]
macro_rules! skip_unless_docker {
    () => {
        if !common::docker_available() {
            eprintln!("Docker not available, skipping test");
            return;
        }
    };
}
