//! Shared helpers for drivefs-core integration tests.

#![allow(dead_code)]

use drivefs_core::testing::MemoryDrive;
use drivefs_core::{DriveConfig, DriveError, DriveFs, ErrorKind, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

/// A filesystem over a fresh in-memory drive.
pub struct TestDrive {
    pub drive: Arc<MemoryDrive>,
    pub fs: DriveFs,
}

impl TestDrive {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: DriveConfig) -> Self {
        Self::with_drive(MemoryDrive::new(), config).await
    }

    pub async fn with_drive(drive: MemoryDrive, config: DriveConfig) -> Self {
        init_tracing();
        let drive = Arc::new(drive);
        let fs = DriveFs::new(drive.clone(), config)
            .await
            .expect("failed to open drive filesystem");
        drive.reset_calls();
        Self { drive, fs }
    }
}

/// Default configuration with retry delays removed.
pub fn test_config() -> DriveConfig {
    DriveConfig::default().retry(
        RetryPolicy::default()
            .reset_delay(Duration::ZERO)
            .rate_limit_delay(Duration::ZERO),
    )
}

/// Installs a subscriber honouring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Assert that `path` reads back as `expected`.
pub async fn assert_file_content(fs: &DriveFs, path: &str, expected: &[u8]) {
    let actual = fs
        .read_file(path)
        .await
        .unwrap_or_else(|e| panic!("Failed to read {path}: {e}"));
    assert_eq!(
        actual,
        expected,
        "Content mismatch for {path}. Expected {} bytes, got {} bytes",
        expected.len(),
        actual.len()
    );
}

/// Assert that `path` does not resolve.
pub async fn assert_not_found(fs: &DriveFs, path: &str) {
    match fs.stat(path).await {
        Ok(meta) => panic!("Expected {path} to not exist, found {meta:?}"),
        Err(e) => assert_eq!(e.kind(), ErrorKind::NotFound, "unexpected error for {path}: {e}"),
    }
}

/// Assert that a directory contains exactly `expected`, in any order.
pub async fn assert_dir_entries(fs: &DriveFs, path: &str, expected: &[&str]) {
    let mut actual: Vec<String> = fs
        .read_dir(path)
        .await
        .unwrap_or_else(|e| panic!("Failed to list {path}: {e}"))
        .iter()
        .map(|m| m.name().to_string())
        .collect();
    actual.sort();
    let mut expected: Vec<String> = expected.iter().map(ToString::to_string).collect();
    expected.sort();
    assert_eq!(actual, expected, "Directory entries mismatch for {path}");
}

/// Assert an error's canonical kind.
pub fn assert_kind<T: std::fmt::Debug>(result: Result<T, DriveError>, kind: ErrorKind) -> DriveError {
    match result {
        Ok(value) => panic!("Expected {kind} error, got Ok({value:?})"),
        Err(e) => {
            assert_eq!(e.kind(), kind, "unexpected error: {e}");
            e
        }
    }
}
