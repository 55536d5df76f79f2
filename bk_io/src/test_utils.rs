//! Test utilities for brewkit
//!
//! This module provides common test infrastructure for writing integration and unit tests:
//!
//! - `TestContext` - Wraps TempDir, MockServer, and engine setup
//! - Archive fixtures - Build source tarballs in every supported compression
//! - Formula fixtures - A small formula whose configure and install steps really run
//! - Network failure helpers - Mock timeouts, 404 and 500 responses
//!
//! # Example
//!
//! ```ignore
//! use bk_io::test_utils::{TestContext, sample_formula};
//!
//! #[tokio::test]
//! async fn test_install() {
//!     let ctx = TestContext::new().await;
//!     let (url, checksum) = ctx.mount_sample_source("hello", "1.0").await;
//!     let spec = sample_formula("hello", &url, checksum);
//!
//!     ctx.engine().install(&spec, None, &Default::default(), &ctx.roots()).await.unwrap();
//!     assert!(ctx.prefix().join("bin/hello").exists());
//! }
//! ```

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bk_core::formula::InstallSpec;
use bk_core::{
    Checksum, DigestAlgorithm, FormulaSpec, InstallRoots, SourceVariant, ToolLocator,
    ToolLookupError,
};

use crate::engine::{FormulaEngine, FormulaEngineBuilder};
use crate::integrity::bytes_digest;
use crate::traits::ReqwestHttpClient;

// ============================================================================
// Archive fixtures
// ============================================================================

/// Build an uncompressed tar whose entries all live under `root/`.
///
/// # Arguments
/// * `root` - Top-level directory name (e.g. `nginx-1.0.14`)
/// * `files` - Slice of (relative_path, content, mode) tuples
pub fn source_tar(root: &str, files: &[(&str, &[u8], u32)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());

    let mut dir = tar::Header::new_gnu();
    dir.set_path(format!("{}/", root)).unwrap();
    dir.set_entry_type(tar::EntryType::Directory);
    dir.set_size(0);
    dir.set_mode(0o755);
    dir.set_cksum();
    builder.append(&dir, std::io::empty()).unwrap();

    for (rel_path, content, mode) in files {
        let mut header = tar::Header::new_gnu();
        header.set_path(format!("{}/{}", root, rel_path)).unwrap();
        header.set_size(content.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder.append(&header, *content).unwrap();
    }

    builder.into_inner().unwrap()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn xz(data: &[u8]) -> Vec<u8> {
    let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn zstd_compress(data: &[u8]) -> Vec<u8> {
    zstd::stream::encode_all(data, 0).unwrap()
}

/// A gzipped source tree with a working `configure` and install script.
///
/// - `configure` records its arguments in `configure.args`
/// - `install.sh <prefix>` copies `hello.sh` to `<prefix>/bin/hello`
/// - `README` contains `hello`
pub fn sample_source_tarball(name: &str, version: &str) -> Vec<u8> {
    let files: [(&str, &[u8], u32); 4] = [
        ("README", b"hello\n", 0o644),
        ("configure", b"#!/bin/sh\necho \"$@\" > configure.args\n", 0o755),
        ("install.sh", b"set -e\nmkdir -p \"$1/bin\"\ncp hello.sh \"$1/bin/hello\"\n", 0o644),
        ("hello.sh", b"#!/bin/sh\necho hello\n", 0o755),
    ];
    gzip(&source_tar(&format!("{}-{}", name, version), &files))
}

pub fn sha256_hex(data: &[u8]) -> String {
    bytes_digest(data, DigestAlgorithm::Sha256)
}

// ============================================================================
// Formula fixtures
// ============================================================================

/// A one-variant formula that configures with `--prefix` and runs `install.sh`.
pub fn sample_formula(name: &str, url: &str, checksum: Checksum) -> FormulaSpec {
    FormulaSpec {
        name: name.to_string(),
        desc: Some(format!("{} test fixture", name)),
        variants: vec![SourceVariant {
            id: bk_core::formula::DEFAULT_VARIANT.to_string(),
            url: url.to_string(),
            checksum,
            version: None,
            default: true,
        }],
        install: InstallSpec {
            configure: Some(vec!["--prefix={prefix}".to_string()]),
            steps: vec![vec![
                "sh".to_string(),
                "install.sh".to_string(),
                "{prefix}".to_string(),
            ]],
        },
        ..Default::default()
    }
}

/// Tool locator backed by a fixed table; unknown tools are not found.
#[derive(Debug, Clone, Default)]
pub struct FixedToolLocator {
    roots: BTreeMap<String, PathBuf>,
}

impl FixedToolLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: &str, root: &Path) -> Self {
        self.roots.insert(tool.to_string(), root.to_path_buf());
        self
    }
}

impl ToolLocator for FixedToolLocator {
    fn root(&self, tool: &str, _args: &[String]) -> Result<PathBuf, ToolLookupError> {
        self.roots
            .get(tool)
            .cloned()
            .ok_or_else(|| ToolLookupError::NotFound {
                tool: tool.to_string(),
            })
    }
}

// ============================================================================
// Network failure helpers
// ============================================================================

/// Create a mock response that delays for the specified duration before responding.
pub fn mock_timeout_response(delay: Duration, body: Option<Vec<u8>>) -> ResponseTemplate {
    let mut response = ResponseTemplate::new(200).set_delay(delay);
    if let Some(bytes) = body {
        response = response.set_body_bytes(bytes);
    }
    response
}

pub fn mock_500_error(message: Option<&str>) -> ResponseTemplate {
    let mut response = ResponseTemplate::new(500);
    if let Some(msg) = message {
        response = response.set_body_string(msg);
    }
    response
}

pub fn mock_404_error() -> ResponseTemplate {
    ResponseTemplate::new(404).set_body_string("Not Found")
}

// ============================================================================
// TestContext - Main test infrastructure
// ============================================================================

/// Test context that wraps common test setup.
///
/// Provides:
/// - Temporary directory holding the work root and install prefix
/// - Mock server serving source archives
/// - Engine builders wired to both, with an empty tool table
pub struct TestContext {
    pub tmp: TempDir,
    pub mock_server: MockServer,
}

impl TestContext {
    pub async fn new() -> Self {
        let mock_server = MockServer::start().await;
        let tmp = TempDir::new().expect("failed to create temp dir");
        Self { tmp, mock_server }
    }

    /// Engine working directory (downloads and build trees).
    pub fn work_root(&self) -> PathBuf {
        self.tmp.path().join("work")
    }

    pub fn prefix(&self) -> PathBuf {
        self.tmp.path().join("prefix")
    }

    pub fn roots(&self) -> InstallRoots {
        InstallRoots::under_prefix(&self.prefix())
    }

    /// Builder preconfigured for this context; tests add their own settings.
    pub fn engine_builder(&self) -> FormulaEngineBuilder {
        FormulaEngine::builder(self.work_root())
            .http_client(Arc::new(ReqwestHttpClient::new()))
            .tool_locator(Arc::new(FixedToolLocator::new()))
    }

    pub fn engine(&self) -> FormulaEngine {
        self.engine_builder().build()
    }

    /// Serve `bytes` at `/dl/<file_name>` and return its URL.
    pub async fn mount_archive(&self, file_name: &str, bytes: Vec<u8>) -> String {
        let route = format!("/dl/{}", file_name);
        Mock::given(method("GET"))
            .and(path(route.clone()))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes))
            .mount(&self.mock_server)
            .await;
        format!("{}{}", self.mock_server.uri(), route)
    }

    /// Serve the sample source tree as `<name>-<version>.tar.gz`.
    ///
    /// Returns the URL and its SHA256 checksum.
    pub async fn mount_sample_source(&self, name: &str, version: &str) -> (String, Checksum) {
        let tarball = sample_source_tarball(name, version);
        let checksum = Checksum::sha256(sha256_hex(&tarball));
        let url = self
            .mount_archive(&format!("{}-{}.tar.gz", name, version), tarball)
            .await;
        (url, checksum)
    }

    /// Answer `/dl/<file_name>` with 404 and return its URL.
    pub async fn mount_404(&self, file_name: &str) -> String {
        let route = format!("/dl/{}", file_name);
        Mock::given(method("GET"))
            .and(path(route.clone()))
            .respond_with(mock_404_error())
            .mount(&self.mock_server)
            .await;
        format!("{}{}", self.mock_server.uri(), route)
    }
}
