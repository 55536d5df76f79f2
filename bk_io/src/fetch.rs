//! Download of source archives, option resources and remote patches.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use bk_core::formula::url_basename;
use bk_core::{DigestAlgorithm, FetchError};

use crate::integrity::bytes_digest;
use crate::traits::HttpClient;

/// Hex characters of the URL digest used to key a download directory.
const URL_KEY_LEN: usize = 16;

/// Downloads files into `<work_root>/downloads/<url key>/<basename>`.
///
/// The key is a prefix of the URL's sha256, so two URLs sharing a basename
/// never share a file. A file that already exists at its destination is
/// reused without touching the network; integrity verification catches a
/// stale copy.
#[derive(Clone)]
pub struct Fetcher {
    client: Arc<dyn HttpClient>,
    downloads_dir: PathBuf,
    timeout: Option<Duration>,
}

/// Outcome of a [`Fetcher::fetch`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub path: PathBuf,
    /// Bytes downloaded, or `None` when an existing file was reused.
    pub downloaded: Option<u64>,
}

impl Fetcher {
    pub fn new(client: Arc<dyn HttpClient>, work_root: &Path) -> Self {
        Self {
            client,
            downloads_dir: work_root.join("downloads"),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Where `url` is stored once fetched.
    pub fn destination(&self, url: &str) -> Result<PathBuf, FetchError> {
        let name = url_basename(url)
            .filter(|n| *n != "." && *n != "..")
            .ok_or_else(|| FetchError::InvalidUrl {
                url: url.to_string(),
            })?;
        let mut key = bytes_digest(url.as_bytes(), DigestAlgorithm::Sha256);
        key.truncate(URL_KEY_LEN);
        Ok(self.downloads_dir.join(key).join(name))
    }

    pub async fn fetch(&self, url: &str) -> Result<Fetched, FetchError> {
        let dest = self.destination(url)?;
        let dir = dest.parent().unwrap_or(self.downloads_dir.as_path()).to_path_buf();

        if dest.is_file() {
            warn!(url, path = %dest.display(), "reusing existing download");
            return Ok(Fetched {
                path: dest,
                downloaded: None,
            });
        }

        std::fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;

        debug!(url, "downloading");
        let body = match self.timeout {
            Some(timeout) => self.client.get_with_timeout(url, timeout).await?,
            None => self.client.get(url).await?,
        };

        // Write beside the destination so the final rename never crosses filesystems
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| io_error(&dir, e))?;
        tmp.write_all(&body).map_err(|e| io_error(tmp.path(), e))?;
        tmp.flush().map_err(|e| io_error(tmp.path(), e))?;
        tmp.persist(&dest).map_err(|e| io_error(&dest, e.error))?;

        debug!(url, bytes = body.len(), path = %dest.display(), "download complete");
        Ok(Fetched {
            path: dest,
            downloaded: Some(body.len() as u64),
        })
    }
}

fn io_error(path: &Path, e: std::io::Error) -> FetchError {
    FetchError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}
