//! Checksum verification for downloaded files.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::Digest;
use tracing::debug;

use bk_core::{Checksum, DigestAlgorithm, IntegrityError};

const BUFFER_SIZE: usize = 64 * 1024;

/// Check that the file at `path` hashes to `checksum`.
///
/// The file is streamed through the hasher, never loaded whole. Digests are
/// compared as lowercase hex.
pub fn verify(path: &Path, checksum: &Checksum) -> Result<(), IntegrityError> {
    let actual = file_digest(path, checksum.algorithm)?;
    let expected = checksum.digest.to_ascii_lowercase();

    if actual != expected {
        return Err(IntegrityError::Mismatch {
            file: path.display().to_string(),
            algorithm: checksum.algorithm,
            expected,
            actual,
        });
    }

    debug!(file = %path.display(), %checksum, "checksum verified");
    Ok(())
}

/// Lowercase hex digest of a file.
pub fn file_digest(path: &Path, algorithm: DigestAlgorithm) -> Result<String, IntegrityError> {
    let file = File::open(path).map_err(|e| unreadable(path, e))?;

    match algorithm {
        DigestAlgorithm::Md5 => hash_reader::<md5::Md5>(file),
        DigestAlgorithm::Sha1 => hash_reader::<sha1::Sha1>(file),
        DigestAlgorithm::Sha256 => hash_reader::<sha2::Sha256>(file),
    }
    .map_err(|e| unreadable(path, e))
}

/// Lowercase hex digest of an in-memory buffer.
pub fn bytes_digest(data: &[u8], algorithm: DigestAlgorithm) -> String {
    match algorithm {
        DigestAlgorithm::Md5 => to_hex(&md5::Md5::digest(data)),
        DigestAlgorithm::Sha1 => to_hex(&sha1::Sha1::digest(data)),
        DigestAlgorithm::Sha256 => to_hex(&sha2::Sha256::digest(data)),
    }
}

fn hash_reader<D: Digest>(mut reader: impl Read) -> std::io::Result<String> {
    let mut hasher = D::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(to_hex(&hasher.finalize()))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn unreadable(path: &Path, e: std::io::Error) -> IntegrityError {
    IntegrityError::Unreadable {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}
