use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::debug;
use xz2::read::XzDecoder;

use bk_core::ExtractError;
use bk_core::formula::archive_stem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    Gzip,
    Xz,
    Zstd,
    None,
}

impl Compression {
    fn from_file_name(name: &str) -> Option<Self> {
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::Gzip)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::Xz)
        } else if name.ends_with(".tar.zst") {
            Some(Self::Zstd)
        } else if name.ends_with(".tar") {
            Some(Self::None)
        } else {
            None
        }
    }
}

/// Unpack `archive` into `work_dir` and return its source directory.
///
/// The source directory is `work_dir/<archive name without suffix>`
/// (`nginx-1.0.14.tar.gz` unpacks to `nginx-1.0.14/`). Any existing tree at
/// that path is removed first.
pub fn extract(archive: &Path, work_dir: &Path) -> Result<PathBuf, ExtractError> {
    let unsupported = || ExtractError::UnsupportedFormat {
        archive: archive.to_path_buf(),
    };

    let name = archive.file_name().and_then(|n| n.to_str()).ok_or_else(unsupported)?;
    let compression = Compression::from_file_name(name).ok_or_else(unsupported)?;
    let stem = archive_stem(name).ok_or_else(unsupported)?;
    let target = work_dir.join(stem);

    if target.exists() {
        debug!(path = %target.display(), "removing previous source tree");
        fs::remove_dir_all(&target).map_err(|e| io_error(&target, e))?;
    }
    fs::create_dir_all(work_dir).map_err(|e| io_error(work_dir, e))?;

    let file = File::open(archive).map_err(|e| io_error(archive, e))?;
    let reader = BufReader::new(file);
    let corrupt = |e: std::io::Error| ExtractError::CorruptArchive {
        archive: archive.to_path_buf(),
        message: e.to_string(),
    };

    let decoder: Box<dyn Read> = match compression {
        Compression::Gzip => Box::new(GzDecoder::new(reader)),
        Compression::Xz => Box::new(XzDecoder::new(reader)),
        Compression::Zstd => Box::new(zstd::stream::read::Decoder::with_buffer(reader).map_err(corrupt)?),
        Compression::None => Box::new(reader),
    };

    let mut tar = Archive::new(decoder);
    tar.set_preserve_permissions(true);
    tar.set_overwrite(true);
    tar.unpack(work_dir).map_err(corrupt)?;

    if !target.is_dir() {
        return Err(ExtractError::MissingSourceDir {
            archive: archive.to_path_buf(),
            expected: target,
        });
    }

    debug!(archive = %archive.display(), path = %target.display(), "extracted");
    Ok(target)
}

fn io_error(path: &Path, e: std::io::Error) -> ExtractError {
    ExtractError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}
