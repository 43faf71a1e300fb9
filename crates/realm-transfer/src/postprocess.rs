//! What happens to a file after a successful transfer: tar extraction or
//! relocation to `movedir`.
//!
//! Grounded on `original_source/datasink/datasink.py` (`server.xfer_file`'s
//! post-transfer block), using the `tar`/`flate2` crates in place of
//! Python's `tarfile` module, and `libc::EXDEV` to give the `movedir` path
//! the same cross-filesystem fallback `shutil.move` gives the original.

use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::error::TransferError;

fn is_tarfile(filename: &str) -> bool {
    let lower = filename.to_ascii_lowercase();
    lower.ends_with(".tar") || lower.ends_with(".tgz") || lower.ends_with(".tar.gz")
}

/// Runs the post-transfer step for a successfully-received file at
/// `dst_path`. If `unpack_tarfiles` is set and the name looks like a tar
/// archive, extracts it into `movedir` (or alongside the archive if
/// `movedir` is `None`) and removes the archive; otherwise, if `movedir`
/// is set, relocates the file there unchanged.
pub fn postprocess(dst_path: &Path, unpack_tarfiles: bool, movedir: Option<&Path>) -> Result<(), TransferError> {
    let filename = dst_path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default();
    let dst_dir = dst_path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));

    if unpack_tarfiles && is_tarfile(&filename) {
        let extract_dir = movedir.unwrap_or(&dst_dir);
        extract_tarfile(dst_path, extract_dir)?;
        std::fs::remove_file(dst_path).map_err(|source| TransferError::Move {
            from: dst_path.display().to_string(),
            to: "(removed after extraction)".to_string(),
            source,
        })?;
    } else if let Some(movedir) = movedir {
        let move_path = movedir.join(&filename);
        move_file(dst_path, &move_path)?;
    }

    log::info!("unpack/move completed");
    Ok(())
}

/// Moves `from` to `to`, falling back to copy-then-delete when `rename`
/// fails across filesystems (`EXDEV`) -- the same fallback `shutil.move`
/// gives the original for free, needed here since `datadir` and `movedir`
/// commonly sit on different filesystems (e.g. local staging to an NFS
/// archive).
fn move_file(from: &Path, to: &Path) -> Result<(), TransferError> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            std::fs::copy(from, to).map_err(|source| TransferError::Move {
                from: from.display().to_string(),
                to: to.display().to_string(),
                source,
            })?;
            std::fs::remove_file(from).map_err(|source| TransferError::Move {
                from: from.display().to_string(),
                to: to.display().to_string(),
                source,
            })
        }
        Err(source) => Err(TransferError::Move {
            from: from.display().to_string(),
            to: to.display().to_string(),
            source,
        }),
    }
}

fn extract_tarfile(archive_path: &Path, extract_dir: &Path) -> Result<(), TransferError> {
    std::fs::create_dir_all(extract_dir).map_err(|source| TransferError::Unpack {
        path: archive_path.display().to_string(),
        source,
    })?;

    let file = File::open(archive_path).map_err(|source| TransferError::Unpack {
        path: archive_path.display().to_string(),
        source,
    })?;

    let filename = archive_path.file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_default();
    let lower = filename.to_ascii_lowercase();

    if lower.ends_with(".tgz") || lower.ends_with(".tar.gz") {
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive.unpack(extract_dir).map_err(|source| TransferError::Unpack {
            path: archive_path.display().to_string(),
            source,
        })
    } else {
        let mut archive = tar::Archive::new(file);
        archive.unpack(extract_dir).map_err(|source| TransferError::Unpack {
            path: archive_path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_tar_extensions() {
        assert!(is_tarfile("foo.tar"));
        assert!(is_tarfile("foo.tgz"));
        assert!(is_tarfile("foo.tar.gz"));
        assert!(is_tarfile("FOO.TAR"));
        assert!(!is_tarfile("foo.fits"));
    }

    #[test]
    fn moves_non_archive_when_movedir_set() {
        let src_dir = std::env::temp_dir().join(format!("realm-transfer-test-src-{}", std::process::id()));
        let dst_dir = std::env::temp_dir().join(format!("realm-transfer-test-dst-{}", std::process::id()));
        std::fs::create_dir_all(&src_dir).unwrap();
        std::fs::create_dir_all(&dst_dir).unwrap();

        let file_path = src_dir.join("data.fits");
        std::fs::write(&file_path, b"payload").unwrap();

        postprocess(&file_path, false, Some(&dst_dir)).unwrap();

        assert!(!file_path.exists());
        assert!(dst_dir.join("data.fits").exists());

        std::fs::remove_dir_all(&src_dir).ok();
        std::fs::remove_dir_all(&dst_dir).ok();
    }
}
