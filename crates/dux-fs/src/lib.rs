//! # dux-fs
//!
//! Semaphore-bounded directory listing (C1). One-shot, blocking enumeration
//! of a directory's immediate children, gated by a process-wide counting
//! semaphore so fan-out from the recursive sizer never opens unbounded
//! directory handles at once.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dux_config::log_fs_warn;
use tokio::sync::Semaphore;

/// Failure of the listing call itself (not a single entry within it).
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("{path}: not found")]
    NotFound { path: PathBuf },
    #[error("{path}: not a directory")]
    NotADirectory { path: PathBuf },
    #[error("{path}: permission denied")]
    PermissionDenied { path: PathBuf },
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FsError {
    fn from_io(path: &Path, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => FsError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => FsError::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}

/// One immediate child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    /// Basename only.
    pub name: String,
    pub is_dir: bool,
    /// Exact byte length for files and symlinks (the link text's length for
    /// a symlink — symlinks are never followed, see DESIGN.md). Always 0 for
    /// directories; the sizer computes their running total separately.
    pub size: u64,
}

/// A process-wide-shareable directory reader. Clone is cheap (the semaphore
/// is reference counted); construct one and share it across every sizer.
#[derive(Clone)]
pub struct DirReader {
    gate: Arc<Semaphore>,
}

impl DirReader {
    /// `capacity` bounds the number of concurrent blocking `read_dir`
    /// enumerations in flight process-wide (spec default: 20).
    pub fn new(capacity: usize) -> Self {
        Self {
            gate: Arc::new(Semaphore::new(capacity.max(1))),
        }
    }

    /// List the immediate children of `path`. Acquires a semaphore permit,
    /// runs the blocking enumeration on a blocking-pool thread, and releases
    /// the permit before returning. Per-entry `metadata()` failures are
    /// logged and the entry dropped; a failure of the listing call itself
    /// (missing path, not a directory, permission denied) is returned as an
    /// error.
    pub async fn list(&self, path: &Path) -> Result<Vec<ChildEntry>, FsError> {
        let permit = self
            .gate
            .clone()
            .acquire_owned()
            .await
            .expect("dux-fs semaphore never closed");
        let path = path.to_path_buf();
        let result = tokio::task::spawn_blocking(move || list_blocking(&path))
            .await
            .expect("dux-fs blocking listing task panicked");
        drop(permit);
        result
    }
}

fn list_blocking(path: &Path) -> Result<Vec<ChildEntry>, FsError> {
    let read_dir = fs::read_dir(path).map_err(|e| FsError::from_io(path, e))?;

    // read_dir succeeding on a non-directory is platform-dependent; guard
    // explicitly so callers get NotADirectory rather than an empty listing.
    match fs::metadata(path) {
        Ok(meta) if !meta.is_dir() => {
            return Err(FsError::NotADirectory {
                path: path.to_path_buf(),
            })
        }
        _ => {}
    }

    let mut children = Vec::new();
    for entry in read_dir {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                log_fs_warn!("failed to read directory entry", path = %path.display(), error = %e);
                continue;
            }
        };

        let name = entry.file_name().to_string_lossy().into_owned();
        let child_path = entry.path();

        let symlink_meta = match fs::symlink_metadata(&child_path) {
            Ok(m) => m,
            Err(e) => {
                log_fs_warn!("stat failed, skipping entry", path = %child_path.display(), error = %e);
                continue;
            }
        };

        if symlink_meta.is_symlink() {
            // Never followed: sized as a plain (non-directory) entry whose
            // size is the link target text's length.
            let len = fs::read_link(&child_path)
                .map(|target| target.to_string_lossy().len() as u64)
                .unwrap_or(0);
            children.push(ChildEntry {
                name,
                is_dir: false,
                size: len,
            });
            continue;
        }

        if symlink_meta.is_dir() {
            children.push(ChildEntry {
                name,
                is_dir: true,
                size: 0,
            });
        } else {
            children.push(ChildEntry {
                name,
                is_dir: false,
                size: symlink_meta.len(),
            });
        }
    }

    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dux_config::testing::TestTree;

    #[tokio::test]
    async fn lists_files_and_dirs() {
        let tree = TestTree::new().unwrap();
        tree.write_file("a.txt", b"hello").unwrap();
        tree.make_dir("sub").unwrap();

        let reader = DirReader::new(4);
        let mut entries = reader.list(tree.root()).await.unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.txt");
        assert!(!entries[0].is_dir);
        assert_eq!(entries[0].size, 5);
        assert_eq!(entries[1].name, "sub");
        assert!(entries[1].is_dir);
    }

    #[tokio::test]
    async fn missing_root_is_not_found() {
        let reader = DirReader::new(4);
        let err = reader
            .list(Path::new("/no/such/path/dux-test"))
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::NotFound { .. }));
    }

    #[tokio::test]
    async fn file_as_root_is_not_a_directory() {
        let tree = TestTree::new().unwrap();
        let file = tree.write_file("plain.txt", b"x").unwrap();

        let reader = DirReader::new(4);
        let err = reader.list(&file).await.unwrap_err();
        assert!(matches!(err, FsError::NotADirectory { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_subdir_skipped_not_fatal() {
        let tree = TestTree::new().unwrap();
        tree.make_dir("locked").unwrap();
        tree.write_file("ok.txt", b"hi").unwrap();
        tree.make_unreadable("locked").unwrap();

        let reader = DirReader::new(4);
        // The root listing itself still succeeds; only descending into
        // `locked` would fail, which is the sizer's concern, not C1's.
        let entries = reader.list(tree.root()).await.unwrap();
        assert!(entries.iter().any(|e| e.name == "ok.txt"));

        // restore permissions so tempdir cleanup can remove it
        #[allow(unused_must_use)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(
                tree.path("locked"),
                std::fs::Permissions::from_mode(0o755),
            );
        }
    }

    #[tokio::test]
    async fn symlink_reported_as_file_with_target_length() {
        let tree = TestTree::new().unwrap();
        tree.make_dir("target_dir").unwrap();
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(tree.path("target_dir"), tree.path("link")).unwrap();
            let reader = DirReader::new(4);
            let entries = reader.list(tree.root()).await.unwrap();
            let link = entries.iter().find(|e| e.name == "link").unwrap();
            assert!(!link.is_dir);
            assert_eq!(link.size, tree.path("target_dir").to_string_lossy().len() as u64);
        }
    }
}
