//! Path normalization utilities for the cache key space.
//!
//! Every path the cache registry keys on must be absolute and normalised:
//! `.`/`..` components eliminated and redundant separators collapsed,
//! without touching the filesystem (so a still-resolving subtree never
//! blocks or fails normalisation). Case is preserved — filesystems may be
//! case-sensitive.

use std::path::{Component, Path, PathBuf};

/// Lexically normalise a path: collapse `.` and redundant separators, and
/// resolve `..` against earlier components without consulting the filesystem.
/// A leading `..` past the root is dropped rather than producing an
/// out-of-tree path.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                match out.components().next_back() {
                    Some(Component::Normal(_)) => {
                        out.pop();
                    }
                    Some(Component::RootDir) | None => {}
                    _ => out.push(component),
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Resolve `path` to an absolute, normalised form relative to the current
/// working directory. Returns an error if the current directory cannot be
/// determined (the only failure mode for a purely lexical join).
pub fn resolve_absolute(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(normalize(&absolute))
}

/// Join a normalised parent path with a single child component and
/// re-normalise. Used by the sizer when it descends into a subdirectory.
pub fn join_child(parent: &Path, child: &str) -> PathBuf {
    normalize(&parent.join(child))
}

/// Whether `path` is `prefix` itself or a descendant of it (`prefix` followed
/// by a path separator). Both arguments are assumed already normalised.
pub fn is_prefix_or_equal(path: &Path, prefix: &Path) -> bool {
    path == prefix || path.starts_with(prefix)
}
