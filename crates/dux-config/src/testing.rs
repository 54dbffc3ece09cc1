//! Test tree builder for isolated filesystem fixtures.
//!
//! # Usage
//!
//! ```
//! use dux_config::testing::TestTree;
//!
//! let tree = TestTree::new().unwrap();
//! tree.write_file("a.txt", b"hello").unwrap();
//! tree.make_dir("sub").unwrap();
//! tree.write_file("sub/b.txt", b"world").unwrap();
//! assert!(tree.path("sub/b.txt").exists());
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// An isolated temporary directory tree for engine tests.
pub struct TestTree {
    _temp_dir: TempDir,
    root: PathBuf,
    pub test_id: u32,
}

impl TestTree {
    pub fn new() -> std::io::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().to_path_buf();
        Ok(Self {
            _temp_dir: temp_dir,
            root,
            test_id,
        })
    }

    /// Absolute root of this tree.
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Resolve a relative path within the tree.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Create a file (and any missing parent directories) with the given contents.
    pub fn write_file(&self, relative: &str, contents: &[u8]) -> std::io::Result<PathBuf> {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Create a directory (and any missing parents).
    pub fn make_dir(&self, relative: &str) -> std::io::Result<PathBuf> {
        let path = self.root.join(relative);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Make `relative` unreadable by stripping execute (traversal) permission.
    /// No-op on platforms without unix permission bits.
    #[cfg(unix)]
    pub fn make_unreadable(&self, relative: &str) -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let path = self.root.join(relative);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o000))
    }
}
