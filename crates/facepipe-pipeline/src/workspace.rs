//! Per-invocation scratch directory.

use std::path::Path;
use tempfile::TempDir;

const WORKSPACE_PREFIX: &str = "facepipe-";

/// A uniquely named directory removed when the invocation ends.
///
/// [`Workspace::close`] removes it and reports failures; if the workspace is
/// dropped instead (early return, unwinding), removal is best-effort.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a fresh directory under `root`, creating `root` if needed.
    pub fn create(root: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(root)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}
