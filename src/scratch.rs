use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::chapter::ChapterKey;

/// Exclusively owned working directory for one chapter.
///
/// The directory and everything in it is removed when the value is dropped,
/// on every exit path including task cancellation.
#[derive(Debug)]
pub struct ScratchDir {
    dir: tempfile::TempDir,
}

impl ScratchDir {
    pub fn create(root: Option<&Path>, key: &ChapterKey) -> anyhow::Result<Self> {
        let mut builder = tempfile::Builder::new();
        let prefix = format!("{key}-");
        builder.prefix(&prefix);

        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)
                    .with_context(|| format!("create scratch root: {}", root.display()))?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .with_context(|| format!("create scratch dir for {key}"))?;

        tracing::debug!(chapter = %key, path = %dir.path().display(), "created scratch dir");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Removes the directory now, reporting failures instead of ignoring them.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => tracing::debug!(path = %path.display(), "removed scratch dir"),
            Err(err) => tracing::warn!(path = %path.display(), ?err, "failed to remove scratch dir"),
        }
    }
}
