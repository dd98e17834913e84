use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::fs;

use crate::chapter::{ARCHIVE_EXTENSION, ChapterKey};

/// Destination for finished chapter archives. Append-only: existing archives
/// are reported, never replaced.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    fn dir(&self) -> &Path;

    fn archive_path(&self, key: &ChapterKey) -> PathBuf;

    async fn existing_keys(&self) -> anyhow::Result<BTreeSet<ChapterKey>>;

    /// Archives the pages in `pages_dir` under `key`; returns the archive path
    /// and the number of entries written.
    async fn commit(&self, key: &ChapterKey, pages_dir: &Path) -> anyhow::Result<(PathBuf, usize)>;
}

#[derive(Debug, Clone)]
pub struct LocalFsArchiveStore {
    dir: PathBuf,
}

impl LocalFsArchiveStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ArchiveStore for LocalFsArchiveStore {
    fn dir(&self) -> &Path {
        &self.dir
    }

    fn archive_path(&self, key: &ChapterKey) -> PathBuf {
        self.dir.join(key.archive_name())
    }

    async fn existing_keys(&self) -> anyhow::Result<BTreeSet<ChapterKey>> {
        let names = list_local_archives(&self.dir).await?;
        let mut keys = BTreeSet::new();
        for name in names {
            match ChapterKey::from_archive_name(&name) {
                Some(key) => {
                    keys.insert(key);
                }
                None => tracing::debug!(file = %name, "ignoring archive with unrecognized name"),
            }
        }
        Ok(keys)
    }

    async fn commit(&self, key: &ChapterKey, pages_dir: &Path) -> anyhow::Result<(PathBuf, usize)> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create destination dir: {}", self.dir.display()))?;

        let archive_path = self.archive_path(key);
        let pages_dir = pages_dir.to_path_buf();
        let archive_path_for_blocking = archive_path.clone();

        let count = tokio::task::spawn_blocking(move || {
            crate::archive::build_archive(&pages_dir, &archive_path_for_blocking)
        })
        .await
        .context("join archive task")??;

        Ok((archive_path, count))
    }
}

/// File names of `.cbz` archives directly inside `dir`. A missing directory
/// has no archives.
pub async fn list_local_archives(dir: &Path) -> anyhow::Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(err) => {
            return Err(err).with_context(|| format!("read archive dir: {}", dir.display()));
        }
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("list archive dir: {}", dir.display()))?
    {
        let file_type = entry.file_type().await.context("read file type")?;
        if !file_type.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_archive = Path::new(&name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION));
        if is_archive {
            names.insert(name);
        }
    }

    Ok(names)
}
