use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use anyhow::Context as _;
use async_trait::async_trait;

use crate::formats::ChapterManifest;
use crate::reconcile::RawChapter;
use crate::sites::{SiteAdapter, TitleRef};

pub const DEFAULT_NAME: &str = "manifest";

/// Reads chapter listings from a local YAML or JSON file instead of a website.
///
/// The title reference is the manifest path. Image lists come from the most
/// recently loaded manifest.
pub struct ManifestAdapter {
    name: String,
    images: Mutex<HashMap<String, Vec<String>>>,
}

impl ManifestAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            images: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SiteAdapter for ManifestAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "manifest"
    }

    async fn list_chapters(&self, title: &TitleRef) -> anyhow::Result<Vec<RawChapter>> {
        let path = manifest_path(title);
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("read manifest: {}", path.display()))?;
        let manifest: ChapterManifest = serde_yaml::from_str(&text)
            .with_context(|| format!("parse manifest: {}", path.display()))?;

        tracing::debug!(
            path = %path.display(),
            chapters = manifest.chapters.len(),
            "loaded manifest"
        );

        let mut images = self.images.lock().unwrap_or_else(PoisonError::into_inner);
        images.clear();
        let mut chapters = Vec::with_capacity(manifest.chapters.len());
        for chapter in manifest.chapters {
            images
                .entry(chapter.url.clone())
                .or_insert(chapter.images);
            chapters.push(RawChapter::new(chapter.token, chapter.url));
        }
        Ok(chapters)
    }

    async fn list_chapter_images(&self, chapter_url: &str) -> anyhow::Result<Vec<String>> {
        let images = self.images.lock().unwrap_or_else(PoisonError::into_inner);
        images
            .get(chapter_url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("chapter not listed in manifest: {chapter_url}"))
    }
}

fn manifest_path(title: &TitleRef) -> PathBuf {
    let raw = match title {
        TitleRef::Url(url) => url.strip_prefix("file://").unwrap_or(url),
        TitleRef::Shortname(name) => name,
    };
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_chapters_and_images_from_file() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("title.yaml");
        std::fs::write(
            &path,
            r#"
title: Demo
chapters:
  - token: "Chapter 2"
    url: https://example.test/c2
    images: [https://img.test/2/1.png, https://img.test/2/2.png]
  - token: "Chapter 1"
    url: https://example.test/c1
    images: [https://img.test/1/1.png]
"#,
        )?;

        let adapter = ManifestAdapter::new(DEFAULT_NAME);
        let title = TitleRef::Url(format!("file://{}", path.display()));
        let chapters = adapter.list_chapters(&title).await?;

        assert_eq!(
            chapters,
            [
                RawChapter::new("Chapter 2", "https://example.test/c2"),
                RawChapter::new("Chapter 1", "https://example.test/c1"),
            ]
        );
        assert_eq!(
            adapter.list_chapter_images("https://example.test/c2").await?,
            ["https://img.test/2/1.png", "https://img.test/2/2.png"]
        );
        assert!(adapter.list_chapter_images("https://example.test/c3").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn missing_manifest_is_an_error() {
        let adapter = ManifestAdapter::new(DEFAULT_NAME);
        let err = adapter
            .list_chapters(&TitleRef::Shortname("/nonexistent/manifest.yaml".to_owned()))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("read manifest"));
    }
}
