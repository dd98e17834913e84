use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::fetch::Fetcher;
use crate::reconcile::RawChapter;

pub mod manifest;
pub mod pattern;

pub use manifest::ManifestAdapter;
pub use pattern::{PatternAdapter, PatternSiteConfig};

/// Identifies one title on a site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleRef {
    Url(String),
    Shortname(String),
}

impl fmt::Display for TitleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TitleRef::Url(url) => f.write_str(url),
            TitleRef::Shortname(name) => f.write_str(name),
        }
    }
}

/// Site-specific discovery. Implementations know how to enumerate chapters
/// and resolve a chapter to its image URLs; everything after that is shared.
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> &'static str;

    async fn list_chapters(&self, title: &TitleRef) -> anyhow::Result<Vec<RawChapter>>;

    /// Image URLs in page order.
    async fn list_chapter_images(&self, chapter_url: &str) -> anyhow::Result<Vec<String>>;

    fn image_referer(&self, chapter_url: &str) -> Option<String> {
        Some(chapter_url.to_owned())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SiteConfig {
    Manifest { name: String },
    Pattern(PatternSiteConfig),
}

#[derive(Default)]
pub struct SiteRegistry {
    adapters: BTreeMap<String, Arc<dyn SiteAdapter>>,
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in `manifest` adapter plus every configured site.
    pub fn from_config(sites: &[SiteConfig], fetcher: Arc<Fetcher>) -> anyhow::Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(ManifestAdapter::new(manifest::DEFAULT_NAME)))?;

        for site in sites {
            let adapter: Arc<dyn SiteAdapter> = match site {
                SiteConfig::Manifest { name } => Arc::new(ManifestAdapter::new(name)),
                SiteConfig::Pattern(config) => {
                    Arc::new(PatternAdapter::new(config.clone(), Arc::clone(&fetcher))?)
                }
            };
            registry.register(adapter)?;
        }

        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn SiteAdapter>) -> anyhow::Result<()> {
        let name = adapter.name().to_owned();
        if self.adapters.contains_key(&name) {
            anyhow::bail!("site registered twice: {name}");
        }
        self.adapters.insert(name, adapter);
        Ok(())
    }

    pub fn get(&self, name: &str) -> anyhow::Result<Arc<dyn SiteAdapter>> {
        self.adapters.get(name).cloned().ok_or_else(|| {
            let known = self.adapters.keys().cloned().collect::<Vec<_>>().join(", ");
            anyhow::anyhow!("unknown site: {name} (known: {known})")
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn SiteAdapter>> {
        self.adapters.values()
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::fetch::FetcherOptions;

    fn fetcher() -> Arc<Fetcher> {
        Arc::new(Fetcher::new(FetcherOptions::default(), CancellationToken::new()).unwrap())
    }

    #[test]
    fn registry_includes_manifest_and_configured_sites() {
        let sites: Vec<SiteConfig> = serde_yaml::from_str(
            r#"
- kind: pattern
  name: demo
  title_url_template: "https://demo.test/manga/{shortname}"
  chapter_pattern: 'href="(?P<url>/chapter-[^"]+)"'
  image_pattern: 'src="(?P<url>[^"]+\.png)"'
- kind: manifest
  name: scripted
"#,
        )
        .unwrap();

        let registry = SiteRegistry::from_config(&sites, fetcher()).unwrap();
        let names = registry.iter().map(|a| a.name().to_owned()).collect::<Vec<_>>();
        assert_eq!(names, ["demo", "manifest", "scripted"]);
        assert_eq!(registry.get("demo").unwrap().kind(), "pattern");
    }

    #[test]
    fn duplicate_and_unknown_names_are_errors() {
        let sites = vec![SiteConfig::Manifest {
            name: "manifest".to_owned(),
        }];
        assert!(SiteRegistry::from_config(&sites, fetcher()).is_err());

        let registry = SiteRegistry::from_config(&[], fetcher()).unwrap();
        let err = registry.get("nope").err().unwrap();
        assert!(err.to_string().contains("known: manifest"));
    }
}
