use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::fetch::Fetcher;
use crate::reconcile::RawChapter;
use crate::sites::{SiteAdapter, TitleRef};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSiteConfig {
    pub name: String,
    /// Title page URL with a `{shortname}` placeholder.
    #[serde(default)]
    pub title_url_template: Option<String>,
    /// Matches chapter links on the title page. Group `url` is required,
    /// group `token` is optional and defaults to the URL.
    pub chapter_pattern: String,
    /// Matches image URLs on a chapter page. Group `url` is required, group
    /// `page` is an optional page number.
    pub image_pattern: String,
    #[serde(default)]
    pub sort_by_page: bool,
    #[serde(default)]
    pub referer: Option<String>,
}

/// Regex-driven adapter for sites whose listings are plain HTML.
pub struct PatternAdapter {
    config: PatternSiteConfig,
    chapter_re: Regex,
    image_re: Regex,
    fetcher: Arc<Fetcher>,
}

impl PatternAdapter {
    pub fn new(config: PatternSiteConfig, fetcher: Arc<Fetcher>) -> anyhow::Result<Self> {
        let chapter_re = compile(&config.name, "chapter_pattern", &config.chapter_pattern)?;
        let image_re = compile(&config.name, "image_pattern", &config.image_pattern)?;
        Ok(Self {
            config,
            chapter_re,
            image_re,
            fetcher,
        })
    }

    fn title_url(&self, title: &TitleRef) -> anyhow::Result<String> {
        match title {
            TitleRef::Url(url) => Ok(url.clone()),
            TitleRef::Shortname(shortname) => {
                let template = self.config.title_url_template.as_deref().ok_or_else(|| {
                    anyhow::anyhow!(
                        "site {} has no title_url_template; pass --url instead",
                        self.config.name
                    )
                })?;
                Ok(template.replace("{shortname}", shortname))
            }
        }
    }

    async fn fetch_html(&self, url: &str) -> anyhow::Result<(Url, String)> {
        let base = Url::parse(url).with_context(|| format!("invalid url: {url}"))?;
        let html = self
            .fetcher
            .fetch_page(url)
            .await
            .with_context(|| format!("fetch page: {url}"))?;
        Ok((base, html))
    }
}

#[async_trait]
impl SiteAdapter for PatternAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> &'static str {
        "pattern"
    }

    async fn list_chapters(&self, title: &TitleRef) -> anyhow::Result<Vec<RawChapter>> {
        let title_url = self.title_url(title)?;
        let (base, html) = self.fetch_html(&title_url).await?;
        let chapters = extract_chapters(&self.chapter_re, &base, &html);
        tracing::debug!(site = %self.config.name, url = %title_url, chapters = chapters.len(), "listed chapters");
        Ok(chapters)
    }

    async fn list_chapter_images(&self, chapter_url: &str) -> anyhow::Result<Vec<String>> {
        let (base, html) = self.fetch_html(chapter_url).await?;
        let images = extract_images(&self.image_re, &base, &html, self.config.sort_by_page);
        tracing::debug!(site = %self.config.name, url = %chapter_url, images = images.len(), "listed images");
        Ok(images)
    }

    fn image_referer(&self, chapter_url: &str) -> Option<String> {
        Some(
            self.config
                .referer
                .clone()
                .unwrap_or_else(|| chapter_url.to_owned()),
        )
    }
}

fn compile(site: &str, field: &str, pattern: &str) -> anyhow::Result<Regex> {
    let re = Regex::new(pattern).with_context(|| format!("site {site}: invalid {field}"))?;
    if !re.capture_names().flatten().any(|name| name == "url") {
        anyhow::bail!("site {site}: {field} needs a named group `url`");
    }
    Ok(re)
}

fn resolve(base: &Url, raw: &str) -> Option<String> {
    let unescaped = raw.trim().replace("&amp;", "&");
    match base.join(&unescaped) {
        Ok(url) => Some(url.to_string()),
        Err(err) => {
            tracing::debug!(raw, %err, "skipping unresolvable link");
            None
        }
    }
}

fn extract_chapters(re: &Regex, base: &Url, html: &str) -> Vec<RawChapter> {
    re.captures_iter(html)
        .filter_map(|caps| {
            let url = resolve(base, caps.name("url")?.as_str())?;
            let token = caps
                .name("token")
                .map(|m| m.as_str().trim().to_owned())
                .unwrap_or_else(|| url.clone());
            Some(RawChapter { token, url })
        })
        .collect()
}

/// Image URLs in document order, de-duplicated keeping the first occurrence.
/// With `sort_by_page`, entries are stably ordered by the `page` group and
/// entries without one go last.
fn extract_images(re: &Regex, base: &Url, html: &str, sort_by_page: bool) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut images = Vec::new();
    for caps in re.captures_iter(html) {
        let Some(url) = caps.name("url").and_then(|m| resolve(base, m.as_str())) else {
            continue;
        };
        if !seen.insert(url.clone()) {
            continue;
        }
        let page = caps.name("page").and_then(|m| m.as_str().parse::<u64>().ok());
        images.push((page, url));
    }

    if sort_by_page {
        images.sort_by_key(|(page, _)| page.unwrap_or(u64::MAX));
    }
    images.into_iter().map(|(_, url)| url).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://demo.test/manga/title/").unwrap()
    }

    #[test]
    fn chapters_resolve_relative_links_and_default_token_to_url() {
        let re = Regex::new(r#"<a href="(?P<url>[^"]*chapter-[^"]+)">(?:(?P<token>[^<]+))?</a>"#)
            .unwrap();
        let html = r#"
            <a href="/manga/title/chapter-2">Chapter 2</a>
            <a href="chapter-1.5"></a>
        "#;

        let chapters = extract_chapters(&re, &base(), html);
        assert_eq!(
            chapters,
            [
                RawChapter::new("Chapter 2", "https://demo.test/manga/title/chapter-2"),
                RawChapter::new(
                    "https://demo.test/manga/title/chapter-1.5",
                    "https://demo.test/manga/title/chapter-1.5"
                ),
            ]
        );
    }

    #[test]
    fn images_are_unescaped_and_deduplicated() {
        let re = Regex::new(r#"<img[^>]*src="(?P<url>[^"]+)""#).unwrap();
        let html = r#"
            <img src="https://cdn.test/1.png?a=1&amp;b=2">
            <img class="x" src="/2.png">
            <img src="https://cdn.test/1.png?a=1&b=2">
        "#;

        assert_eq!(
            extract_images(&re, &base(), html, false),
            ["https://cdn.test/1.png?a=1&b=2", "https://demo.test/2.png"]
        );
    }

    #[test]
    fn images_sort_by_page_group() {
        let re = Regex::new(r#"id="image-(?P<page>\d+)"[^>]*src="(?P<url>[^"]+)""#).unwrap();
        let html = r#"
            <img id="image-10" src="/p10.jpg">
            <img id="image-2" src="/p2.jpg">
            <img id="image-1" src="/p1.jpg">
        "#;

        let sorted = extract_images(&re, &base(), html, true);
        assert_eq!(
            sorted,
            [
                "https://demo.test/p1.jpg",
                "https://demo.test/p2.jpg",
                "https://demo.test/p10.jpg"
            ]
        );

        let unsorted = extract_images(&re, &base(), html, false);
        assert_eq!(unsorted[0], "https://demo.test/p10.jpg");
    }

    #[test]
    fn patterns_need_a_url_group() {
        assert!(compile("demo", "image_pattern", r#"src="([^"]+)""#).is_err());
        assert!(compile("demo", "image_pattern", r#"src="(?P<url>[^"]+)""#).is_ok());
        assert!(compile("demo", "image_pattern", r"(?P<url>[").is_err());
    }
}
