use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::chapter::{ChapterEntry, ChapterKey};

/// A chapter as reported by a site adapter, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChapter {
    pub token: String,
    pub url: String,
}

impl RawChapter {
    pub fn new(token: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            url: url.into(),
        }
    }
}

/// Inclusive bounds on the integer part of a chapter number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChapterRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl ChapterRange {
    pub fn contains(&self, key: &ChapterKey) -> bool {
        self.start.is_none_or(|start| key.number() >= start)
            && self.end.is_none_or(|end| key.number() <= end)
    }
}

/// Normalizes raw chapter tokens into a key → URL map. Tokens without a
/// chapter number are logged and left out; a repeated key keeps its first URL.
pub fn chapter_map(raw: Vec<RawChapter>) -> BTreeMap<ChapterKey, String> {
    let mut map = BTreeMap::new();
    for chapter in raw {
        let key = match ChapterKey::normalize(&chapter.token) {
            Ok(key) => key,
            Err(err) => {
                tracing::warn!(token = %chapter.token, url = %chapter.url, %err, "skipping chapter");
                continue;
            }
        };
        if let Some(existing) = map.get(&key) {
            tracing::debug!(chapter = %key, kept = %existing, dropped = %chapter.url, "duplicate chapter");
            continue;
        }
        map.insert(key, chapter.url);
    }
    map
}

/// Chapters present remotely but not locally, in ascending key order.
pub fn reconcile(
    remote: &BTreeMap<ChapterKey, String>,
    local: &BTreeSet<ChapterKey>,
) -> Vec<ChapterEntry> {
    remote
        .iter()
        .filter(|(key, _)| !local.contains(key))
        .map(|(key, url)| ChapterEntry {
            key: key.clone(),
            url: url.clone(),
        })
        .collect()
}

pub fn apply_range(queue: Vec<ChapterEntry>, range: ChapterRange) -> Vec<ChapterEntry> {
    queue
        .into_iter()
        .filter(|entry| {
            let keep = range.contains(&entry.key);
            if !keep {
                tracing::debug!(chapter = %entry.key, "outside requested range");
            }
            keep
        })
        .collect()
}
