use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chapter::ChapterKey;

/// Chapter listing handed over by an external discovery script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub chapters: Vec<ManifestChapter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestChapter {
    pub token: String,
    pub url: String,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChapterOutcome {
    Archived {
        path: PathBuf,
        pages: usize,
        failed_pages: usize,
    },
    /// Already present in the destination directory.
    Skipped,
    Failed {
        reason: String,
    },
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChapterReport {
    pub key: ChapterKey,
    pub url: String,
    #[serde(flatten)]
    pub outcome: ChapterOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SummaryCounts {
    pub archived: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub site: String,
    pub title: String,
    pub destination: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub chapters: Vec<ChapterReport>,
}

impl RunSummary {
    pub fn counts(&self) -> SummaryCounts {
        let mut counts = SummaryCounts::default();
        for report in &self.chapters {
            match report.outcome {
                ChapterOutcome::Archived { .. } => counts.archived += 1,
                ChapterOutcome::Skipped => counts.skipped += 1,
                ChapterOutcome::Failed { .. } => counts.failed += 1,
                ChapterOutcome::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// One line per chapter plus a totals line.
    pub fn render_text(&self) -> String {
        let mut out = format!("{} ({})\n", self.title, self.site);
        for report in &self.chapters {
            let line = match &report.outcome {
                ChapterOutcome::Archived {
                    path,
                    pages,
                    failed_pages: 0,
                } => format!("archived  {}  {pages} pages -> {}", report.key, path.display()),
                ChapterOutcome::Archived {
                    path,
                    pages,
                    failed_pages,
                } => format!(
                    "archived  {}  {pages} pages ({failed_pages} missing) -> {}",
                    report.key,
                    path.display()
                ),
                ChapterOutcome::Skipped => format!("skipped   {}  already archived", report.key),
                ChapterOutcome::Failed { reason } => format!("failed    {}  {reason}", report.key),
                ChapterOutcome::Cancelled => format!("cancelled {}", report.key),
            };
            out.push_str(&line);
            out.push('\n');
        }

        let counts = self.counts();
        out.push_str(&format!(
            "archived={} skipped={} failed={} cancelled={}\n",
            counts.archived, counts.skipped, counts.failed, counts.cancelled
        ));
        out
    }
}
