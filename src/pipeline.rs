use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::archive_store::ArchiveStore;
use crate::chapter::{ChapterEntry, page_file_name};
use crate::fetch::{FetchError, Fetcher};
use crate::formats::{ChapterOutcome, ChapterReport, RunSummary};
use crate::image_format::{DetectError, detect};
use crate::normalize::{DEFAULT_JPEG_QUALITY, NormalizeError, normalize};
use crate::reconcile::{ChapterRange, apply_range, chapter_map, reconcile};
use crate::scratch::ScratchDir;
use crate::sites::{SiteAdapter, TitleRef};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub jpeg_quality: u8,
    /// Chapters processed at once. Images within a chapter are always
    /// fetched one at a time.
    pub chapter_concurrency: usize,
    pub scratch_root: Option<PathBuf>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            chapter_concurrency: 1,
            scratch_root: None,
        }
    }
}

/// Reconciled work for one title.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub queue: Vec<ChapterEntry>,
    /// In range and already archived.
    pub present: Vec<ChapterEntry>,
}

#[derive(Debug, thiserror::Error)]
enum PageError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error("normalize task failed")]
    Task(#[from] tokio::task::JoinError),
}

pub struct Pipeline {
    fetcher: Arc<Fetcher>,
    store: Arc<dyn ArchiveStore>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(fetcher: Arc<Fetcher>, store: Arc<dyn ArchiveStore>, options: PipelineOptions) -> Self {
        Self {
            fetcher,
            store,
            options,
        }
    }

    fn cancel(&self) -> &CancellationToken {
        self.fetcher.cancel_token()
    }

    pub async fn plan(
        &self,
        site: &dyn SiteAdapter,
        title: &TitleRef,
        range: ChapterRange,
    ) -> anyhow::Result<Plan> {
        let raw = site
            .list_chapters(title)
            .await
            .with_context(|| format!("list chapters of {title} on {}", site.name()))?;
        let remote = chapter_map(raw);
        let local = self.store.existing_keys().await.context("list local archives")?;

        let queue = apply_range(reconcile(&remote, &local), range);
        let present = remote
            .iter()
            .filter(|(key, _)| local.contains(*key) && range.contains(key))
            .map(|(key, url)| ChapterEntry {
                key: key.clone(),
                url: url.clone(),
            })
            .collect();

        tracing::info!(
            site = site.name(),
            %title,
            remote = remote.len(),
            local = local.len(),
            queued = queue.len(),
            "reconciled chapters"
        );
        Ok(Plan { queue, present })
    }

    /// Archives every missing chapter of `title`.
    ///
    /// Per-image and per-chapter problems end up in the summary. Errors that
    /// mean the destination or scratch space is unusable stop new chapters
    /// from starting and are returned once in-flight chapters finish.
    pub async fn run(
        &self,
        site: Arc<dyn SiteAdapter>,
        title: &TitleRef,
        range: ChapterRange,
    ) -> anyhow::Result<RunSummary> {
        let started_at = Utc::now();
        let plan = self.plan(site.as_ref(), title, range).await?;

        let mut reports = plan
            .present
            .into_iter()
            .map(|entry| ChapterReport {
                key: entry.key,
                url: entry.url,
                outcome: ChapterOutcome::Skipped,
            })
            .collect::<Vec<_>>();

        let worker = ChapterWorker {
            fetcher: Arc::clone(&self.fetcher),
            store: Arc::clone(&self.store),
            site: Arc::clone(&site),
            options: self.options.clone(),
        };
        let (archived, abort) = self.process_queue(worker, plan.queue).await;
        reports.extend(archived);
        reports.sort_by(|a, b| a.key.cmp(&b.key));

        if let Some(err) = abort {
            return Err(err);
        }

        Ok(RunSummary {
            site: site.name().to_owned(),
            title: title.to_string(),
            destination: self.store.dir().to_path_buf(),
            started_at,
            finished_at: Utc::now(),
            chapters: reports,
        })
    }

    async fn process_queue(
        &self,
        worker: ChapterWorker,
        queue: Vec<ChapterEntry>,
    ) -> (Vec<ChapterReport>, Option<anyhow::Error>) {
        let semaphore = Arc::new(Semaphore::new(self.options.chapter_concurrency.max(1)));
        // Cancelled by a chapter that hit a resource error, before it gives
        // back its permit.
        let halt = self.cancel().child_token();
        let mut tasks = JoinSet::new();
        let mut reports = Vec::with_capacity(queue.len());
        let mut abort = None;
        let mut pending = queue.into_iter();

        for entry in pending.by_ref() {
            let permit = tokio::select! {
                biased;
                _ = halt.cancelled() => {
                    reports.push(cancelled(entry));
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                reports.push(cancelled(entry));
                break;
            };

            while let Some(joined) = tasks.try_join_next() {
                record(joined, &mut reports, &mut abort);
            }
            if abort.is_some() || halt.is_cancelled() {
                reports.push(cancelled(entry));
                break;
            }

            let worker = worker.clone();
            let halt = halt.clone();
            tasks.spawn(async move {
                let result = worker.archive_chapter(&entry).await;
                if result.is_err() {
                    halt.cancel();
                }
                drop(permit);
                (entry, result)
            });
        }

        reports.extend(pending.map(cancelled));
        while let Some(joined) = tasks.join_next().await {
            record(joined, &mut reports, &mut abort);
        }

        (reports, abort)
    }
}

fn cancelled(entry: ChapterEntry) -> ChapterReport {
    ChapterReport {
        key: entry.key,
        url: entry.url,
        outcome: ChapterOutcome::Cancelled,
    }
}

fn record(
    joined: Result<(ChapterEntry, anyhow::Result<ChapterOutcome>), tokio::task::JoinError>,
    reports: &mut Vec<ChapterReport>,
    abort: &mut Option<anyhow::Error>,
) {
    let (entry, result) = match joined {
        Ok(done) => done,
        Err(err) => {
            tracing::error!(?err, "chapter task panicked");
            abort.get_or_insert_with(|| anyhow::anyhow!("chapter task failed: {err}"));
            return;
        }
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!(chapter = %entry.key, ?err, "aborting run");
            let outcome = ChapterOutcome::Failed {
                reason: format!("{err:#}"),
            };
            abort.get_or_insert(err);
            outcome
        }
    };
    reports.push(ChapterReport {
        key: entry.key,
        url: entry.url,
        outcome,
    });
}

#[derive(Clone)]
struct ChapterWorker {
    fetcher: Arc<Fetcher>,
    store: Arc<dyn ArchiveStore>,
    site: Arc<dyn SiteAdapter>,
    options: PipelineOptions,
}

impl ChapterWorker {
    /// `Err` is reserved for resource errors that should stop the run.
    async fn archive_chapter(&self, entry: &ChapterEntry) -> anyhow::Result<ChapterOutcome> {
        let key = &entry.key;
        let cancel = self.fetcher.cancel_token();
        if cancel.is_cancelled() {
            return Ok(ChapterOutcome::Cancelled);
        }
        tracing::info!(chapter = %key, url = %entry.url, "downloading chapter");

        let images = match self.site.list_chapter_images(&entry.url).await {
            Ok(images) => images,
            Err(_) if cancel.is_cancelled() => return Ok(ChapterOutcome::Cancelled),
            Err(err) => {
                tracing::warn!(chapter = %key, ?err, "could not list images");
                return Ok(ChapterOutcome::Failed {
                    reason: format!("list images: {err:#}"),
                });
            }
        };
        if images.is_empty() {
            tracing::warn!(chapter = %key, "chapter lists no images");
            return Ok(ChapterOutcome::Failed {
                reason: "no images listed".to_owned(),
            });
        }

        let scratch = ScratchDir::create(self.options.scratch_root.as_deref(), key)?;
        let referer = self.site.image_referer(&entry.url);

        let mut written = 0_usize;
        let mut failed = 0_usize;
        for (idx, url) in images.iter().enumerate() {
            let position = idx + 1;
            match self.page_jpeg(url, referer.as_deref()).await {
                Ok(jpeg) => {
                    let path = scratch.join(&page_file_name(position));
                    tokio::fs::write(&path, jpeg)
                        .await
                        .with_context(|| format!("write page: {}", path.display()))?;
                    written += 1;
                }
                Err(PageError::Fetch(FetchError::Cancelled)) => {
                    tracing::info!(chapter = %key, "cancelled; discarding scratch dir");
                    scratch.close();
                    return Ok(ChapterOutcome::Cancelled);
                }
                Err(err) => {
                    tracing::warn!(chapter = %key, page = position, %url, error = %err, "skipping page");
                    failed += 1;
                }
            }
        }

        if written == 0 {
            scratch.close();
            tracing::warn!(chapter = %key, "no pages downloaded; not archiving");
            return Ok(ChapterOutcome::Failed {
                reason: "no pages downloaded".to_owned(),
            });
        }

        let committed = self.store.commit(key, scratch.path()).await;
        scratch.close();
        let (path, pages) = committed.with_context(|| format!("archive {key}"))?;

        tracing::info!(chapter = %key, pages, failed, path = %path.display(), "archived chapter");
        Ok(ChapterOutcome::Archived {
            path,
            pages,
            failed_pages: failed,
        })
    }

    async fn page_jpeg(&self, url: &str, referer: Option<&str>) -> Result<Vec<u8>, PageError> {
        let bytes = self.fetcher.fetch_image(url, referer).await?;
        let format = detect(&bytes)?;
        let quality = self.options.jpeg_quality;
        let jpeg = tokio::task::spawn_blocking(move || normalize(bytes, format, quality)).await??;
        Ok(jpeg)
    }
}
