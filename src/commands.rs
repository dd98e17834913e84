use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use crate::archive_store::LocalFsArchiveStore;
use crate::chapter::ChapterKey;
use crate::cli::{BatchArgs, DownloadArgs, InspectArgs, KeyArgs, PackArgs};
use crate::config::Config;
use crate::fetch::Fetcher;
use crate::formats::RunSummary;
use crate::pipeline::{Pipeline, PipelineOptions};
use crate::reconcile::ChapterRange;
use crate::sites::{SiteRegistry, TitleRef};

/// Shared state for commands that talk to sites.
struct Session {
    config: Config,
    fetcher: Arc<Fetcher>,
    registry: SiteRegistry,
}

impl Session {
    fn new(config: Config, cancel: CancellationToken) -> anyhow::Result<Self> {
        let fetcher = Arc::new(Fetcher::new(config.fetcher_options(), cancel)?);
        let registry = SiteRegistry::from_config(&config.sites, Arc::clone(&fetcher))
            .context("register sites")?;
        Ok(Self {
            config,
            fetcher,
            registry,
        })
    }

    fn pipeline(&self, destination: &Path, options: PipelineOptions) -> Pipeline {
        Pipeline::new(
            Arc::clone(&self.fetcher),
            Arc::new(LocalFsArchiveStore::new(destination)),
            options,
        )
    }
}

pub async fn download(
    config: Config,
    args: DownloadArgs,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let session = Session::new(config, cancel)?;
    let site = session.registry.get(&args.site)?;
    let title = match (args.url, args.shortname) {
        (Some(url), _) => TitleRef::Url(url),
        (None, Some(shortname)) => TitleRef::Shortname(shortname),
        (None, None) => anyhow::bail!("pass --url or --shortname"),
    };
    let range = ChapterRange {
        start: args.start,
        end: args.end,
    };

    let mut options = session.config.pipeline_options();
    if let Some(concurrency) = args.concurrency {
        options.chapter_concurrency = concurrency.max(1);
    }
    if let Some(quality) = args.quality {
        options.jpeg_quality = quality;
    }
    let destination = args
        .out
        .unwrap_or_else(|| session.config.destination.clone());
    let pipeline = session.pipeline(&destination, options);

    if args.dry_run {
        let plan = pipeline.plan(site.as_ref(), &title, range).await?;
        if args.json {
            let json = serde_json::to_string_pretty(&plan).context("serialize plan")?;
            println!("{json}");
        } else {
            for entry in &plan.queue {
                println!("{}\t{}", entry.key.archive_name(), entry.url);
            }
        }
        return Ok(());
    }

    let summary = pipeline.run(site, &title, range).await?;
    print_summaries(&[summary], args.json)
}

/// Runs every configured title. A title that cannot be processed is logged and
/// the batch continues; the batch fails if any title did.
pub async fn batch(config: Config, args: BatchArgs, cancel: CancellationToken) -> anyhow::Result<()> {
    if config.titles.is_empty() {
        anyhow::bail!("no titles configured");
    }
    let session = Session::new(config, cancel.clone())?;
    let options = session.config.pipeline_options();

    let mut summaries = Vec::new();
    let mut failed_titles = 0_usize;
    for title_config in &session.config.titles {
        if cancel.is_cancelled() {
            tracing::info!("cancelled; skipping remaining titles");
            break;
        }

        let result = async {
            let site = session.registry.get(&title_config.site)?;
            let title = title_config.title_ref()?;
            let destination = title_config
                .destination
                .clone()
                .unwrap_or_else(|| session.config.destination.clone());
            session
                .pipeline(&destination, options.clone())
                .run(site, &title, title_config.range())
                .await
        }
        .await;

        match result {
            Ok(summary) => summaries.push(summary),
            Err(err) => {
                tracing::error!(site = %title_config.site, ?err, "title failed");
                failed_titles += 1;
            }
        }
    }

    print_summaries(&summaries, args.json)?;
    if failed_titles > 0 {
        anyhow::bail!("{failed_titles} title(s) failed");
    }
    Ok(())
}

pub fn sites(config: Config) -> anyhow::Result<()> {
    let session = Session::new(config, CancellationToken::new())?;
    for adapter in session.registry.iter() {
        println!("{}\t{}", adapter.name(), adapter.kind());
    }
    Ok(())
}

pub fn key(args: KeyArgs) -> anyhow::Result<()> {
    for token in &args.tokens {
        let key = ChapterKey::normalize(token).with_context(|| format!("normalize {token:?}"))?;
        println!("{token}\t{key}\t{}", key.archive_name());
    }
    Ok(())
}

pub fn pack(args: PackArgs) -> anyhow::Result<()> {
    let count = crate::archive::build_archive(&args.dir, &args.out)?;
    tracing::info!(entries = count, out = %args.out.display(), "wrote archive");
    println!("{}\t{count}", args.out.display());
    Ok(())
}

pub fn inspect(args: InspectArgs) -> anyhow::Result<()> {
    for name in crate::archive::entry_names(&args.file)? {
        println!("{name}");
    }
    Ok(())
}

fn print_summaries(summaries: &[RunSummary], json: bool) -> anyhow::Result<()> {
    if json {
        let text = match summaries {
            [single] => serde_json::to_string_pretty(single),
            many => serde_json::to_string_pretty(many),
        }
        .context("serialize summary")?;
        println!("{text}");
        return Ok(());
    }

    for summary in summaries {
        print!("{}", summary.render_text());
    }
    Ok(())
}
