use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// YAML config file (sites, titles, retry policies, defaults).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Archive every missing chapter of one title.
    Download(DownloadArgs),
    /// Archive every title listed in the config.
    Batch(BatchArgs),
    /// List registered sites.
    Sites,
    /// Print the normalized chapter key for raw chapter tokens.
    Key(KeyArgs),
    /// Zip a directory of page images into a comic archive.
    Pack(PackArgs),
    /// List the entries of a comic archive in stored order.
    Inspect(InspectArgs),
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("title").required(true).args(["url", "shortname"])))]
pub struct DownloadArgs {
    /// Registered site name (see `sites`).
    #[arg(long)]
    pub site: String,

    /// Title page URL (or manifest path for manifest sites).
    #[arg(long)]
    pub url: Option<String>,

    /// Title shortname, expanded with the site's title URL template.
    #[arg(long)]
    pub shortname: Option<String>,

    /// First chapter to download (inclusive, integer part).
    #[arg(long)]
    pub start: Option<u64>,

    /// Last chapter to download (inclusive, integer part).
    #[arg(long)]
    pub end: Option<u64>,

    /// Destination directory for archives (default: config `destination`).
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Chapters processed concurrently.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// JPEG quality for re-encoded pages (1-100).
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub quality: Option<u8>,

    /// Print the work queue without downloading.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the summary as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct BatchArgs {
    /// Print the summaries as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct KeyArgs {
    /// Raw chapter tokens (URL slugs, file names, numbers).
    #[arg(required = true)]
    pub tokens: Vec<String>,
}

#[derive(Debug, Args)]
pub struct PackArgs {
    /// Directory of page images.
    #[arg(long)]
    pub dir: PathBuf,

    /// Output archive path.
    #[arg(long)]
    pub out: PathBuf,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Archive to list.
    pub file: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_requires_a_title() {
        assert!(Cli::try_parse_from(["mangarchive", "download", "--site", "demo"]).is_err());
        assert!(
            Cli::try_parse_from([
                "mangarchive",
                "download",
                "--site",
                "demo",
                "--url",
                "https://demo.test/t",
                "--shortname",
                "t",
            ])
            .is_err()
        );
    }

    #[test]
    fn download_parses_overrides() {
        let cli = Cli::try_parse_from([
            "mangarchive",
            "download",
            "--site",
            "demo",
            "--shortname",
            "t",
            "--start",
            "3",
            "--quality",
            "75",
            "--config",
            "c.yaml",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("c.yaml")));
        let Command::Download(args) = cli.command else {
            panic!("expected download");
        };
        assert_eq!(args.start, Some(3));
        assert_eq!(args.quality, Some(75));
        assert!(!args.dry_run);
    }

    #[test]
    fn quality_is_bounded() {
        assert!(
            Cli::try_parse_from([
                "mangarchive",
                "download",
                "--site",
                "demo",
                "--url",
                "u",
                "--quality",
                "0",
            ])
            .is_err()
        );
    }
}
