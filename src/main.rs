use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use visitor_beacon::config::{self, BeaconConfig};
use visitor_beacon::logging::init_logging;
use visitor_beacon::notify::{download_url, Notifier, PageContext};
use visitor_beacon::report::{report_download, report_visit};
use visitor_beacon::stats::StatsStore;
use visitor_beacon::visitor::VisitorInfoResolver;

/// Visitor Beacon: multi-provider visitor geolocation and event reporting
///
/// Resolves the current public IP's location through several free
/// geolocation providers, counts visits and downloads locally, and
/// notifies a backend.
///
/// Examples:
///   beacon resolve
///   beacon resolve --parallel --timeout-ms 1500
///   beacon visit --url https://example.com/ --referrer https://search.example/
///   beacon download --url https://example.com/ --file VrChat-Plugin-4.7.8.rar
///   beacon stats
#[derive(Parser)]
#[command(name = "beacon", version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.visitor-beacon/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging for the beacon's own modules.
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve visitor info and print it as JSON.
    Resolve(ResolveArgs),
    /// Record a page visit and notify the backend.
    Visit {
        #[command(flatten)]
        page: PageArgs,
        /// Referring page; "direct" when absent.
        #[arg(long)]
        referrer: Option<String>,
        #[command(flatten)]
        resolve: ResolveArgs,
    },
    /// Record a download and notify the backend.
    Download {
        #[command(flatten)]
        page: PageArgs,
        /// File being downloaded.
        #[arg(long)]
        file: String,
        #[command(flatten)]
        resolve: ResolveArgs,
    },
    /// Print local visit/download counters.
    Stats {
        /// Zero all counters.
        #[arg(long)]
        reset: bool,
    },
}

#[derive(Args)]
struct ResolveArgs {
    /// Query all providers at once instead of one after another.
    #[arg(long)]
    parallel: bool,

    /// Per-provider timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Args)]
struct PageArgs {
    /// Page URL the event happened on.
    #[arg(long)]
    url: String,

    /// Visitor language tag (e.g. tr-TR).
    #[arg(long, default_value = "en-US")]
    language: String,

    /// Visitor user agent; defaults to the beacon's own.
    #[arg(long)]
    user_agent: Option<String>,

    /// Backend base URL override.
    #[arg(long)]
    backend: Option<String>,

    /// Skip the backend POST.
    #[arg(long)]
    no_notify: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Resolve(args) => {
            let info = resolver(&mut cfg, &args).resolve();
            eprintln!("  {}", info.summary_line());
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Visit { page, referrer, resolve: args } => {
            let resolver = resolver(&mut cfg, &args);
            let mut stats = open_stats(&cfg);
            let notifier = notifier(&cfg, &page);
            let ctx = page_context(&cfg, &page, referrer);

            let report = report_visit(&resolver, &mut stats, notifier.as_ref(), &ctx)?;
            println!("{}", serde_json::to_string_pretty(&report.payload)?);
        }
        Command::Download { page, file, resolve: args } => {
            let resolver = resolver(&mut cfg, &args);
            let mut stats = open_stats(&cfg);
            let notifier = notifier(&cfg, &page);
            let ctx = page_context(&cfg, &page, None);

            let report = report_download(&resolver, &mut stats, notifier.as_ref(), &ctx)?;
            let out = serde_json::json!({
                "payload": report.payload,
                "downloadUrl": download_url(&ctx.url, &file),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Stats { reset } => {
            let mut stats = open_stats(&cfg);
            if reset {
                stats
                    .reset()
                    .with_context(|| format!("resetting {}", stats.path().display()))?;
            }
            println!("{}", serde_json::to_string_pretty(&stats.snapshot())?);
        }
    }

    Ok(())
}

fn resolver(cfg: &mut BeaconConfig, args: &ResolveArgs) -> VisitorInfoResolver {
    cfg.apply_overrides(args.parallel, args.timeout_ms);
    VisitorInfoResolver::new(cfg.resolver_config(), &cfg.user_agent)
}

fn open_stats(cfg: &BeaconConfig) -> StatsStore {
    match &cfg.stats_path {
        Some(path) => StatsStore::load_from(path.clone()),
        None => StatsStore::load(),
    }
}

fn page_context(cfg: &BeaconConfig, page: &PageArgs, referrer: Option<String>) -> PageContext {
    PageContext {
        url: page.url.clone(),
        referrer,
        language: page.language.clone(),
        user_agent: page.user_agent.clone().unwrap_or_else(|| cfg.user_agent.clone()),
    }
}

fn notifier(cfg: &BeaconConfig, page: &PageArgs) -> Option<Notifier> {
    if page.no_notify {
        return None;
    }
    let base = page.backend.as_deref().unwrap_or(&cfg.backend_url);
    Some(Notifier::new(base, cfg.notify_timeout(), &cfg.user_agent))
}
