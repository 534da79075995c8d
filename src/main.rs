use agency_index::{
    config::Config,
    error::classify,
    fetch, pipeline, serve,
    store::{self, inspect, ExportFormat, StoreQuery},
    StressTier,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use reqwest::Client;
use std::path::PathBuf;
use tokio::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "County Economic Agency Index: build, inspect and view"
)]
struct Cli {
    /// YAML config file; flags below override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download the BEA CAINC4 archive (and optionally the county gazetteer).
    Fetch {
        #[arg(long)]
        gazetteer: bool,
    },
    /// Run the ETL and replace the store.
    Build(BuildArgs),
    /// Launch the read-only viewer.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Write stored rows to CSV or Parquet.
    Export(ExportArgs),
    /// Print store statistics.
    Inspect,
}

#[derive(Args)]
struct BuildArgs {
    /// Download the source first.
    #[arg(long)]
    fetch: bool,
    /// Rebuild only this year (repeatable); other years in the store are kept.
    #[arg(long = "year")]
    years: Vec<i32>,
    #[arg(long)]
    source: Option<PathBuf>,
    #[arg(long)]
    store: Option<PathBuf>,
    #[arg(long)]
    high_agency_min: Option<f64>,
    #[arg(long)]
    balanced_min: Option<f64>,
}

#[derive(Args)]
struct ExportArgs {
    #[arg(long)]
    out: PathBuf,
    /// csv or parquet; guessed from `--out` when omitted.
    #[arg(long)]
    format: Option<ExportFormat>,
    #[arg(long)]
    year: Option<i32>,
    #[arg(long = "tier")]
    tiers: Vec<StressTier>,
    #[arg(long)]
    min_eai: Option<f64>,
    #[arg(long)]
    max_eai: Option<f64>,
}

fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(concat!("agency-index/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")
}

async fn run(cli: Cli) -> Result<()> {
    let mut cfg = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Fetch { gazetteer } => {
            let client = http_client()?;
            let path = fetch::fetch_source(&client, &cfg).await?;
            info!(path = %path.display(), "source ready");
            if gazetteer {
                let path = fetch::fetch_gazetteer(&client, &cfg).await?;
                info!(path = %path.display(), "gazetteer ready");
            }
        }

        Command::Build(args) => {
            if !args.years.is_empty() {
                cfg.years = args.years;
            }
            if args.source.is_some() {
                cfg.source_path = args.source;
            }
            if args.store.is_some() {
                cfg.store_path = args.store;
            }
            if let Some(v) = args.high_agency_min {
                cfg.thresholds.high_agency_min = v;
            }
            if let Some(v) = args.balanced_min {
                cfg.thresholds.balanced_min = v;
            }
            cfg.validate()?;

            if args.fetch {
                fetch::fetch_source(&http_client()?, &cfg).await?;
            }

            let start = Instant::now();
            // the ETL is blocking; keep it off the async workers
            let report = tokio::task::spawn_blocking(move || pipeline::run_build(&cfg)).await??;
            info!(
                rows = report.rows_written,
                excluded = report.excluded(),
                elapsed = ?start.elapsed(),
                "wrote {}",
                report.store_path.display()
            );
        }

        Command::Serve { host, port } => {
            if let Some(h) = host {
                cfg.serve.host = h;
            }
            if let Some(p) = port {
                cfg.serve.port = p;
            }
            serve::serve(&cfg).await?;
        }

        Command::Export(args) => {
            let snap = store::read_store(&cfg.store_path())?;
            let query = StoreQuery {
                year: args.year,
                tiers: (!args.tiers.is_empty()).then_some(args.tiers),
                min_eai: args.min_eai,
                max_eai: args.max_eai,
                ..Default::default()
            };
            let rows: Vec<_> = snap.query(&query).into_iter().map(|r| r.record).collect();
            let format = args
                .format
                .unwrap_or_else(|| ExportFormat::from_path(&args.out));
            store::export(&args.out, &rows, format, &snap.thresholds)?;
            info!(rows = rows.len(), path = %args.out.display(), "exported");
        }

        Command::Inspect => {
            let stats = inspect::inspect(&cfg.store_path())?;
            println!("{}", stats);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        match classify(&e) {
            Some(kind) => error!(?kind, "{:#}", e),
            None => error!("{:#}", e),
        }
        std::process::exit(1);
    }
}
