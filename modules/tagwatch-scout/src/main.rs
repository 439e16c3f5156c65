use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ai_client::Gemini;
use tagwatch_common::{load_config, AppConfig, ClassifiedRecord, FileConfig, NormalizedPost};
use tagwatch_scout::browser::WebDriverBrowser;
use tagwatch_scout::flow::{self, ScrapeFlow};
use tagwatch_scout::store::LakeFsTableStore;

#[derive(Parser)]
#[command(name = "tagwatch", about = "Hashtag post collection and topic labeling")]
struct Cli {
    /// Log as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape, classify and load both tables
    Run {
        #[arg(long, default_value = "tagwatch.toml")]
        config: PathBuf,
    },

    /// Scrape, merge and validate, writing posts as JSON Lines
    Scrape {
        #[arg(long, default_value = "tagwatch.toml")]
        config: PathBuf,

        #[arg(long)]
        out: PathBuf,
    },

    /// Label a JSON Lines file of posts and print the records
    Classify {
        #[arg(long, default_value = "tagwatch.toml")]
        config: PathBuf,

        #[arg(long)]
        input: PathBuf,
    },

    /// Load the saved session and report whether it is usable
    CheckSession {
        #[arg(long, default_value = "tagwatch.toml")]
        config: PathBuf,
    },
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("tagwatch=info".parse()?)
        .add_directive("tagwatch_scout=info".parse()?)
        .add_directive("lakefs_client=info".parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<FileConfig> {
    info!(config = %path.display(), "Loading config");
    load_config(path)
}

/// Cancel collection on Ctrl-C; the current group finishes its jobs first.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping collection");
            token.cancel();
        }
    });
    cancel
}

fn gemini(app: &AppConfig, file: &FileConfig) -> Result<Arc<Gemini>> {
    Ok(Arc::new(Gemini::new(app.gemini_api_key()?, file.classify.model.clone())))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json)?;

    info!("tagwatch starting...");
    let app = AppConfig::from_env();
    app.log_redacted();

    match cli.command {
        Command::Run { config } => {
            let file = read_config(&config)?;
            let run_id = uuid::Uuid::new_v4();
            info!(%run_id, "Starting flow");

            let flow = ScrapeFlow::new(
                file.clone(),
                Arc::new(WebDriverBrowser::new(&app.webdriver_url)),
                gemini(&app, &file)?,
                Arc::new(LakeFsTableStore::from_config(&app, run_id)?),
                cancel_on_ctrl_c(),
            );
            let report = flow.run().await?;
            info!(
                targets = report.targets,
                scraped = report.scraped,
                valid = report.valid,
                dropped = report.dropped,
                windows = report.windows,
                records = report.records,
                raw_written = report.raw.written,
                classified_written = report.classified.written,
                "Run complete"
            );
        }

        Command::Scrape { config, out } => {
            let file = read_config(&config)?;
            let session = flow::load_session(&file.scrape).await?;
            let collected = flow::collect_posts(
                &file.targets,
                &file.scrape,
                Arc::new(WebDriverBrowser::new(&app.webdriver_url)),
                &session,
                cancel_on_ctrl_c(),
            )
            .await?;

            flow::write_jsonl(&out, &collected.posts)?;
            info!(
                posts = collected.posts.len(),
                dropped = collected.violations.len(),
                out = %out.display(),
                "Posts written"
            );
        }

        Command::Classify { config, input } => {
            let file = read_config(&config)?;
            let posts: Vec<NormalizedPost> = flow::read_jsonl(&input)?;
            let run = flow::classify_posts(&file.classify, gemini(&app, &file)?, &posts).await?;

            let records: &[ClassifiedRecord] = &run.records;
            for record in records {
                println!("{}", serde_json::to_string(record)?);
            }
            info!(posts = posts.len(), windows = run.windows, records = records.len(), "Classified");
        }

        Command::CheckSession { config } => {
            let file = read_config(&config)?;
            let session = flow::load_session(&file.scrape)
                .await
                .context("Session is not usable; log in again and re-save it")?;
            info!(
                site = session.site_url(),
                cookies = session.cookies().len(),
                "Session is usable"
            );
        }
    }

    Ok(())
}
