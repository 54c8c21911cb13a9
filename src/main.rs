use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use homeinfopoint::config::{AccountConfig, AppConfig};
use homeinfopoint::pipeline::Pipeline;
use homeinfopoint::scraper::parsers::parse_with_diagnostics;
use homeinfopoint::storage::SnapshotStore;
use homeinfopoint::utils;
use homeinfopoint::views::calendar::{homework_events, next_event, remark_events};
use homeinfopoint::views::{EntityValues, SubjectNames};

#[derive(Parser)]
#[command(name = "hip", about = "Home.InfoPoint portal poller", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Log in once, fetch the data page and print the parsed snapshot as JSON
    Fetch {
        /// Configured account to use (default: the first one)
        #[arg(short, long)]
        account: Option<String>,

        /// Log in with these credentials instead of a configured account
        #[arg(long, env = "HIP_USERNAME", requires = "password")]
        username: Option<String>,

        #[arg(long, env = "HIP_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Portal base URL (overrides the configured one)
        #[arg(long, env = "HIP_BASE_URL")]
        base_url: Option<String>,
    },

    /// Parse a saved data page without touching the network
    Parse {
        /// HTML file, e.g. data/<account>/last.html
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Print derived values (averages, counts, next events) from the stored snapshot
    Report {
        #[arg(short, long)]
        account: Option<String>,
    },

    /// Poll all configured accounts until Ctrl-C
    Poll,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "homeinfopoint=info,hip=info,warn",
        1 => "homeinfopoint=debug,hip=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Fetch {
            account,
            username,
            password,
            base_url,
        } => {
            let mut account = match (username, password) {
                (Some(username), Some(password)) => AccountConfig {
                    name: account.unwrap_or_else(|| username.clone()),
                    username,
                    password,
                    base_url: None,
                },
                _ => select_account(&config, account.as_deref())?.clone(),
            };
            if base_url.is_some() {
                account.base_url = base_url;
            }

            let pipeline = Pipeline::new(config);
            let (mut poller, _rx) = pipeline.poller(&account)?;
            let snapshot = poller
                .refresh_once()
                .await
                .with_context(|| format!("Refresh for {} failed", account.name))?;
            println!("{}", serde_json::to_string_pretty(&*snapshot)?);
        }

        Command::Parse { file } => {
            let html = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {:?}", file))?;
            let outcome = parse_with_diagnostics(&html);
            for issue in &outcome.issues {
                warn!("{}", issue);
            }
            println!("{}", serde_json::to_string_pretty(&outcome.snapshot)?);
        }

        Command::Report { account } => {
            let account = select_account(&config, account.as_deref())?;
            let store = SnapshotStore::open(&config.storage.dir, &account.name)?;
            let Some(snapshot) = store.load_snapshot()? else {
                bail!("no stored snapshot for {} yet, run `hip fetch` first", account.name);
            };

            let names = SubjectNames::new(config.subjects.clone());
            let values = EntityValues::build(&snapshot, &names);
            let today = Local::now().date_naive();
            let homework = homework_events(&snapshot);
            let remarks = remark_events(&snapshot);

            let report = serde_json::json!({
                "entities": values,
                "next_homework": next_event(&homework, today),
                "next_remark": next_event(&remarks, today),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Poll => {
            let _t = utils::Timer::start("poll");
            info!("Starting pollers for {} account(s)", config.accounts.len());
            Pipeline::new(config).run().await?;
        }
    }

    Ok(())
}

fn select_account<'a>(config: &'a AppConfig, name: Option<&str>) -> Result<&'a AccountConfig> {
    match name {
        Some(name) => config
            .accounts
            .iter()
            .find(|a| a.name == name)
            .with_context(|| format!("no account named {:?} in config", name)),
        None => config
            .accounts
            .first()
            .context("no accounts configured (add [[accounts]] to config/local.toml)"),
    }
}
