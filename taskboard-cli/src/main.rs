//! `taskboard` - operator CLI for the marketplace backend

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::PathBuf;
use taskboard_escrow::{
    account::Account,
    config::MarketplaceConfig,
    logging::init_tracing,
    models::{LedgerEntry, Task, UserRole},
    node::MarketplaceNode,
    task_manager::CreateTaskRequest,
    EscrowError,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "taskboard", version, about = "Taskboard escrow backend")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Tracing filter when RUST_LOG is unset (overrides the config file)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective configuration as JSON
    Config,
    /// Run a create / assign / complete cycle and print the outcome
    Scenario {
        /// Starting balance of the author
        #[arg(long, default_value = "500")]
        author_balance: Decimal,
        /// Price of the task
        #[arg(long, default_value = "200")]
        price: Decimal,
    },
}

#[derive(Serialize)]
struct ScenarioReport {
    task: Option<Task>,
    author: Account,
    executor: Account,
    ledger: Vec<LedgerEntry>,
    outcome: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = MarketplaceConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    init_tracing(&config.log_level);

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Scenario {
            author_balance,
            price,
        } => {
            let report = run_scenario(config, author_balance, price).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn run_scenario(
    config: MarketplaceConfig,
    author_balance: Decimal,
    price: Decimal,
) -> Result<ScenarioReport> {
    let node = MarketplaceNode::new(config);
    let manager = node.task_manager();

    let author = manager
        .register_user("author".into(), "author@taskboard.dev".into(), UserRole::Author)
        .await?;
    let executor = manager
        .register_user(
            "executor".into(),
            "executor@taskboard.dev".into(),
            UserRole::Executor,
        )
        .await?;
    node.deposit(author.id, author_balance).await?;

    let created = manager
        .create_task(CreateTaskRequest {
            author: author.id,
            title: "Scenario task".into(),
            text: String::new(),
            price,
        })
        .await;

    let (task, outcome) = match created {
        Ok(task) => {
            let respond = manager.respond(task.id, executor.id).await?;
            manager
                .choose_winner(task.id, respond.id, author.id)
                .await?;
            node.complete_task(task.id, author.id).await?;
            // second completion is a no-op for balances
            let task = node.complete_task(task.id, author.id).await?;
            (Some(task), "completed".to_string())
        }
        Err(err @ EscrowError::InsufficientFunds { .. }) => {
            info!("task creation rejected: {err}");
            (None, err.to_string())
        }
        Err(err) => return Err(err.into()),
    };

    Ok(ScenarioReport {
        task,
        author: manager.account(author.id).await?,
        executor: manager.account(executor.id).await?,
        ledger: node.ledger().await?,
        outcome,
    })
}
