use anyhow::{Context, Result, bail};
use arkd::accounts::{Credential, RemoteAccount};
use arkd::cli::{Prompter, console, testdata, wizard};
use arkd::config::{AppConfig, ConfigSource, DEFAULT_CONFIG_FILE};
use arkd::context::AppContext;
use arkd::core::{RunKind, purge_test_folders};
use arkd::logging::{self, LogConfig};
use arkd::scheduler::DailyTrigger;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "arkd")]
#[command(about = "Scheduled 7-Zip backups with WebDAV replication", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[arg(long, global = true)]
    verbose: bool,

    /// Log to the console as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daily scheduler with the interactive console
    Daemon(OverrideArgs),
    /// Run one backup now
    Backup {
        /// Back up synthetic data into a test folder instead of the source
        #[arg(long)]
        test: bool,

        /// Size of the synthetic data for --test
        #[arg(long, default_value_t = testdata::DEFAULT_TEST_GIGABYTES)]
        size_gb: f64,

        #[command(flatten)]
        overrides: OverrideArgs,
    },
    /// Delete test backup folders
    Deltest,
    /// Manage remote accounts
    Accounts {
        #[command(subcommand)]
        action: AccountsCommand,
    },
    /// Interactive configuration
    Setup,
}

#[derive(Subcommand)]
enum AccountsCommand {
    List,
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        user: String,
        /// Password or app token; read from ARKD_ACCOUNT_SECRET when omitted
        #[arg(long, env = "ARKD_ACCOUNT_SECRET")]
        secret: String,
        #[arg(long, default_value = "/")]
        remote_root: String,
    },
    Remove {
        name: String,
    },
    Clear,
}

#[derive(Args, Serialize)]
struct OverrideArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    source_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    repository_root: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    archiver_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    compression_level: Option<u8>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    enable_upload: Option<bool>,
}

/// Logging flags given on the command line; they never reach the config file.
#[derive(Serialize)]
struct LogFlags {
    #[serde(skip_serializing_if = "Option::is_none")]
    verbose: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    json_logs: Option<bool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // First run (or explicit setup) goes through the wizard before anything is loaded
    let mut prompter = None;
    let file = ConfigSource::new(&cli.config);
    let needs_wizard = match &cli.command {
        Commands::Setup => true,
        Commands::Daemon(_) => !file.exists(),
        _ => false,
    };
    if needs_wizard {
        let base = if file.exists() {
            file.load_file()?
        } else {
            AppConfig::default()
        };
        let input = prompter.get_or_insert_with(Prompter::stdin);
        let config = wizard::run_setup(input, base).await?;
        file.save(&config)?;
        println!("Configuration written to {}", cli.config.display());

        if matches!(cli.command, Commands::Setup) {
            return Ok(());
        }
    }

    let mut source = file.with_overrides(&LogFlags {
        verbose: cli.verbose.then_some(true),
        json_logs: cli.json.then_some(true),
    });
    match &cli.command {
        Commands::Daemon(args) | Commands::Backup { overrides: args, .. } => {
            source = source.with_overrides(args);
        }
        _ => {}
    }

    let ctx = AppContext::new(source)?;
    let config = ctx.config();
    logging::init(&LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
        file: Some(config.log_file.clone()),
    })?;

    match cli.command {
        Commands::Daemon(_) => {
            let input = prompter.get_or_insert_with(Prompter::stdin);
            run_daemon(&ctx, input).await.context("Daemon failed")?
        }
        Commands::Backup { test, size_gb, .. } => run_backup(&ctx, test, size_gb).await?,
        Commands::Deltest => run_deltest(&ctx.config().repository_root)?,
        Commands::Accounts { action } => run_accounts(&ctx, action).await?,
        Commands::Setup => {}
    }

    Ok(())
}

async fn run_daemon(ctx: &AppContext, prompter: &mut Prompter) -> Result<()> {
    let cancel = CancellationToken::new();
    let trigger = DailyTrigger::from_config(&ctx.config())?;
    let scheduler = tokio::spawn(trigger.run(ctx.orchestrator.clone(), cancel.clone()));

    tokio::select! {
        res = console::run_console(ctx, prompter, cancel.clone()) => res?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
    }

    cancel.cancel();
    if let Err(e) = scheduler.await {
        warn!(error = %e, "Scheduler task ended abnormally");
    }
    Ok(())
}

async fn run_backup(ctx: &AppContext, test: bool, size_gb: f64) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling backup");
            on_interrupt.cancel();
        }
    });

    let report = if test {
        testdata::run_test_mode(ctx.orchestrator.clone(), size_gb, cancel).await?
    } else {
        ctx.orchestrator
            .clone()
            .run_isolated(RunKind::Production, cancel)
            .await
    };
    console::print_report(&report);

    if !report.is_done() {
        bail!("Backup run {} did not complete", report.run_id);
    }
    Ok(())
}

fn run_deltest(repository_root: &Path) -> Result<()> {
    let removed = purge_test_folders(repository_root)?;
    for path in &removed {
        println!("Removed {}", path.display());
    }
    println!("{} test folder(s) removed", removed.len());
    Ok(())
}

async fn run_accounts(ctx: &AppContext, action: AccountsCommand) -> Result<()> {
    match action {
        AccountsCommand::List => {
            for line in console::account_lines(&ctx.config().remote_accounts) {
                println!("{line}");
            }
        }
        AccountsCommand::Add {
            name,
            url,
            user,
            secret,
            remote_root,
        } => {
            ctx.add_account(RemoteAccount {
                display_name: name.clone(),
                endpoint_url: url,
                credential: Credential { user, secret },
                remote_root,
            })
            .await?;
            println!("Account {name} added");
        }
        AccountsCommand::Remove { name } => {
            let removed = ctx.remove_account(&name)?;
            println!("{removed} account(s) named {name} removed");
        }
        AccountsCommand::Clear => {
            ctx.clear_accounts()?;
            println!("All remote accounts removed");
        }
    }
    Ok(())
}
