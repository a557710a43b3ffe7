//! The interactive command loop run by `arkd daemon`.

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::accounts::AccountStore;
use crate::cli::testdata::{DEFAULT_TEST_GIGABYTES, run_test_mode};
use crate::cli::{Prompter, wizard};
use crate::context::AppContext;
use crate::core::{RunKind, RunReport, purge_test_folders};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Backup,
    Test(Option<f64>),
    DelTest,
    Accounts(AccountAction),
    Setup,
    Help,
    Exit,
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountAction {
    List,
    Add,
    Remove(String),
    Clear,
}

/// Convert an input line into a command. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let head = parts.next()?.to_ascii_lowercase();

    let command = match head.as_str() {
        "backup" => Command::Backup,
        "test" => match parts.next() {
            None => Command::Test(None),
            Some(gb) => match gb.parse::<f64>() {
                Ok(gb) if gb > 0.0 => Command::Test(Some(gb)),
                _ => Command::Unknown(line.trim().to_string()),
            },
        },
        "deltest" => Command::DelTest,
        "accounts" => match parts.next().map(str::to_ascii_lowercase).as_deref() {
            None | Some("list") => Command::Accounts(AccountAction::List),
            Some("add") => Command::Accounts(AccountAction::Add),
            Some("clear") => Command::Accounts(AccountAction::Clear),
            Some("remove") => {
                let name = parts.collect::<Vec<_>>().join(" ");
                if name.is_empty() {
                    Command::Unknown(line.trim().to_string())
                } else {
                    Command::Accounts(AccountAction::Remove(name))
                }
            }
            Some(_) => Command::Unknown(line.trim().to_string()),
        },
        "setup" => Command::Setup,
        "help" | "?" => Command::Help,
        "exit" | "quit" => Command::Exit,
        _ => Command::Unknown(line.trim().to_string()),
    };

    Some(command)
}

pub const HELP: &str = "\
Commands:
  backup                    run a backup now
  test [GB]                 back up synthetic data (default 0.5 GB), no upload
  deltest                   delete test backup folders
  accounts [list]           list remote accounts
  accounts add              add a remote account
  accounts remove <name>    remove accounts with that name
  accounts clear            remove all remote accounts
  setup                     reconfigure
  help                      show this list
  exit                      quit";

pub fn print_banner(ctx: &AppContext) {
    let config = ctx.config();
    println!();
    println!("arkd - local backup with remote replication");
    println!("  source:     {}", config.source_path.display());
    println!("  repository: {}", config.repository_root.display());
    println!("  daily at:   {}", config.daily_trigger_time);
    println!("  accounts:   {}", config.remote_accounts.len());
    println!();
    println!("{HELP}");
    println!();
}

pub fn print_report(report: &RunReport) {
    for line in report.lines() {
        println!("{line}");
    }
}

pub fn account_lines(store: &AccountStore) -> Vec<String> {
    if store.is_empty() {
        return vec!["No remote accounts configured".to_string()];
    }
    store
        .iter()
        .enumerate()
        .map(|(i, a)| {
            format!(
                "{}. {}  {}  (root {}, user {})",
                i + 1,
                a.display_name,
                a.endpoint_url,
                a.remote_root,
                a.credential.user
            )
        })
        .collect()
}

/// Read and dispatch commands until `exit` or end of input.
pub async fn run_console(
    ctx: &AppContext,
    prompter: &mut Prompter,
    cancel: CancellationToken,
) -> Result<()> {
    print_banner(ctx);

    loop {
        let Some(line) = prompter.prompt_line("arkd> ").await else {
            return Ok(());
        };
        let Some(command) = parse_command(&line) else {
            continue;
        };

        if command == Command::Exit {
            return Ok(());
        }

        // A failed command is reported and the console keeps going
        if let Err(e) = dispatch(ctx, prompter, command, &cancel).await {
            error!(error = %format!("{e:#}"), "Command failed");
            println!("Error: {e:#}");
        }
    }
}

async fn dispatch(
    ctx: &AppContext,
    prompter: &mut Prompter,
    command: Command,
    cancel: &CancellationToken,
) -> Result<()> {
    match command {
        Command::Backup => {
            let report = ctx
                .orchestrator
                .clone()
                .run_isolated(RunKind::Production, cancel.child_token())
                .await;
            print_report(&report);
        }
        Command::Test(gigabytes) => {
            let gigabytes = match gigabytes {
                Some(gb) => gb,
                None => {
                    prompter
                        .ask_parsed(
                            "Test data size in GB",
                            &DEFAULT_TEST_GIGABYTES.to_string(),
                            |s| match s.parse::<f64>() {
                                Ok(gb) if gb > 0.0 => Ok(gb),
                                _ => Err("Enter a positive number".to_string()),
                            },
                        )
                        .await?
                }
            };
            let report =
                run_test_mode(ctx.orchestrator.clone(), gigabytes, cancel.child_token()).await?;
            print_report(&report);
        }
        Command::DelTest => {
            let root = ctx.config().repository_root.clone();
            let removed = tokio::task::spawn_blocking(move || purge_test_folders(&root)).await??;
            if removed.is_empty() {
                println!("No test folders found");
            } else {
                for path in &removed {
                    println!("Removed {}", path.display());
                }
                println!("{} test folder(s) removed", removed.len());
            }
        }
        Command::Accounts(AccountAction::List) => {
            for line in account_lines(&ctx.config().remote_accounts) {
                println!("{line}");
            }
        }
        Command::Accounts(AccountAction::Add) => {
            let account = wizard::prompt_account(prompter).await?;
            let name = account.display_name.clone();
            ctx.add_account(account).await?;
            println!("Account {name} added");
        }
        Command::Accounts(AccountAction::Remove(name)) => {
            let removed = ctx.remove_account(&name)?;
            println!("{removed} account(s) named {name} removed");
        }
        Command::Accounts(AccountAction::Clear) => {
            if prompter.confirm("Remove every remote account", false).await? {
                ctx.clear_accounts()?;
                println!("All remote accounts removed");
            }
        }
        Command::Setup => {
            let base = ctx.file_config()?;
            let config = wizard::run_setup(prompter, base).await?;
            ctx.persist(config)?;
            println!(
                "Configuration saved to {}, used from the next backup. Restart arkd for a new schedule time or log settings to take effect.",
                ctx.config_path().display()
            );
        }
        Command::Help => println!("{HELP}"),
        Command::Exit => {}
        Command::Unknown(input) => println!("Unknown command {input:?}, type help"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command("  "), None);
        assert_eq!(parse_command("BACKUP"), Some(Command::Backup));
        assert_eq!(parse_command("test"), Some(Command::Test(None)));
        assert_eq!(parse_command("test 2.5"), Some(Command::Test(Some(2.5))));
        assert_eq!(parse_command("deltest"), Some(Command::DelTest));
        assert_eq!(parse_command("exit"), Some(Command::Exit));
        assert_eq!(parse_command("help"), Some(Command::Help));
        assert_eq!(parse_command("setup"), Some(Command::Setup));
    }

    #[test]
    fn parses_account_actions() {
        assert_eq!(
            parse_command("accounts"),
            Some(Command::Accounts(AccountAction::List))
        );
        assert_eq!(
            parse_command("accounts add"),
            Some(Command::Accounts(AccountAction::Add))
        );
        assert_eq!(
            parse_command("accounts remove my nas"),
            Some(Command::Accounts(AccountAction::Remove("my nas".to_string())))
        );
        assert_eq!(
            parse_command("accounts clear"),
            Some(Command::Accounts(AccountAction::Clear))
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(parse_command("test -1"), Some(Command::Unknown(_))));
        assert!(matches!(parse_command("accounts remove"), Some(Command::Unknown(_))));
        assert!(matches!(parse_command("accounts nuke"), Some(Command::Unknown(_))));
        assert!(matches!(parse_command("frobnicate"), Some(Command::Unknown(_))));
    }

    #[test]
    fn account_listing_hides_secrets() {
        use crate::accounts::{Credential, RemoteAccount};

        let store = AccountStore::from(vec![RemoteAccount {
            display_name: "home".to_string(),
            endpoint_url: "https://dav.example.com/".to_string(),
            credential: Credential {
                user: "me".to_string(),
                secret: "hunter2".to_string(),
            },
            remote_root: "/backups".to_string(),
        }]);

        let lines = account_lines(&store);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("1. home"));
        assert!(!lines[0].contains("hunter2"));
        assert_eq!(account_lines(&AccountStore::new()).len(), 1);
    }
}
