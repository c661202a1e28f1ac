use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use db_infra::{commands, prepare_config, setup_db, DbInfraError, PoolSettings};
use migration::generate::default_post_write_hooks;

#[derive(Parser)]
#[command(name = "db")]
#[command(about = "Convo database management tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create every table from the schema metadata, bypassing migrations
    CreateAll,
    /// Drop all tables, the version table, and the auxiliary schemas
    DropAll {
        /// Skip the interactive confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Migration commands (generated scripts get formatted on write)
    #[command(subcommand)]
    Manage(ManageCommand),
}

#[derive(Subcommand)]
enum ManageCommand {
    /// Apply revisions up to the target
    Upgrade {
        #[arg(default_value = "head")]
        revision: String,
        /// Print the SQL instead of executing it
        #[arg(long)]
        sql: bool,
    },
    /// Revert revisions down to the target
    Downgrade {
        revision: String,
        /// Print the SQL instead of executing it
        #[arg(long)]
        sql: bool,
    },
    /// Generate a new revision script
    Revision {
        #[arg(short, long)]
        message: String,
    },
    /// Show the revision the database is at
    Current,
    /// List all revisions, applied and pending
    History,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("db=info,db_infra=info,migration=info,sqlx=warn")
            }),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), DbInfraError> {
    let settings = PoolSettings::from_env()?;
    let db = setup_db(&settings).await?;
    let mut config = prepare_config(&settings, script_dir(), version_dir())?;
    let mut stdout = io::stdout();

    match cli.command {
        Command::CreateAll => commands::create_all(&db).await,
        Command::DropAll { yes } => {
            if !yes {
                let mut stdin = io::stdin().lock();
                let mut stderr = io::stderr();
                if !confirm(
                    "This drops every table and schema. Continue? [y/N] ",
                    &mut stdin,
                    &mut stderr,
                )? {
                    eprintln!("aborted");
                    std::process::exit(1);
                }
            }
            commands::drop_all(&db, &config).await
        }
        Command::Manage(cmd) => {
            config.post_write_hooks = default_post_write_hooks();
            match cmd {
                ManageCommand::Upgrade { revision, sql } => {
                    commands::upgrade(&db, &config, &revision, sql, &mut stdout).await
                }
                ManageCommand::Downgrade { revision, sql } => {
                    commands::downgrade(&db, &config, &revision, sql, &mut stdout).await
                }
                ManageCommand::Revision { message } => {
                    let script = commands::revision(&config, &message)?;
                    println!("{}", script.path.display());
                    Ok(())
                }
                ManageCommand::Current => {
                    println!("{}", commands::current(&db).await?);
                    Ok(())
                }
                ManageCommand::History => {
                    for line in commands::history(&db).await? {
                        println!("{line}");
                    }
                    Ok(())
                }
            }
        }
    }
}

fn script_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../packages/migration/src")
}

fn version_dir() -> PathBuf {
    // revision modules live directly in the package source root
    script_dir()
}

fn confirm(prompt: &str, input: &mut dyn BufRead, output: &mut dyn Write) -> io::Result<bool> {
    write!(output, "{prompt}")?;
    output.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    let answer = answer.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use clap::CommandFactory;
    use clap::Parser;

    use super::{confirm, Cli, Command, ManageCommand};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn upgrade_defaults_to_head() {
        let cli = Cli::try_parse_from(["db", "manage", "upgrade"]).unwrap();
        match cli.command {
            Command::Manage(ManageCommand::Upgrade { revision, sql }) => {
                assert_eq!(revision, "head");
                assert!(!sql);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn downgrade_requires_a_revision() {
        assert!(Cli::try_parse_from(["db", "manage", "downgrade"]).is_err());
        let cli = Cli::try_parse_from(["db", "manage", "downgrade", "base", "--sql"]).unwrap();
        match cli.command {
            Command::Manage(ManageCommand::Downgrade { revision, sql }) => {
                assert_eq!(revision, "base");
                assert!(sql);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn revision_takes_a_message() {
        let cli = Cli::try_parse_from(["db", "manage", "revision", "-m", "add users"]).unwrap();
        match cli.command {
            Command::Manage(ManageCommand::Revision { message }) => {
                assert_eq!(message, "add users");
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn confirm_accepts_y_and_yes_only() {
        let mut out = Vec::new();
        for (answer, expected) in [("y\n", true), ("yes\n", true), ("n\n", false), ("", false)] {
            let mut input = Cursor::new(answer);
            assert_eq!(confirm("? ", &mut input, &mut out).unwrap(), expected);
        }
        assert!(String::from_utf8(out).unwrap().starts_with("? "));
    }
}
