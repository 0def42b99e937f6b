pub mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use claimflow_core::config::{AppConfig, LoadOptions, LogFormat};

use commands::workflow::WorkflowCommand;

#[derive(Debug, Parser)]
#[command(
    name = "claimflow",
    about = "Claimflow operator CLI",
    long_about = "Operate the expense approval engine: migrations, demo data, config \
                  inspection and approval workflow actions.",
    after_help = "Examples:\n  claimflow doctor --json\n  claimflow seed\n  \
                  claimflow submit exp-demo-travel\n  \
                  claimflow approve exp-demo-travel --approver u-demo-mgr"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo company, users, rules and draft expenses")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config and DB connectivity checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Submit an expense and build its approval workflow")]
    Submit { expense_id: String },
    #[command(about = "Approve the caller's pending step on an expense")]
    Approve {
        expense_id: String,
        #[arg(long)]
        approver: String,
        #[arg(long)]
        comments: Option<String>,
    },
    #[command(about = "Reject the caller's pending step on an expense")]
    Reject {
        expense_id: String,
        #[arg(long)]
        approver: String,
        #[arg(long)]
        comments: Option<String>,
    },
    #[command(about = "Hand the caller's pending step to another user")]
    Delegate {
        expense_id: String,
        #[arg(long)]
        approver: String,
        #[arg(long = "to")]
        delegate_to: String,
        #[arg(long)]
        reason: Option<String>,
    },
    #[command(about = "Re-run step progression on an expense under review")]
    Reevaluate { expense_id: String },
    #[command(about = "List approvals waiting on an approver")]
    Pending {
        #[arg(long)]
        approver: String,
    },
    #[command(about = "Show an expense and its approval rows")]
    Status { expense_id: String },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => match commands::config::run() {
            Ok(output) => commands::CommandResult { exit_code: 0, output },
            Err(error) => commands::CommandResult::failure(
                "config",
                "config_validation",
                format!("{error:#}"),
                2,
            ),
        },
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Submit { expense_id } => {
            commands::workflow::run(WorkflowCommand::Submit { expense_id })
        }
        Command::Approve { expense_id, approver, comments } => {
            commands::workflow::run(WorkflowCommand::Approve { expense_id, approver, comments })
        }
        Command::Reject { expense_id, approver, comments } => {
            commands::workflow::run(WorkflowCommand::Reject { expense_id, approver, comments })
        }
        Command::Delegate { expense_id, approver, delegate_to, reason } => {
            commands::workflow::run(WorkflowCommand::Delegate {
                expense_id,
                approver,
                delegate_to,
                reason,
            })
        }
        Command::Reevaluate { expense_id } => {
            commands::workflow::run(WorkflowCommand::Reevaluate { expense_id })
        }
        Command::Pending { approver } => {
            commands::workflow::run(WorkflowCommand::Pending { approver })
        }
        Command::Status { expense_id } => {
            commands::workflow::run(WorkflowCommand::Status { expense_id })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so stdout stays a single JSON payload.
///
/// A config that fails to load still gets compact `info` logging; the command
/// itself reports the config error.
fn init_logging() {
    use tracing::Level;

    let (level, format) = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => (config.logging.level, config.logging.format),
        Err(_) => ("info".to_string(), LogFormat::Compact),
    };
    let log_level = level.parse::<Level>().unwrap_or(Level::INFO);

    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);
    let installed = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(error) = installed {
        eprintln!("logging already initialized: {error}");
    }
}
