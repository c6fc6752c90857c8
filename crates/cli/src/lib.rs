pub mod commands;

use clap::{Parser, Subcommand};
use opsflow_core::config::{AppConfig, LoadOptions, LogFormat, LoggingConfig};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "opsflow",
    about = "Opsflow approval workflow operator CLI",
    long_about = "Apply migrations, load demo data, inspect configuration and drive approval flows.",
    after_help = "Examples:\n  opsflow migrate\n  opsflow seed\n  opsflow flow start req-demo-001 --by u-dave\n  opsflow flow approve <flow-id> --by u-alice --note \"looks good\"\n  opsflow flow show <flow-id> --logs"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load deterministic demo users, approver chains and requests")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(subcommand, about = "Start, decide on and inspect approval flows")]
    Flow(FlowCommand),
}

#[derive(Debug, Subcommand)]
enum FlowCommand {
    #[command(about = "Resolve the approver chain for a request and open its flow")]
    Start {
        request_id: String,
        #[arg(long = "by", help = "User starting the flow")]
        started_by: String,
    },
    #[command(about = "Approve the current step of a flow")]
    Approve {
        flow_id: String,
        #[arg(long = "by", help = "Acting approver")]
        user_id: String,
        #[arg(long, default_value = "")]
        note: String,
    },
    #[command(about = "Reject the current step, closing the flow")]
    Reject {
        flow_id: String,
        #[arg(long = "by", help = "Acting approver")]
        user_id: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
    #[command(about = "Show a flow with its steps")]
    Show {
        flow_id: String,
        #[arg(long, help = "Include the approval log")]
        logs: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        init_logging(&config.logging);
    }

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Flow(FlowCommand::Start { request_id, started_by }) => {
            commands::flow::start(request_id, started_by)
        }
        Command::Flow(FlowCommand::Approve { flow_id, user_id, note }) => {
            commands::flow::approve(flow_id, user_id, note)
        }
        Command::Flow(FlowCommand::Reject { flow_id, user_id, reason }) => {
            commands::flow::reject(flow_id, user_id, reason)
        }
        Command::Flow(FlowCommand::Show { flow_id, logs }) => commands::flow::show(flow_id, logs),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Installs the global subscriber. Events go to stderr so stdout stays one JSON line per command.
pub fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);

    // A subscriber may already be installed (tests, embedding); keep the existing one.
    let _ = match logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
