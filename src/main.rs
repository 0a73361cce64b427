use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use flume_collector::app::{self, Command, Completion, Invocation};

/// Collects per-minute water usage from the Flume API into a local time-series store.
#[derive(Parser)]
#[command(name = "flume_collector")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Append logs to this file (also FLUME_LOG_FILE, default ~/.log/flume.log).
    #[arg(long, global = true, conflicts_with = "no_log")]
    log_file: Option<PathBuf>,

    /// Log to stderr instead of a log file.
    #[arg(long, global = true)]
    no_log: bool,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-authorize with the stored password grant and save the new tokens.
    Authenticate,

    /// List the devices on the account.
    ShowDevices,

    /// Record recent usage readings into the point store.
    RecordStatus {
        /// Shift the query window this many hours into the past.
        #[arg(long, default_value_t = 0)]
        offset: u32,

        /// Fetch and convert, but do not write any points.
        #[arg(long)]
        dry_run: bool,
    },

    /// Create or migrate the point store.
    InitStore,
}

impl From<Commands> for Command {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Authenticate => Command::Authenticate,
            Commands::ShowDevices => Command::ShowDevices,
            Commands::RecordStatus { offset, dry_run } => Command::RecordStatus {
                offset_hours: offset,
                dry_run,
            },
            Commands::InitStore => Command::InitStore,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let invocation = Invocation {
        command: cli.command.into(),
        verbose: cli.verbose,
        log_file: cli.log_file,
        log_to_stderr: cli.no_log,
    };

    match app::run(invocation) {
        Ok(Completion::Succeeded) => ExitCode::SUCCESS,
        Ok(Completion::IngestionFailed) => ExitCode::from(2),
        Err(err) => {
            eprintln!("flume_collector failed: {err}");
            ExitCode::FAILURE
        }
    }
}
