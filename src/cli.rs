//! # Command-line surface.
//!
//! ```text
//! <bin> run <name> [--workers N]   run one worker (N > 1 replicates it)
//! <bin> run all                    supervise every registered worker
//! <bin> cron <name>                run a cron worker
//! <bin> exec <name>                run a one-off callback
//! ```
//!
//! A typical binary builds its [`Application`], registers workers and hands over:
//!
//! ```rust,no_run
//! use fleetvisor::Application;
//!
//! #[tokio::main]
//! async fn main() -> std::process::ExitCode {
//!     let app = Application::builder("billing").build();
//!     app.run_cli().await
//! }
//! ```

use std::ffi::OsString;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, warn};

use crate::app::{Application, Command};

/// Parsed command line.
#[derive(Parser, Debug)]
#[command(version, about = "Run registered workers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Run one worker, or `all` to supervise every worker.
    Run {
        /// Worker name, or `all`.
        target: String,
        /// Number of processes running the same worker.
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
        workers: u16,
    },
    /// Run a cron worker: schedule its workflow, then idle until stopped.
    Cron {
        name: String,
    },
    /// Run a registered one-off command.
    Exec {
        name: String,
    },
}

impl From<CliCommand> for Command {
    fn from(cmd: CliCommand) -> Self {
        match cmd {
            CliCommand::Run { target, .. } if target == "all" => Command::RunAll,
            CliCommand::Run { target, workers } => Command::Run {
                name: target,
                workers: usize::from(workers),
            },
            CliCommand::Cron { name } => Command::Cron { name },
            CliCommand::Exec { name } => Command::Exec { name },
        }
    }
}

impl Application {
    /// Parses the process arguments and runs the selected command.
    pub async fn run_cli(&self) -> ExitCode {
        self.run_args(std::env::args_os()).await
    }

    /// Parses `args` (program name first) and runs the selected command.
    ///
    /// Installs this application's log pipeline as the global default.
    pub async fn run_args<I, T>(&self, args: I) -> ExitCode
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = match Cli::try_parse_from(args) {
            Ok(cli) => cli,
            Err(e) => {
                let _ = e.print();
                return exit_code(e.exit_code());
            }
        };
        self.telemetry().install_global();

        if let CliCommand::Run { target, workers } = &cli.command {
            if target == "all" && *workers > 1 {
                warn!(workers, "--workers is ignored for `run all`");
            }
        }

        match self.run(cli.command.into()).await {
            Ok(code) => exit_code(code),
            Err(e) => {
                error!(error = %e, label = e.as_label(), "command failed");
                ExitCode::FAILURE
            }
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    match u8::try_from(code) {
        Ok(code) => ExitCode::from(code),
        Err(_) => ExitCode::FAILURE,
    }
}
