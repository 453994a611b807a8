//! CLI argument parsing with clap derive

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;
use crate::output::OutputContext;

/// Provision and bootstrap remote agent hosts
#[derive(Parser)]
#[command(
    name = "roost",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Provision a host and bootstrap the agent runtime
    Setup(commands::setup::SetupArgs),

    /// Show a host's provisioning record
    Status(commands::status::StatusArgs),

    /// Delete the compute resource and reset the record
    Teardown(commands::teardown::TeardownArgs),

    /// Run a command on a provisioned host
    Exec(commands::exec::ExecArgs),

    /// Show version
    Version,

    #[command(hide = true, name = "_run")]
    InternalRun {
        host_id: String,
    },
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn run(self) -> Result<()> {
        let Cli {
            json,
            quiet,
            no_color,
            command,
        } = self;
        match command {
            Command::Version => {
                commands::version::run(json);
                Ok(())
            }
            Command::Setup(args) => {
                let ctx = OutputContext::new(no_color, quiet);
                commands::setup::run(&ctx, &args).await
            }
            Command::Status(args) => {
                let ctx = OutputContext::new(no_color, quiet);
                commands::status::run(&ctx, &args, json).await
            }
            Command::Teardown(args) => {
                let ctx = OutputContext::new(no_color, quiet);
                commands::teardown::run(&ctx, &args).await
            }
            Command::Exec(args) => {
                let ctx = OutputContext::new(no_color, quiet);
                commands::exec::run(&ctx, &args).await
            }
            Command::InternalRun { host_id } => commands::setup::run_detached(&host_id).await,
        }
    }
}
