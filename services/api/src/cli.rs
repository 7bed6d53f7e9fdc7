use crate::demo::{run_access_table, run_demo, AccessArgs, DemoArgs};
use crate::server;
use caregate::error::AppError;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "caregate",
    about = "Run the caregiver verification and billing-compliance service",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service and background orchestrators (default command)
    Serve(ServeArgs),
    /// Walk through the scripted verification and lockout scenarios
    Demo(DemoArgs),
    /// Print the capability table for every role and lock state
    Access(AccessArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args),
        Command::Access(args) => run_access_table(args),
    }
}
