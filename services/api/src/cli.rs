use crate::demo::{run_demo, run_distance, run_saved, DemoArgs, DistanceArgs, SavedCommand};
use crate::server;
use clap::{Args, Parser, Subcommand};
use estate_access::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Estate Access",
    about = "Serve and exercise proximity-gated property unlocks from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Walk a simulated device toward a listing and show the unlock gate
    Demo(DemoArgs),
    /// Great-circle distance between two coordinates
    Distance(DistanceArgs),
    /// Inspect or change saved listings
    Saved {
        #[command(subcommand)]
        command: SavedCommand,
    },
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
        Command::Demo(args) => run_demo(args).await,
        Command::Distance(args) => {
            run_distance(args);
            Ok(())
        }
        Command::Saved { command } => run_saved(command),
    }
}
