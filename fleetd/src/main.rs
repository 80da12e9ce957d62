use clap::{Parser, Subcommand};

use common::telemetry::init_telemetry;

use fleetd::command::diag::{DiagArgs, diag};
use fleetd::command::serve::{ServeArgs, serve};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
enum Cmd {
    /// Run the node daemon
    Serve(ServeArgs),
    /// Probe the fleet and print a per-node reachability report
    Diag(DiagArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry("fleetd");

    let args = Args::parse();

    match args.cmd {
        Cmd::Serve(serve_args) => {
            serve(serve_args).await?;
        }
        Cmd::Diag(diag_args) => {
            diag(diag_args).await?;
        }
    }

    Ok(())
}
