use clap::Parser;

use modgate::cli::{dispatch, Cli};
use modgate::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init(telemetry::json_from_env());
    dispatch(Cli::parse()).await
}
