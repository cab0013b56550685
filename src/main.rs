use clap::Parser;

use framegate_lib::settings::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    framegate_lib::run(Cli::parse()).await
}
