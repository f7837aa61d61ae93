pub mod cli;

use clap::Parser;

use cli::{Cli, DEFAULT_DATABASE_URL, run};
use common::logger::init_logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let production = std::env::var("APP_ENV").is_ok_and(|env| env == "production");
    init_logger("arbctl", production);

    let database_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

    run(cli.command, &database_url).await
}
