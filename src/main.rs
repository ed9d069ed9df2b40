// ABOUTME: Binary entry point for the starflow command line
// ABOUTME: Parses arguments, loads configuration, and dispatches the chosen command

use anyhow::Result;
use starflow::cli::{App, Args};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();
    let mut app = App::from_config_path(args.config.clone())?;

    app.run(args).await
}
