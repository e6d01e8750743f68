#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use clap::Parser;
use mailchat::{Controller, config, registry, signals};
use mailchat_common::logging;

/// A composable mail transfer and delivery agent
#[derive(Parser, Debug)]
#[command(name = "mailchat", version, about)]
struct Cli {
    /// Configuration file (default: $MAILCHAT_CONFIG, ./mailchat.ron,
    /// /etc/mailchat/mailchat.ron)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Build the configuration, then exit without serving
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log = logging::init();

    let path = config::find(cli.config.as_deref())?;
    let registry = registry::builtin()
        .install()
        .map_err(|_| anyhow::anyhow!("Module registry installed twice"))?;

    let controller = Controller::load(registry, &path)
        .await
        .map_err(|e| anyhow::anyhow!("{}: {e:#}", path.display()))?;

    if cli.check {
        controller.shutdown().await;
        println!("{}: configuration OK", path.display());
        return Ok(());
    }

    let control = signals::listen()?;
    controller.with_log_handle(log).serve(control).await
}
