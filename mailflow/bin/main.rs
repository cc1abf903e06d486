#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(unix))]
compile_error!("Only unix-like systems are currently supported");

use std::path::PathBuf;

use clap::Parser;

/// Templated outbound email dispatch engine.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => find_config_file()?,
    };

    let content = std::fs::read_to_string(&config_path).map_err(|e| {
        anyhow::anyhow!("Failed to read config from {}: {}", config_path.display(), e)
    })?;
    let mailflow: mailflow::Mailflow = toml::from_str(&content)?;

    mailflow.run().await
}

/// Well-known config locations, checked in order when neither `--config`
/// nor `MAILFLOW_CONFIG` names a file.
const DEFAULT_PATHS: [&str; 2] = ["./mailflow.config.toml", "/etc/mailflow/mailflow.config.toml"];

fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Some(path) = std::env::var_os("MAILFLOW_CONFIG").map(PathBuf::from) {
        anyhow::ensure!(
            path.exists(),
            "MAILFLOW_CONFIG is set to {}, which does not exist",
            path.display()
        );
        return Ok(path);
    }

    DEFAULT_PATHS
        .into_iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "no configuration file found; set MAILFLOW_CONFIG or place one at {}",
                DEFAULT_PATHS.join(" or ")
            )
        })
}
