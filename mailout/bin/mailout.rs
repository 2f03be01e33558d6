#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(version, about = "Form-to-email gateway")]
struct Args {
    /// Configuration file, overriding every other location
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = find_config_file(args.config)?;
    let config_content = std::fs::read_to_string(&config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to read config from {}: {}",
            config_path.display(),
            e
        )
    })?;
    let mailout: mailout::controller::Mailout = ron::from_str(&config_content)?;

    mailout.run().await
}

/// Find the configuration file using the following precedence:
/// 1. `--config` on the command line
/// 2. `MAILOUT_CONFIG` environment variable
/// 3. ./mailout.config.ron (current working directory)
/// 4. /etc/mailout/mailout.config.ron (system-wide config)
fn find_config_file(cli: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(path) = cli {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("--config points to non-existent file: {}", path.display());
    }

    if let Ok(env_path) = std::env::var("MAILOUT_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "MAILOUT_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./mailout.config.ron"),
        PathBuf::from("/etc/mailout/mailout.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - --config\n  - MAILOUT_CONFIG environment variable\n{paths_tried}"
    )
}
