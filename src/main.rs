//! Entry point for the ftrelay CLI.
//!
//! `ftrelay gateway` serves HTTP downloads and waits for a holder;
//! `ftrelay share FILE` dials a gateway and exposes the file through it.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ftrelay::cli::{Cli, Command};
use ftrelay::{Gateway, share};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    match &cli.command {
        Command::Gateway(args) => {
            let config = args.to_config();
            Gateway::bind(&config).await?.run().await?;
        }
        Command::Share(args) => {
            let stats = share(&args.to_config()).await?;
            if !cli.is_quiet() {
                eprintln!(
                    "\nServed {} reads, {} seeks ({} rejected)",
                    stats.reads, stats.seeks, stats.rejected_seeks
                );
                eprintln!("Total bytes transferred: {}", format_size(stats.bytes_sent));
            }
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over `-v` / `-q`.
fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Format a byte size into a human-readable string.
///
/// ```ignore
/// assert_eq!(format_size(500), "500 bytes");
/// assert_eq!(format_size(1536), "1.50 KB");
/// ```
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
