use clap::Parser;
use pressbox_worker::{WorkerConfig, run_worker};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

/// Worker process hosting one guest site. Speaks the pressbox protocol on
/// stdin/stdout; logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "pressbox-worker", version)]
struct Args {
    /// Host directory backing the guest filesystem.
    #[arg(long, value_name = "DIR")]
    site_root: PathBuf,

    /// Give up on a boot that takes longer than this many seconds.
    #[arg(long, value_name = "SECS")]
    boot_timeout_secs: Option<u64>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = WorkerConfig {
        site_root: args.site_root,
        boot_timeout: args.boot_timeout_secs.map(Duration::from_secs),
    };

    run_worker(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        config,
    )
    .await?;
    Ok(())
}
