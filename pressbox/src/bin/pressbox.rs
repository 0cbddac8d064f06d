use clap::{Args, Parser, Subcommand};
use pressbox::{
    HttpRequest, MountDescriptor, PlaygroundOptions, PressboxOptions, PressboxRuntime,
    cache_key_for,
};
use std::path::PathBuf;
use std::time::Duration;

/// Boot WordPress playgrounds in worker processes.
#[derive(Parser, Debug)]
#[command(name = "pressbox", version)]
struct Cli {
    /// Home directory for cache, locks, logs and sites [default: $PRESSBOX_HOME
    /// or ~/.pressbox].
    #[arg(long, global = true, value_name = "DIR")]
    home: Option<PathBuf>,

    /// Worker binary to spawn.
    #[arg(long, global = true, value_name = "PATH")]
    worker: Option<PathBuf>,

    /// Give up on a worker that does not signal readiness in time.
    #[arg(long, global = true, value_name = "SECS")]
    ready_timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Boot a playground, send one request and print the response.
    Request(RequestArgs),
    /// Download a package into the cache.
    Fetch(FetchArgs),
}

#[derive(Args, Debug)]
struct RequestArgs {
    #[arg(long, default_value = "/")]
    url: String,

    #[arg(long)]
    method: Option<String>,

    #[arg(long)]
    follow_redirects: bool,

    /// Blueprint JSON file; only preferredVersions is honored.
    #[arg(long, value_name = "FILE")]
    blueprint: Option<PathBuf>,

    #[arg(long)]
    php: Option<String>,

    #[arg(long)]
    wp: Option<String>,

    /// Mount applied after installation, as host:vfs.
    #[arg(long = "mount", value_name = "HOST:VFS", value_parser = parse_mount)]
    mounts: Vec<MountDescriptor>,

    /// Mount applied before installation, as host:vfs.
    #[arg(long = "mount-before-install", value_name = "HOST:VFS", value_parser = parse_mount)]
    mounts_before_install: Vec<MountDescriptor>,

    /// Use cached packages only.
    #[arg(long)]
    offline: bool,

    #[arg(long, value_name = "SECS")]
    boot_timeout_secs: Option<u64>,

    /// Site directory name under <home>/sites.
    #[arg(long)]
    site: Option<String>,

    /// SQL dump seeding the database of a fresh install.
    #[arg(long, value_name = "FILE")]
    data_sql: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct FetchArgs {
    url: String,

    /// Cache key; derived from the URL when omitted.
    #[arg(long)]
    key: Option<String>,
}

fn parse_mount(spec: &str) -> Result<MountDescriptor, String> {
    MountDescriptor::parse(spec).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut options = PressboxOptions::default();
    if let Some(home) = cli.home {
        options.home_dir = std::path::absolute(home)?;
    }
    options.worker_binary = cli.worker;
    options.supervisor.ready_timeout = cli.ready_timeout_secs.map(Duration::from_secs);

    let runtime = PressboxRuntime::new(options)?;

    match cli.command {
        Command::Request(args) => request(&runtime, args).await,
        Command::Fetch(args) => fetch(&runtime, args).await,
    }
}

async fn request(runtime: &PressboxRuntime, args: RequestArgs) -> anyhow::Result<()> {
    let blueprint = match &args.blueprint {
        Some(path) => Some(serde_json::from_str(&std::fs::read_to_string(path)?)?),
        None => None,
    };

    let options = PlaygroundOptions {
        php_version: args.php,
        wp_version: args.wp,
        blueprint,
        mounts_before_install: args.mounts_before_install,
        mounts_after_install: args.mounts,
        site_name: args.site,
        offline: args.offline,
        boot_timeout: args.boot_timeout_secs.map(Duration::from_secs),
        data_sql_path: args.data_sql.map(std::path::absolute).transpose()?,
        ..Default::default()
    };

    let playground = runtime.boot_playground(options).await?;

    let request = HttpRequest {
        method: args.method,
        url: args.url,
        ..Default::default()
    };
    let result = if args.follow_redirects {
        playground.request_follow_redirects(request).await
    } else {
        playground.request(request).await
    };
    playground.dispose().await?;
    let response = result?;

    println!("HTTP {}", response.http_status_code);
    for (name, values) in &response.headers {
        for value in values {
            println!("{}: {}", name, value);
        }
    }
    println!();
    println!("{}", response.text());
    Ok(())
}

async fn fetch(runtime: &PressboxRuntime, args: FetchArgs) -> anyhow::Result<()> {
    let key = args.key.unwrap_or_else(|| cache_key_for(&args.url));
    let file = runtime.downloader().fetch(&args.url, &key).await?;
    println!("{}", file.path.display());
    Ok(())
}
