use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use jv_resolve::{ArtifactId, RepositoryConfig, ResolveMode, ResolverConfig, ResourceMap};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "jvres")]
#[command(about = "Resolve Maven dependency graphs", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Local cache directory (defaults to ~/.jv/repository)
    #[arg(long)]
    local_repository: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve the transitive closure of one or more coordinates
    Resolve {
        /// Seeds in groupId:artifactId:version form
        #[arg(required = true)]
        coordinates: Vec<String>,
        /// Also download every resolved artifact into the local cache
        #[arg(long)]
        download: bool,
        /// Print the resolved metadata as JSON
        #[arg(long)]
        json: bool,
        /// Extra repository URL, consulted before configured ones
        #[arg(long = "repository", value_name = "URL")]
        repositories: Vec<String>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// List versions of an artifact present in the local cache
    Cached {
        /// groupId:artifactId
        artifact: String,
        #[command(flatten)]
        common: CommonArgs,
    },
}

fn main() {
    if let Err(error) = real_main() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn real_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Resolve {
            coordinates,
            download,
            json,
            repositories,
            common,
        } => {
            let mut config = load_config(&common)?;
            for (index, url) in repositories.into_iter().enumerate() {
                config.repositories.push(
                    RepositoryConfig::new(format!("cli-{}", index + 1), url).with_priority(0),
                );
            }
            let mode = if download {
                ResolveMode::WithDownload
            } else {
                ResolveMode::MetadataOnly
            };
            let resolved = resolve(&config, &coordinates, mode)?;
            print_resolved(&resolved, json)
        }
        Commands::Cached { artifact, common } => {
            let config = load_config(&common)?;
            let id = ArtifactId::parse(&artifact)?;
            let gateway = config
                .build_gateway()
                .context("failed to open local cache")?;
            for version in gateway.cache().cached_versions(&id)? {
                println!("{version}");
            }
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(common: &CommonArgs) -> Result<ResolverConfig> {
    let mut config = match &common.config {
        Some(path) => ResolverConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ResolverConfig::default(),
    };
    if let Some(path) = &common.local_repository {
        config.local_repository = Some(path.clone());
    }
    Ok(config)
}

fn resolve(config: &ResolverConfig, seeds: &[String], mode: ResolveMode) -> Result<ResourceMap> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async {
        let resolver = config
            .build_resolver()
            .context("failed to set up resolver")?;

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling resolution");
                on_interrupt.cancel();
            }
        });

        let resolved = resolver
            .resolve_with_cancellation(seeds, mode, cancel)
            .await;
        resolved.with_context(|| format!("failed to resolve {}", seeds.join(", ")))
    })
}

fn print_resolved(resolved: &ResourceMap, json: bool) -> Result<()> {
    if json {
        let payload =
            serde_json::to_string_pretty(resolved).context("failed to serialize resolution")?;
        println!("{payload}");
        return Ok(());
    }

    for (id, pom) in resolved {
        println!("{id}:{} ({})", pom.version, pom.packaging);
    }
    Ok(())
}
