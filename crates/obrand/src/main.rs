//! # Obrand: The Signboard
//! The `obrand` CLI resolves the configured brand logo the same way an embedding
//! application would, and lets an operator inspect or reset what is remembered.

use brandmark_core::{AssetHint, CacheConfig, Snapshot, Status};
use brandmark_keeper::{
    config, upstream, FileMetadataStore, LogoCache, MetadataStore, Observer, Rendering,
    StubUpstream, Upstream,
};
use clap::{Parser, Subcommand};
use colored::*;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Answer from an in-memory backend that only knows this asset id
    #[arg(long, global = true, value_name = "ASSET_ID")]
    offline: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the configured logo once and print its locator
    Resolve,
    /// Mount an observer and print every update until the logo settles
    Watch,
    /// Announce a logo change, then print what the cache shows
    Hint {
        /// Locator to show right away (e.g. an upload preview)
        #[arg(long)]
        locator: Option<String>,
        /// Asset id the change refers to
        #[arg(long)]
        asset_id: Option<String>,
        /// The change is committed upstream; re-resolve authoritatively
        #[arg(long)]
        confirmed: bool,
    },
    /// Print the persisted logo metadata
    Status,
    /// Erase the persisted logo metadata
    Forget,
}

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let settings = config::load()?;
    let store = FileMetadataStore::new(config::metadata_path(&settings)?);

    match cli.command {
        Commands::Resolve => {
            println!("🔎 Resolving logo from {}", settings.config_url.cyan());
            let cache = open_cache(settings, store, cli.offline);
            let snapshot = cache.resolve().await;
            print_snapshot(&snapshot);
        }
        Commands::Watch => {
            let wait = settings.wait_timeout();
            let cache = open_cache(settings, store, cli.offline);
            let mut observer = Observer::mount(&cache);
            print_rendering(&observer.render());

            loop {
                if !cache.is_in_flight() {
                    break;
                }
                match async_std::future::timeout(wait, observer.changed()).await {
                    Ok(Some(update)) => {
                        print_snapshot(&update);
                        if update.status.is_final() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {
                        eprintln!("⚠️ Gave up waiting after {:?}", wait);
                        break;
                    }
                }
            }
            print_rendering(&observer.settle(wait).await);
        }
        Commands::Hint {
            locator,
            asset_id,
            confirmed,
        } => {
            let hint = if confirmed {
                AssetHint::confirmed(asset_id, locator)
            } else {
                AssetHint {
                    asset_id,
                    locator,
                    confirmed: false,
                }
            };
            let cache = open_cache(settings, store, cli.offline);
            match cache.apply_hint(hint).await {
                Ok(snapshot) => print_snapshot(&snapshot),
                Err(e) => {
                    eprintln!("❌ Hint rejected: {}", e.to_string().red());
                    std::process::exit(2);
                }
            }
        }
        Commands::Status => match store.load()? {
            Some(record) => {
                println!("📌 Remembered asset: {}", record.asset_id.green());
                println!("   Saved at: {} ms", record.saved_at);
                println!("   File: {}", store.path().display());
            }
            None => println!("📭 No logo remembered ({})", store.path().display()),
        },
        Commands::Forget => {
            store.erase()?;
            println!("🧹 Forgot persisted logo metadata");
        }
    }

    Ok(())
}

fn open_cache(settings: CacheConfig, store: FileMetadataStore, offline: Option<String>) -> LogoCache {
    let backend: Box<dyn Upstream> = match offline {
        Some(asset_id) => Box::new(StubUpstream::serving(&asset_id)),
        None => Box::new(upstream::connect(&settings)),
    };
    LogoCache::init(settings, backend, store)
}

fn print_snapshot(snapshot: &Snapshot) {
    let label = match snapshot.status {
        Status::Found if snapshot.verified => "FOUND".green(),
        Status::Found => "CACHED".yellow(),
        Status::NotFound => "NOT FOUND".red(),
        Status::Resolving => "RESOLVING".cyan(),
        Status::Unresolved => "UNRESOLVED".yellow(),
    };
    match (&snapshot.asset_id, &snapshot.locator) {
        (Some(id), Some(locator)) => {
            println!("[v{}] {} {} -> {}", snapshot.version, label, id.bold(), locator)
        }
        _ => println!("[v{}] {} (fallback logo)", snapshot.version, label),
    }
}

fn print_rendering(rendering: &Rendering) {
    match rendering {
        Rendering::Asset { locator, .. } => println!("🖼️  Showing {}", locator.green()),
        Rendering::Fallback => println!("🔤 Showing fallback logo"),
    }
}
