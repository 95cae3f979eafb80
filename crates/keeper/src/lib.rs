//! # Keeper: The Brand Asset Cache
//!
//! **Shared, persistent resolution of an optional, remotely hosted logo.**
//!
//! Any number of mount points may ask for the configured logo at the same time.
//! The keeper resolves it once (configuration fetch, then a body-less existence
//! probe), shares the result with every observer, remembers the last known id
//! across restarts, and folds in preview and confirmed updates announced by the
//! rest of the application.
//!
//! ## Core Features
//!
//! - **Single flight**: at most one resolution is in flight; everyone else waits on it.
//! - **Sticky absence**: a definitive "not found" is not probed again until a hint arrives.
//! - **No placeholder flash**: persisted metadata seeds the cache before the network answers.
//! - **Two-phase updates**: previews show immediately, confirmations re-resolve authoritatively.
//!
//! ## Usage
//!
//! ### 1. One-Shot Resolution
//!
//! ```no_run
//! use brandmark_keeper::{config, upstream, FileMetadataStore, LogoCache};
//!
//! #[async_std::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = config::load()?;
//!     let store = FileMetadataStore::new(config::metadata_path(&settings)?);
//!     let cache = LogoCache::init(settings.clone(), upstream::connect(&settings), store);
//!
//!     let snapshot = cache.resolve().await;
//!     println!("{:?} -> {:?}", snapshot.status, snapshot.locator);
//!     Ok(())
//! }
//! ```
//!
//! ### 2. Observers and Hints
//!
//! ```no_run
//! use brandmark_core::AssetHint;
//! use brandmark_keeper::{MemoryMetadataStore, LogoCache, Observer, StubUpstream};
//! use brandmark_core::CacheConfig;
//!
//! #[async_std::main]
//! async fn main() {
//!     let cache = LogoCache::init(
//!         CacheConfig::default(),
//!         StubUpstream::serving("brand.png"),
//!         MemoryMetadataStore::new(),
//!     );
//!
//!     let mut header = Observer::mount(&cache);
//!     while let Some(update) = header.changed().await {
//!         println!("header now shows {:?}", header.render());
//!         if update.status.is_final() {
//!             break;
//!         }
//!     }
//!
//!     // An operator is uploading a new logo.
//!     let _ = cache.apply_hint(AssetHint::preview_locator("blob:upload-42")).await;
//!     // The upload was committed upstream.
//!     let _ = cache.apply_hint(AssetHint::confirmed(Some("new.png".into()), None)).await;
//! }
//! ```

/// The shared cache: resolver, update protocol and lifecycle.
pub mod cache;

/// Loading runtime configuration from disk and the environment.
pub mod config;

/// Broadcast of settled state to live observers.
pub mod listeners;

/// Durable storage of the last known asset id.
pub mod metadata;

/// Per-mount-point subscribers.
pub mod observer;

/// The mutable resolution record and its transitions.
pub mod state;

/// Scripted in-memory upstream for tests and offline runs.
pub mod stub;

/// Configuration endpoint and existence probe over HTTP.
pub mod upstream;

pub use cache::LogoCache;
pub use listeners::{ListenerRegistry, ListenerToken};
pub use metadata::{FileMetadataStore, MemoryMetadataStore, MetadataStore};
pub use observer::{Observer, Phase, Rendering};
pub use state::{Origin, ResolutionState};
pub use stub::{StubProbe, StubUpstream};
pub use upstream::{ProbeVerdict, SurfUpstream, TimeoutUpstream, Upstream};
