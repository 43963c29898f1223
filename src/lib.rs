//! # zentao - session-aware client for ZenTao-style project management backends
//!
//! `zentao` logs in to a legacy project-management backend, keeps the session
//! alive across silent expiry, and turns its paginated listings of stories,
//! bugs, tasks and test cases into complete, typed, searchable collections.
//! Images embedded in entity bodies can be downloaded concurrently with
//! per-item timeouts.
//!
//! ## Features
//!
//! - **Transparent sessions**: expiry is detected from response content, renewed
//!   once and retried; concurrent callers share a single renewal
//! - **Complete listings**: multi-page aggregation with a page cap, plus local
//!   filtering for module + status combinations the backend cannot query
//! - **Local relevance search**: CJK-aware tokenizing, tiered scoring and an
//!   optional detail-fetch refinement pass
//! - **Media fetching**: order-preserving, bounded, timeout-guarded downloads
//!   that never fail as a batch
//! - **Bulk transitions**: per-item outcome reports for resolve/close batches
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use zentao::prelude::*;
//! use zentao::download::FetchMode;
//!
//! #[tokio::main]
//! async fn main() -> zentao::Result<()> {
//!     let config = ClientConfig::builder()
//!         .base_url("https://pm.example.com/zentao")
//!         .account("alice")
//!         .password("secret")
//!         .build()?;
//!     let client = Zentao::new(config)?;
//!
//!     // Every active bug of product 3, all pages
//!     let bugs = client.bugs(3, &FilterSelector::Status("active".into())).await?;
//!     println!("{} active bugs", bugs.len());
//!
//!     // Ranked search with detail refinement
//!     let request = SearchRequest::builder().keyword("大R促活").deep(true).build()?;
//!     let hits = client.search::<Story>(3, &FilterSelector::All, &request).await?;
//!
//!     // Screenshots of the best hit
//!     if let Some(best) = hits.first() {
//!         let urls = client.image_urls(&best.entity);
//!         let images = client.fetch_images(&urls, FetchMode::Parallel).await;
//!         println!("{} of {} images downloaded", images.iter().filter(|i| i.is_success()).count(), images.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`session`]: login, expiry classification and single-flight renewal
//! - [`pagination`]: sequential page walking and local filtering
//! - [`search`]: tokenizer, scorer, ranking and deep refinement
//! - [`download`]: concurrent image downloads and format sniffing
//! - [`client`]: the [`Zentao`] facade and bulk transitions
//! - [`types`]: entity records, pager and filter selectors
//! - [`net`]: transport, endpoint table, envelope and HTML helpers
//! - [`config`], [`error`]: configuration and the error taxonomy
//!
//! The library emits [`tracing`](https://docs.rs/tracing) events and never
//! installs a subscriber. Session ids never appear in events or errors.

pub mod client;
pub mod config;
pub mod download;
pub mod error;
pub mod net;
pub mod pagination;
pub mod search;
pub mod session;
pub mod types;

/// Prelude module for convenient imports.
///
/// ```rust
/// use zentao::prelude::*;
///
/// // Zentao, ClientConfig, the entity types, FilterSelector,
/// // SearchRequest, DetailSource and the result helpers are now in scope.
/// ```
pub mod prelude {
    pub use crate::{
        client::{BatchReport, Transition, Zentao},
        config::ClientConfig,
        download::{DownloadResult, FetchMode},
        error::{Error, Result},
        search::{DateRange, DetailSource, ScoredEntity, ScoredResultsExt, SearchRequest},
        types::{Bug, Entity, FilterSelector, Product, Story, Task, TestCase},
    };
}

// Re-export main types at crate root for direct access
pub use client::{BatchReport, Transition, Zentao};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use search::{ScoredResultsExt, SearchRequest};
pub use types::{Entity, FilterSelector};
