//! The page-fetching capability the backup loop depends on.
//!
//! Fetching and extracting a tab page (browser automation, selectors, popup
//! handling, authentication) lives behind the [`Fetcher`] trait. The backup
//! loop only decides *when* to fetch, rotate or rebuild; implementations
//! decide *how*.
//!
//! # Lifecycle
//!
//! 1. [`fetch`](Fetcher::fetch) is called once per selected tab, in order.
//! 2. [`rotate`](Fetcher::rotate) is called every `fetcher.rotation_size`
//!    items to refresh the underlying session while keeping its auth state.
//! 3. If rotation fails, [`rebuild`](Fetcher::rebuild) tears the resource
//!    down and starts a fresh one. Auth state may be lost.
//! 4. [`close`](Fetcher::close) is called once when the run ends.
//!
//! # Example
//!
//! ```rust
//! use anyhow::Result;
//! use async_trait::async_trait;
//! use tabvault::fetcher::Fetcher;
//! use tabvault::models::FetchedTab;
//! use url::Url;
//!
//! struct CannedFetcher;
//!
//! #[async_trait]
//! impl Fetcher for CannedFetcher {
//!     async fn fetch(&mut self, _url: &Url) -> Result<FetchedTab> {
//!         Ok(FetchedTab {
//!             title: "Mr Jones".into(),
//!             artist: "Counting Crows".into(),
//!             content: "Am F Dm G".into(),
//!             tuning: None,
//!         })
//!     }
//!     async fn rotate(&mut self) -> Result<()> { Ok(()) }
//!     async fn rebuild(&mut self) -> Result<()> { Ok(()) }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use url::Url;

use crate::models::FetchedTab;

/// A stateful page fetcher, exclusively owned by one backup run.
#[async_trait]
pub trait Fetcher: Send {
    /// Fetch and extract one tab page. The URL has already passed the
    /// source allow-list.
    async fn fetch(&mut self, url: &Url) -> Result<FetchedTab>;

    /// Refresh the session, preserving authentication where possible.
    async fn rotate(&mut self) -> Result<()>;

    /// Discard the current resource entirely and start a new one.
    async fn rebuild(&mut self) -> Result<()>;

    /// Release the resource at the end of a run.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
