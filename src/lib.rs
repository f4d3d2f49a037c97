//! # TabVault
//!
//! A crash-safe, resumable backup tool for guitar tabs.
//!
//! TabVault walks a discovery list of tab URLs, fetches each one through an
//! external browser helper, and writes it to disk as a plain-text file with
//! a metadata header. Progress lives in a JSON manifest that is replaced
//! atomically after every item, so an interrupted run resumes exactly where
//! it stopped.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌────────────┐
//! │ Discovery  │──▶│   Backup    │──▶│  Writer    │──▶ tabs/<artist>/<song>-<type>.txt
//! │ tab_urls   │   │ state loop  │   │ atomic txt │
//! └────────────┘   └──────┬──────┘   └────────────┘
//!                         │  ▲
//!                 fetch   ▼  │ per-item save
//!                  ┌──────────┐   ┌──────────────┐
//!                  │ Fetcher  │   │   Manifest   │
//!                  │ (helper) │   │ atomic JSON  │
//!                  └──────────┘   └──────┬───────┘
//!                                        │
//!                    ┌───────────────────┼───────────────┐
//!                    ▼                   ▼               ▼
//!               ┌─────────┐        ┌──────────┐    ┌──────────┐
//!               │ Verify  │        │ Recovery │    │  Status  │
//!               └─────────┘        └──────────┘    └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! tabvault backup                 # process everything not yet completed
//! tabvault sync                   # only URLs the manifest has never seen
//! tabvault retry                  # only failed URLs
//! tabvault verify --fix           # check files, demote damaged ones
//! tabvault rebuild-manifest --yes # recover the manifest from disk
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Manifest records and state transitions |
//! | [`manifest`] | Atomic manifest persistence |
//! | [`integrity`] | Hashing, header parsing, structure checks |
//! | [`writer`] | Path sanitizing, URL allow-list, atomic tab files |
//! | [`fetcher`] | Fetcher trait |
//! | [`fetcher_process`] | Helper-process fetcher |
//! | [`pacing`] | Jittered delays and retry backoff |
//! | [`backup`] | Backup/sync/retry state machine |
//! | [`verify`] | Integrity verification |
//! | [`recovery`] | Manifest rebuild, orphans, rehash |
//! | [`status`] | Progress overview |
//! | [`discovery`] | Discovery list loading |
//! | [`progress`] | `[n/total]` progress on stderr |
//! | [`logging`] | Console and file logging |
//! | [`error`] | Typed error conditions |

pub mod backup;
pub mod config;
pub mod discovery;
pub mod error;
pub mod fetcher;
pub mod fetcher_process;
pub mod integrity;
pub mod logging;
pub mod manifest;
pub mod models;
pub mod pacing;
pub mod progress;
pub mod recovery;
pub mod status;
pub mod verify;
pub mod writer;
