//! # empiredb - Player Persistence for EmpireMUD-style Worlds
//!
//! empiredb stores every player's full game state in a tagged-text record,
//! keeps a lightweight index over the whole population, groups players into
//! accounts, prepares loaded players for the live world and recounts empire
//! membership.
//!
//! ## Features
//!
//! - **Forward-compatible records**: unknown or malformed lines are skipped with a warning; only truncation is fatal.
//! - **Identity index**: every player reachable by idnum or case-folded name without loading their record.
//! - **Accounts**: one file per account plus a compact id-range index, rewritten atomically.
//! - **Login reconciliation**: stale loadrooms, hostile territory and long absences are handled at entry.
//! - **Empire membership**: per-account deduplicated member counts, greatness and playtime.
//! - **Atomic writes**: lock, temp file, fsync, rename.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use empiredb::config::Config;
//! use empiredb::playerdb::{PlayerRepository, EmptyWorld};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let now = chrono::Utc::now().timestamp();
//!     let mut repo = PlayerRepository::open(config.layout(), config.repository_options(), now)?;
//!
//!     let mut player = repo.load_player("alice", now)?;
//!     repo.save_player(&mut player, Some(3001), &EmptyWorld, now)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`playerdb`] - Record codec, identity index, accounts, login, membership
//! - [`storage`] - On-disk layout and atomic file writes
//! - [`config`] - Configuration management
//! - [`validation`] - Player name validation and file-safe stems
//! - [`logutil`] - Log sanitizing for untrusted file content
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Login / Aggr.  │ ← login reconciler, membership aggregator
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Repository    │ ← index + accounts + player files
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Storage       │ ← atomic writes under one data directory
//! └─────────────────┘
//! ```

pub mod config;
pub mod logutil;
pub mod playerdb;
pub mod storage;
pub mod validation;
