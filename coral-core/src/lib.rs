//! # Coral Core
//!
//! Library scanning and persistence for the Coral music server.
//!
//! ## Overview
//!
//! - **Bulk persistence**: [`bulk::BulkInsertContext`] resolves entities by
//!   natural key against a session cache and storage, then writes new rows in
//!   foreign-key order with batched transactions.
//! - **Scanning**: [`scan::DirectoryScanner`] walks a library and yields one
//!   group of changed audio files per directory.
//! - **Indexing**: [`scan::Indexer`] decodes tags, parses artist credits, and
//!   resolves artists, albums, genres, labels, artwork and keywords.
//! - **Orchestration**: [`scan::ScanRuntime`] runs the single-consumer scan
//!   worker, the embedding pool and the scan scheduler.
//! - **Change detection**: [`scan::FsWatchService`] watches library roots and
//!   debounces changes per directory into scan jobs.
//!
//! ## Storage
//!
//! [`database::PostgresLibraryStore`] backs both storage ports with sqlx and
//! ships its migrations; [`database::InMemoryLibraryStore`] implements the
//! same ports for tests and tooling.

pub mod bulk;
pub mod database;
/// Crate error type.
pub mod error;
pub mod scan;
pub mod services;

pub use error::{CoralError, Result};
