//! Acoustic fingerprinting and recognition.
//!
//! Reference recordings are reduced to spectral peaks, paired into truncated
//! SHA-1 hashes and written to a [`store::Store`]. A query clip goes through
//! the same reduction; its hashes are looked up in batches and the returned
//! rows vote on a time offset per recording. The best-voted recordings come
//! back with the offset and the share of their fingerprints that matched.

pub mod audio;
pub mod config;
pub mod db;
pub mod error;
pub mod hashing;
pub mod matching;
pub mod recognizer;
pub mod store;
pub mod visualize;

pub use config::{Config, PeakMode};
pub use db::SqliteStore;
pub use error::{ConfigError, DecodeError, Error, Result, StoreError};
pub use matching::{MatchQuality, MatchResult};
pub use recognizer::{IngestReport, Recognizer, Stage};
pub use store::{FingerprintRecord, MemoryStore, Recording, Store};
