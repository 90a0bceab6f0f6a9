//! # Storage Module
//!
//! Durable state that must survive a process restart:
//!
//! ```text
//! db.rs: sled-backed RlnDb: ledger journal + anchored records
//! ```
//!
//! Both consumers replay what they need on startup before serving
//! requests. Bincode is used for on-disk values; JSON is for APIs.

pub mod db;

pub use db::{DbError, DbResult, RlnDb};
