//! # Storage
//!
//! Durable state for the vault ledger: vault records, consumed proof
//! digests, and a little metadata (next vault id, binding epoch). sled does
//! the heavy lifting; bincode is the on-disk encoding.
//!
//! ```text
//! VaultLedger ──commit_transition──► VaultDB ──► sled trees
//!      ▲                                            │
//!      └──────────────── restore on open ───────────┘
//! ```

pub mod db;

pub use db::{DbError, DbResult, VaultDB};
