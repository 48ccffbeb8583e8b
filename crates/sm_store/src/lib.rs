//! sm_store — server-side envelope store for SecuMSG
//!
//! Append-only ciphertext records with routing metadata, backed by
//! SQLite via sqlx. The store never inspects ciphertext or header
//! beyond structural validity; delivery marking is idempotent and a
//! delivered timestamp, once set, never changes.
//!
//! # Migration
//! SQLx migrations in `migrations/` run on open.

pub mod db;
pub mod envelopes;
pub mod error;
pub mod models;

pub use db::Store;
pub use envelopes::NewEnvelope;
pub use error::StoreError;
pub use models::EnvelopeRow;
