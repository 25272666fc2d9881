//! dv_store: Encrypted local record store for DataVault
//!
//! # Encryption strategy
//! SQLite does NOT natively encrypt.  We use application-level encryption:
//! - Record payloads are stored as AES-256-GCM ciphertext with their nonce,
//!   both base64-encoded, in the `iv` / `ciphertext` columns.
//! - The vault key is generated once and kept in the single-slot
//!   `encryption_keys` table.  It is never regenerated.
//! - Non-sensitive metadata (id, name, source, type, extraction time) is
//!   stored in plaintext so it can be indexed and filtered.
//!
//! # Migration
//! SQLx migrations in `migrations/` are run on every open.

pub mod db;
pub mod error;
pub mod export;
pub mod keys;
pub mod models;
pub mod settings;

pub use db::Store;
pub use error::StoreError;
pub use export::{ExportError, ExportFormat, ExportOptions, ExportOutcome, ExportScope, Exporter};
pub use models::{BulkRead, Record, RecordFilter};
pub use settings::{load_settings, save_settings, VaultSettings};
