//! wpfleet-remote — everything that touches a remote host.
//!
//! The rest of the workspace sees a host only through [`Connection`]:
//! a string-in, string-out command channel. On top of it this crate
//! provides the compose-file store with backups and the workload restart.
//!
//! # Components
//!
//! - **`transport`** — `Transport` / `Connection` traits, shell quoting
//! - **`ssh`** — OpenSSH ControlMaster-backed transport
//! - **`document`** — YAML `ConfigDocument` with section/key accessors
//! - **`store`** — `RemoteConfigStore`: read, atomic write, backup, restore
//! - **`workload`** — container restart through docker compose
//! - **`memory`** — in-memory host for tests (feature `test-util`)

pub mod document;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod ssh;
pub mod store;
pub mod transport;
pub mod workload;

pub use document::{ConfigDocument, parse_value};
pub use error::{DocumentError, StoreError, StoreResult, TransportError};
pub use ssh::{SshConfig, SshTransport};
pub use store::{BackupRecord, RemoteConfigStore};
pub use transport::{BoxFuture, CommandOutput, Connection, Transport, quote};
pub use workload::Workload;

/// Re-exported so callers can build values without naming serde_yaml.
pub use serde_yaml::Value;
