//! acs-store - Durable state for the collaboration server
//!
//! Two layers under one data directory: a global index (`state.json`)
//! and one file per thread under `sessions/`. Writes are atomic
//! (sibling `.tmp` + rename); reads tolerate missing or malformed
//! files because the in-memory state is authoritative for the current
//! run.

mod error;
mod state;
mod store;

pub use error::StoreError;
pub use state::{PersistedSession, PersistedState, STATE_VERSION};
pub use store::{resolve_data_dir, sanitize_session_filename, StateSnapshot, StateStore};
