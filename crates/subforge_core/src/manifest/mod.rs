//! The job manifest: a persisted per-stage state machine.
//!
//! Entries move `pending → running → {completed | failed}`; `skipped` is
//! reachable from `pending` only, and the sole way back is the explicit
//! reset performed on resume. Every change is persisted with an atomic
//! rename before the call returns.

mod errors;
mod state;

pub use errors::{ManifestError, ManifestResult};
pub use state::{JobManifest, ManifestEntry, TransitionMeta};
