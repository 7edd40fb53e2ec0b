//! Hardware detection and the cached hardware profile.
//!
//! Detection itself is behind [`HardwareProbe`]; the cache decides when a
//! probe is needed and is the only writer of `hardware_profile.json`.

mod cache;
mod probe;

pub use cache::{HardwareError, HardwareProfileCache, HardwareResult, PROFILE_FILE};
pub use probe::{HardwareProbe, SystemProbe};
