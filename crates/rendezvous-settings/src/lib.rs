//! # rendezvous-settings
//!
//! Layered configuration for the rendezvous relay.
//!
//! Sources, lowest to highest priority:
//! 1. Compiled defaults ([`RendezvousSettings::default()`])
//! 2. `~/.rendezvous/settings.json` (deep-merged)
//! 3. `RENDEZVOUS_*` environment variables
//!
//! Command-line flags are applied on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings_from_path, settings_path, validate};
pub use types::{CollisionPolicy, LoggingSettings, RendezvousSettings, ServerSettings};
