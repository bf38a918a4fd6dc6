//! Configuration and settings management.
//!
//! This module provides daemon settings types and persistence. Settings are
//! stored in the user's config directory as JSON.

mod settings;

pub use settings::{
    AiSettings, GoogleSettings, RateSettings, Settings, SettingsError, SyncSettings,
};
