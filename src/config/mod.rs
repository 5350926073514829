//! Process configuration.
//!
//! All runtime configuration is environment-driven; see [`Settings`] for the
//! recognised variables. Tenants and routes are not configuration — they are
//! data owned by the external store.
pub mod settings;

pub use settings::{AppEnv, Settings};
