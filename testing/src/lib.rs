//! Shared test fixtures for the layerconf workspace.
//!
//! Provides:
//! - Temporary app roots with config files ([`AppRoot`])
//! - In-memory environments ([`env_from`]) and scoped process variables
//!   ([`ScopedEnv`])
//! - Canned loaders that count their calls ([`StaticLoader`],
//!   [`FailingLoader`])
//! - A mock Doppler secrets endpoint ([`doppler_server`])

mod fixtures;

pub use fixtures::*;
