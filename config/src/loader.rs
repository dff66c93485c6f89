//! # Environment Variable Loader
//!
//! Loads configuration from environment variables following 12-factor app
//! principles.
//!
//! # Naming Convention
//! `<PREFIX>_<PATH>` where `<PREFIX>` is the config's upper-cased env
//! prefix and `<PATH>` nests on `__`:
//! - `MYAPP_HOST=example.com` => `{host: "example.com"}`
//! - `MYAPP_DB__POOL=5` => `{db: {pool: 5}}`
//! - `MYAPP_HOSTS=a,b` => `{hosts: ["a", "b"]}`

use std::sync::Arc;

use errors::SourceError;

use crate::env::Env;
use crate::registry::{LoadContext, Loaded, Loader};

/// Source id the environment loader is registered under.
pub const ENV_SOURCE: &str = "env";

/// Loader backed by the resolver's shared, cached [`Env`].
#[derive(Debug, Clone)]
pub struct EnvLoader {
    env: Arc<Env>,
}

impl EnvLoader {
    pub fn new(env: Arc<Env>) -> Self {
        Self { env }
    }
}

impl Loader for EnvLoader {
    fn load(&self, ctx: &LoadContext) -> Result<Loaded, SourceError> {
        let (values, trace) = self.env.fetch_with_trace(&ctx.env_prefix, ctx.auto_cast);
        if !ctx.tracing_enabled {
            return Ok(values.into());
        }
        Ok(Loaded::traced(values, trace))
    }
}
