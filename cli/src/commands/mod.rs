pub mod env;
pub mod resolve;
pub mod trace;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use config::{
    Config, Map, Origin, Resolver, Schema, Settings, TraceTree, auto_cast, bury, deep_merge,
};

#[derive(Parser)]
#[command(
    name = "layerconf",
    author,
    version,
    about = "layerconf - layered configuration with provenance",
    long_about = "Resolves a named config from its file, encrypted secrets, environment \
                  variables and remote secrets, in that order.\nEvery value can be traced back \
                  to the source that produced it."
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    #[arg(long, global = true, help = "Directory holding <name>.yml config files")]
    pub config_dir: Option<PathBuf>,

    #[arg(long, global = true, help = "Current environment (defaults to $APP_ENV)")]
    pub environment: Option<String>,

    #[arg(long, global = true, help = "Ignore *.local.* overlay files")]
    pub no_local: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Resolve a config and print its values")]
    Resolve(resolve::ResolveArgs),

    #[command(about = "Resolve a config and print where each value came from")]
    Trace(trace::TraceArgs),

    #[command(about = "Print the value tree parsed from <PREFIX>_* variables")]
    Env(env::EnvArgs),
}

/// Flags shared by every command that runs a resolution pass.
#[derive(Args, Debug, Default)]
pub struct SourceArgs {
    #[arg(help = "Config name, e.g. my_app")]
    pub name: String,

    #[arg(long, help = "Env prefix (defaults to the upper-cased name)")]
    pub env_prefix: Option<String>,

    #[arg(long, help = "Config file to read instead of <config-dir>/<name>.yml")]
    pub config_path: Option<PathBuf>,

    #[arg(long = "attr", value_name = "NAME", help = "Declare an attribute (repeatable)")]
    pub attrs: Vec<String>,

    #[arg(long, value_name = "NAME", help = "Require an attribute (repeatable)")]
    pub required: Vec<String>,

    #[arg(long = "set", value_name = "KEY=VALUE", help = "Override a value (repeatable)")]
    pub overrides: Vec<String>,
}

/// Values and provenance of one resolution.
pub struct Resolution {
    pub values: Map,
    pub trace: Option<TraceTree>,
}

pub fn build_settings(global: &GlobalArgs, config_path: Option<PathBuf>) -> Settings {
    let mut settings = Settings::from_env();
    if let Some(environment) = &global.environment {
        settings = settings.with_environment(environment.as_str());
    }
    if let Some(dir) = &global.config_dir {
        settings = settings.with_config_dir(dir);
    }
    if let Some(path) = config_path {
        settings = settings.with_config_path_resolver(move |_| path.clone());
    }
    if global.no_local {
        settings = settings.with_local_files(false);
    }
    settings
}

/// Parse `a.b=value` into a nested override; the value is auto-cast.
pub fn parse_assignment(raw: &str, into: &mut Map) -> Result<()> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("invalid override `{raw}`: expected KEY=VALUE");
    };
    let path: Vec<&str> = key.split('.').collect();
    if path.iter().any(|segment| segment.is_empty()) {
        bail!("invalid override `{raw}`: empty key segment");
    }
    bury(into, &path, auto_cast(value));
    Ok(())
}

/// Run one resolution pass as described by `args`.
///
/// Without declared attributes the pass is schema-less and keeps every key.
pub fn resolve(global: &GlobalArgs, args: SourceArgs) -> Result<Resolution> {
    let mut overrides = Map::new();
    for raw in &args.overrides {
        parse_assignment(raw, &mut overrides)?;
    }

    let settings = build_settings(global, args.config_path);
    let resolver = Resolver::with_default_sources(settings, config::Env::new())
        .context("failed to set up config sources")?;

    if args.attrs.is_empty() {
        if !args.required.is_empty() || args.env_prefix.is_some() {
            bail!("--required and --env-prefix need attributes declared with --attr");
        }
        let resolved = resolver
            .load_for(&args.name)
            .with_context(|| format!("failed to load `{}`", args.name))?;
        let mut values = resolved.values;
        let mut trace = resolved.trace;
        if let Some(trace) = trace.as_mut() {
            trace.merge_values(&overrides, &Origin::load());
        }
        deep_merge(&mut values, overrides);
        return Ok(Resolution { values, trace });
    }

    let mut builder = Schema::builder()
        .config_name(args.name.as_str())
        .attrs(args.attrs)
        .required(args.required);
    if let Some(prefix) = args.env_prefix {
        builder = builder.env_prefix(prefix);
    }
    let schema = builder.build()?;

    let config = Config::with_overrides(Arc::new(schema), Arc::new(resolver), overrides)?;
    tracing::debug!(config = config.config_name(), "Resolved config");
    Ok(Resolution {
        values: config.to_h(),
        trace: config.to_source_trace().cloned(),
    })
}
