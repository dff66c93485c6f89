use anyhow::Result;
use clap::{Args, ValueEnum};

use super::{GlobalArgs, SourceArgs};
use crate::output;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    #[default]
    Json,
    Yaml,
}

#[derive(Args)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[arg(long, value_enum, default_value_t = Format::Json, help = "Output format")]
    pub format: Format,

    #[arg(long, help = "Print one dotted KEY=VALUE line per leaf")]
    pub flat: bool,
}

pub fn run(global: &GlobalArgs, args: ResolveArgs) -> Result<()> {
    let name = args.source.name.clone();
    let resolution = super::resolve(global, args.source)?;

    if resolution.values.is_empty() {
        output::warn(&format!("no values resolved for `{name}`"));
    }

    let rendered = if args.flat {
        output::flat(&resolution.values)
    } else {
        match args.format {
            Format::Json => output::json(&resolution.values)?,
            Format::Yaml => output::yaml(&resolution.values)?,
        }
    };
    println!("{rendered}");
    Ok(())
}
