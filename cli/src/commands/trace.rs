use anyhow::{Result, bail};
use clap::Args;

use super::{GlobalArgs, SourceArgs};

#[derive(Args)]
pub struct TraceArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[arg(long, help = "Print one `KEY <- SOURCE` line per leaf instead of JSON")]
    pub flat: bool,
}

pub fn run(global: &GlobalArgs, args: TraceArgs) -> Result<()> {
    let resolution = super::resolve(global, args.source)?;
    let Some(trace) = resolution.trace else {
        bail!("source tracing is disabled");
    };

    if args.flat {
        for (path, origin) in trace.leaves() {
            println!("{path} <- {origin}");
        }
        return Ok(());
    }

    println!("{}", serde_json::to_string_pretty(&trace)?);
    Ok(())
}
