use anyhow::Result;
use clap::Args;
use config::Env;

use crate::output;

#[derive(Args)]
pub struct EnvArgs {
    #[arg(help = "Variable prefix, e.g. MY_APP")]
    pub prefix: String,

    #[arg(long, help = "Keep values as raw strings")]
    pub raw: bool,

    #[arg(long, help = "Print the variable behind each value")]
    pub trace: bool,
}

pub fn run(args: EnvArgs) -> Result<()> {
    let prefix = args.prefix.to_uppercase();
    let (values, trace) = Env::new().fetch_with_trace(&prefix, !args.raw);

    if args.trace {
        println!("{}", serde_json::to_string_pretty(&trace)?);
    } else {
        println!("{}", output::json(&values)?);
    }
    Ok(())
}
