use clap::Args;
use serde_json::Value;

use capstack_core::waterfall::{self, DistributionInput};

use crate::input;

/// Arguments for waterfall distribution
#[derive(Args)]
pub struct DistributeArgs {
    /// Path to JSON input file (DistributionInput; overrides stdin)
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_distribute(args: DistributeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let distribution_input: DistributionInput = if let Some(ref path) = args.input {
        input::read_json(path)?
    } else if let Some(data) = input::read_stdin()? {
        serde_json::from_value(data)?
    } else {
        return Err(
            "--input <file.json> or stdin required: a distribution needs tiers and positions"
                .into(),
        );
    };

    let result = waterfall::run_waterfall(&distribution_input)?;
    Ok(serde_json::to_value(result)?)
}
