use clap::Args;
use serde_json::Value;

use capstack_core::calls::{self, CapitalCallInput};

use crate::input;

/// Arguments for capital call allocation
#[derive(Args)]
pub struct CallArgs {
    /// Path to JSON input file (CapitalCallInput; overrides stdin)
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_call(args: CallArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let call_input: CapitalCallInput = if let Some(ref path) = args.input {
        input::read_json(path)?
    } else if let Some(data) = input::read_stdin()? {
        serde_json::from_value(data)?
    } else {
        return Err(
            "--input <file.json> or stdin required: a capital call needs the commitment schedule"
                .into(),
        );
    };

    let result = calls::allocate_capital_call(&call_input)?;
    Ok(serde_json::to_value(result)?)
}
