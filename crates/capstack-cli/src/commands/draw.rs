use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;

use capstack_core::draws::{self, DrawPlanInput};
use capstack_core::Cents;

use crate::input;

/// Arguments for the draw planner
#[derive(Args)]
pub struct DrawArgs {
    /// Path to JSON input file (DrawPlanInput; overrides individual flags)
    #[arg(long)]
    pub input: Option<String>,

    /// Requested draw amount in cents
    #[arg(long)]
    pub requested: Option<Cents>,

    /// Retainage percentage as a decimal (0.05 = 5%)
    #[arg(long)]
    pub retainage_pct: Option<Decimal>,

    /// Net proceeds already advanced on the loan, in cents
    #[arg(long, default_value_t = 0)]
    pub prior_net_funded: Cents,

    /// Retainage already withheld on the loan, in cents
    #[arg(long, default_value_t = 0)]
    pub prior_retainage_held: Cents,

    /// Loan ceiling in cents
    #[arg(long)]
    pub ceiling: Option<Cents>,
}

pub fn run_draw(args: DrawArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let plan_input: DrawPlanInput = if let Some(ref path) = args.input {
        input::read_json(path)?
    } else if let Some(data) = input::read_stdin()? {
        serde_json::from_value(data)?
    } else {
        let requested = args
            .requested
            .ok_or("--requested is required (or provide --input)")?;
        let retainage_pct = args
            .retainage_pct
            .ok_or("--retainage-pct is required (or provide --input)")?;
        let ceiling = args
            .ceiling
            .ok_or("--ceiling is required (or provide --input)")?;

        DrawPlanInput {
            requested_amount: requested,
            retainage_pct,
            prior_net_funded: args.prior_net_funded,
            prior_retainage_held: args.prior_retainage_held,
            loan_ceiling: ceiling,
        }
    };

    let result = draws::plan_draw(&plan_input)?;
    Ok(serde_json::to_value(result)?)
}
