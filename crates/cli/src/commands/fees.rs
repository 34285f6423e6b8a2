//! `hireline fees` -- preview the escrow split for a budget.

use std::process;

use hireline_core::{AmountError, EscrowSplit, FeeRate};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::OutputFormat;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct FeePreview {
    pub(crate) platform_fee_percentage: FeeRate,
    #[serde(flatten)]
    pub(crate) split: EscrowSplit,
}

pub(crate) fn fee_preview(amount: Decimal, percent: Option<Decimal>) -> Result<FeePreview, AmountError> {
    let rate = match percent {
        Some(p) => FeeRate::from_percent(p)?,
        None => FeeRate::default(),
    };
    Ok(FeePreview {
        platform_fee_percentage: rate,
        split: EscrowSplit::compute(amount, rate)?,
    })
}

fn render_text(preview: &FeePreview) -> String {
    let fee_label = format!("platform fee ({})", preview.platform_fee_percentage);
    let rows = [
        ("escrow amount", preview.split.escrow_amount),
        (fee_label.as_str(), preview.split.platform_fee_amount),
        ("freelancer payout", preview.split.freelancer_payout_amount),
    ];
    let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    rows.iter()
        .map(|(label, value)| format!("{:<width$}  {:>12}", label, value.to_string(), width = width))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn cmd_fees(amount: Decimal, percent: Option<Decimal>, output: OutputFormat) {
    let preview = match fee_preview(amount, percent) {
        Ok(p) => p,
        Err(e) => {
            match output {
                OutputFormat::Json => eprintln!("{}", serde_json::json!({ "error": e.to_string() })),
                OutputFormat::Text => eprintln!("error: {}", e),
            }
            process::exit(1);
        }
    };

    match output {
        OutputFormat::Json => {
            let pretty = serde_json::to_string_pretty(&preview)
                .unwrap_or_else(|e| format!("{{\"error\": \"serialization error: {}\"}}", e));
            println!("{}", pretty);
        }
        OutputFormat::Text => println!("{}", render_text(&preview)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn default_rate_is_five_percent() {
        let p = fee_preview(d("900"), None).unwrap();
        assert_eq!(p.platform_fee_percentage.percent(), d("5"));
        assert_eq!(p.split.platform_fee_amount, d("45.00"));
        assert_eq!(p.split.freelancer_payout_amount, d("855.00"));
    }

    #[test]
    fn custom_rate_and_rounding() {
        let p = fee_preview(d("333.33"), Some(d("10"))).unwrap();
        assert_eq!(p.split.platform_fee_amount, d("33.33"));
        assert!(p.split.is_balanced());
    }

    #[test]
    fn rejects_bad_inputs() {
        assert!(fee_preview(d("0"), None).is_err());
        assert!(fee_preview(d("10.001"), None).is_err());
        assert!(fee_preview(d("100"), Some(d("101"))).is_err());
    }

    #[test]
    fn json_is_flat() {
        let p = fee_preview(d("900"), None).unwrap();
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["escrow_amount"], "900.00");
        assert_eq!(v["platform_fee_amount"], "45.00");
        assert_eq!(v["freelancer_payout_amount"], "855.00");
        assert!(v.get("split").is_none());
    }

    #[test]
    fn text_lists_all_three_figures() {
        let text = render_text(&fee_preview(d("900"), None).unwrap());
        assert!(text.contains("escrow amount"));
        assert!(text.contains("platform fee (5%)"));
        assert!(text.contains("855.00"));
    }
}
