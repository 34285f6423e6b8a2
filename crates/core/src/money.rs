//! Escrow arithmetic on `rust_decimal`.
//!
//! Amounts are carried at two decimal places. The platform fee is rounded
//! with `RoundingStrategy::MidpointNearestEven` and the payout is derived by
//! subtraction, so `fee + payout == amount` holds exactly for every input.

use std::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Decimal places carried by every monetary amount.
pub const MONEY_SCALE: u32 = 2;

const ONE_HUNDRED: Decimal = Decimal::ONE_HUNDRED;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount must be positive, got {0}")]
    NotPositive(Decimal),
    #[error("amount {0} has more than 2 decimal places")]
    TooPrecise(Decimal),
    #[error("fee percentage must be between 0 and 100, got {0}")]
    FeeOutOfRange(Decimal),
    #[error("arithmetic overflow computing escrow split for {0}")]
    Overflow(Decimal),
}

/// Reject non-positive amounts and sub-cent precision.
pub fn validate_amount(amount: Decimal) -> Result<Decimal, AmountError> {
    if amount <= Decimal::ZERO {
        return Err(AmountError::NotPositive(amount));
    }
    let normalized = amount.normalize();
    if normalized.scale() > MONEY_SCALE {
        return Err(AmountError::TooPrecise(amount));
    }
    Ok(to_money(normalized))
}

fn to_money(value: Decimal) -> Decimal {
    let mut v = value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointNearestEven);
    v.rescale(MONEY_SCALE);
    v
}

/// Platform fee expressed as a percentage (`5` means 5%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct FeeRate(Decimal);

impl FeeRate {
    pub fn from_percent(percent: Decimal) -> Result<Self, AmountError> {
        if percent < Decimal::ZERO || percent > ONE_HUNDRED {
            return Err(AmountError::FeeOutOfRange(percent));
        }
        Ok(FeeRate(percent))
    }

    pub fn percent(self) -> Decimal {
        self.0
    }
}

impl Default for FeeRate {
    fn default() -> Self {
        FeeRate(Decimal::from(5))
    }
}

impl TryFrom<Decimal> for FeeRate {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        FeeRate::from_percent(value)
    }
}

impl From<FeeRate> for Decimal {
    fn from(rate: FeeRate) -> Self {
        rate.0
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0.normalize())
    }
}

/// The three escrow figures derived from an accepted budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowSplit {
    pub escrow_amount: Decimal,
    pub platform_fee_amount: Decimal,
    pub freelancer_payout_amount: Decimal,
}

impl EscrowSplit {
    pub fn compute(amount: Decimal, rate: FeeRate) -> Result<Self, AmountError> {
        let escrow_amount = validate_amount(amount)?;
        let raw_fee = escrow_amount
            .checked_mul(rate.percent())
            .and_then(|v| v.checked_div(ONE_HUNDRED))
            .ok_or(AmountError::Overflow(amount))?;
        let platform_fee_amount = to_money(raw_fee);
        let mut freelancer_payout_amount = escrow_amount - platform_fee_amount;
        freelancer_payout_amount.rescale(MONEY_SCALE);
        Ok(EscrowSplit {
            escrow_amount,
            platform_fee_amount,
            freelancer_payout_amount,
        })
    }

    pub fn is_balanced(&self) -> bool {
        self.platform_fee_amount + self.freelancer_payout_amount == self.escrow_amount
    }
}
