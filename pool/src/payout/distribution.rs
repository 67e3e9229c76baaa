//! Share-weighted split of a block reward.
//!
//! Amounts are exact decimals. Contributors are walked from last to first;
//! every index but 0 takes its proportional cut and index 0 takes whatever is
//! left, so the gross allocations always add up to the salary pool.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;

use crate::error::DistributionError;
use crate::store::MinedBlock;

/// Base units per coin, as a decimal.
pub const COIN: Decimal = dec!(1000000000);

/// Decimal places carried by a transfer amount.
pub const AMOUNT_SCALE: u32 = 9;

#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub index: usize,
    pub address: String,
    /// Share of the salary pool, in coins.
    pub gross: Decimal,
    /// After the per-transfer fee, rounded to [`AMOUNT_SCALE`] places.
    pub net: Decimal,
}

impl Allocation {
    /// Net amount in base units; `None` when nothing is left after the fee.
    pub fn net_units(&self) -> Option<u64> {
        if self.net <= Decimal::ZERO {
            return None;
        }
        (self.net * COIN).trunc().to_u64()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PayoutPlan {
    pub total: Decimal,
    pub salaries: Decimal,
    /// In payment order: last contributor first, index 0 last.
    pub allocations: Vec<Allocation>,
}

pub fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

/// Coins to base units, truncating below one unit.
pub fn coins_to_units(value: Decimal) -> u64 {
    (value * COIN).trunc().to_u64().unwrap_or(0)
}

/// Split `reward` base units of `block` among its contributors.
pub fn plan(
    block: &MinedBlock,
    reward: u64,
    pool_fee: Decimal,
    miner_fee: Decimal,
) -> Result<PayoutPlan, DistributionError> {
    if let Some(reason) = block.integrity_problem() {
        return Err(DistributionError::Integrity {
            hash: block.hash.clone(),
            reason,
        });
    }

    let total = Decimal::from(reward) / COIN;
    let salaries = total * (Decimal::ONE - pool_fee);
    let total_shares = Decimal::from(block.total_shares);

    let mut allocations = Vec::with_capacity(block.addresses.len());
    let mut paid = Decimal::ZERO;
    for i in (0..block.addresses.len()).rev() {
        let gross = if i == 0 {
            salaries - paid
        } else if total_shares.is_zero() {
            Decimal::ZERO
        } else {
            let cut = salaries * (Decimal::from(block.shares[i]) / total_shares);
            paid += cut;
            cut
        };
        allocations.push(Allocation {
            index: i,
            address: block.addresses[i].clone(),
            gross,
            net: (gross - miner_fee).round_dp(AMOUNT_SCALE),
        });
    }

    Ok(PayoutPlan {
        total,
        salaries,
        allocations,
    })
}
