//! Balance changes applied by a posting.

use exchequer_common::{AccountKey, MAX_AMOUNT};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

/// Before and after of one account touched by a posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub key: AccountKey,
    pub delta: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
}

impl BalanceChange {
    /// Compute the change of applying `delta` to `balance`.
    ///
    /// A debit that would leave the account below zero is refused, as is a
    /// result outside [`MAX_AMOUNT`].
    pub fn compute(key: AccountKey, balance: Decimal, delta: Decimal) -> LedgerResult<Self> {
        let after = balance
            .checked_add(delta)
            .filter(|after| after.abs() <= MAX_AMOUNT)
            .ok_or(LedgerError::BalanceOverflow {
                key,
                balance,
                delta,
            })?;
        if delta < Decimal::ZERO && after < Decimal::ZERO {
            return Err(LedgerError::InsufficientFunds {
                key,
                available: balance,
                requested: -delta,
            });
        }

        Ok(Self {
            key,
            delta,
            balance_before: balance,
            balance_after: after,
        })
    }

    pub fn is_debit(&self) -> bool {
        self.delta < Decimal::ZERO
    }
}
