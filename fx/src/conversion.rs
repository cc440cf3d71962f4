//! Quote results.

use chrono::{DateTime, Utc};
use exchequer_common::{truncate_to_scale, CurrencyPair, Money, MAX_AMOUNT};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{FxError, FxResult};

/// A priced conversion returned by a quote provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Source to destination.
    pub pair: CurrencyPair,
    /// Units of destination per unit of source.
    pub rate: Decimal,
    /// Source amount that was priced.
    pub source_amount: Decimal,
    /// Resulting destination amount, truncated to the destination scale.
    pub amount: Decimal,
    /// When the quote was produced.
    pub quoted_at: DateTime<Utc>,
}

impl Quote {
    /// Price `source_amount` at `rate`, truncating to the destination scale.
    ///
    /// Fails when the product overflows or lands above [`MAX_AMOUNT`].
    pub fn price(pair: CurrencyPair, rate: Decimal, source_amount: Decimal) -> FxResult<Self> {
        let amount = source_amount
            .checked_mul(rate)
            .map(|product| truncate_to_scale(product, pair.quote))
            .filter(|amount| amount.abs() <= MAX_AMOUNT)
            .ok_or(FxError::AmountOverflow {
                pair,
                amount: source_amount,
                rate,
            })?;

        Ok(Self {
            pair,
            rate,
            source_amount,
            amount,
            quoted_at: Utc::now(),
        })
    }

    /// The amount the client will be debited.
    pub fn debit(&self) -> Money {
        Money::new(self.source_amount, self.pair.base)
    }

    /// The amount the client will be credited.
    pub fn credit(&self) -> Money {
        Money::new(self.amount, self.pair.quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchequer_common::Currency;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_truncates_to_destination_scale() {
        let pair = CurrencyPair::new(Currency::usd(), Currency::cad());
        let quote = Quote::price(pair, dec!(1.35678), dec!(10.00)).unwrap();

        assert_eq!(quote.amount, dec!(13.56));
        assert_eq!(quote.debit(), Money::new(dec!(10.00), Currency::usd()));
        assert_eq!(quote.credit().currency, Currency::cad());
    }

    #[test]
    fn test_price_crypto_scale() {
        let pair = CurrencyPair::new(Currency::usd(), Currency::btc());
        let quote = Quote::price(pair, dec!(0.0000333333333), dec!(100.00)).unwrap();

        assert_eq!(quote.amount, dec!(0.00333333));
    }

    #[test]
    fn test_price_can_round_to_zero() {
        let pair = CurrencyPair::new(Currency::usd(), Currency::btc());
        let quote = Quote::price(pair, dec!(0.00000001), dec!(0.01)).unwrap();

        assert!(quote.amount.is_zero());
    }

    #[test]
    fn test_price_overflow_is_an_error() {
        let pair = CurrencyPair::new(Currency::usd(), Currency::cad());

        assert!(matches!(
            Quote::price(pair, dec!(1.35), Decimal::MAX),
            Err(FxError::AmountOverflow { .. })
        ));
        // Fits a Decimal but not a ledger column.
        assert!(matches!(
            Quote::price(pair, dec!(1000), MAX_AMOUNT),
            Err(FxError::AmountOverflow { .. })
        ));
        assert_eq!(
            Quote::price(pair, dec!(1), MAX_AMOUNT).unwrap().amount,
            MAX_AMOUNT
        );
    }
}
