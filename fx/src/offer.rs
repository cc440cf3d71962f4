//! Priced, time-boxed conversion offers.

use chrono::{DateTime, Duration, Utc};
use exchequer_common::{ClientId, Currency, Money, OfferId, SettlementKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::conversion::Quote;

/// A conversion a client may redeem once before `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    /// Internal identifier, never shown to the client in clear.
    pub id: OfferId,
    /// Client the offer was priced for.
    pub client_id: ClientId,
    /// Currency debited on redemption.
    pub source: Currency,
    /// Currency credited on redemption.
    pub destination: Currency,
    /// Quoted rate.
    pub rate: Decimal,
    /// Amount debited from the source account.
    pub debit_amount: Decimal,
    /// Amount credited to the destination account.
    pub credit_amount: Decimal,
    /// Fiat to crypto.
    pub is_purchase: bool,
    /// Crypto to fiat.
    pub is_sale: bool,
    /// When the offer was created.
    pub created_at: DateTime<Utc>,
    /// When the offer stops being redeemable.
    pub expires_at: DateTime<Utc>,
}

impl Offer {
    /// Build an offer from a quote with a fresh identifier.
    pub fn new(
        client_id: ClientId,
        quote: &Quote,
        is_purchase: bool,
        is_sale: bool,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: OfferId::new(),
            client_id,
            source: quote.pair.base,
            destination: quote.pair.quote,
            rate: quote.rate,
            debit_amount: quote.source_amount,
            credit_amount: quote.amount,
            is_purchase,
            is_sale,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Settlement shape this offer redeems into.
    ///
    /// `None` when both kind flags are set.
    pub fn kind(&self) -> Option<SettlementKind> {
        SettlementKind::from_offer_flags(self.is_purchase, self.is_sale)
    }

    /// Check if the offer is past its expiry.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Get remaining time until expiry.
    pub fn time_remaining(&self) -> Duration {
        let remaining = self.expires_at.signed_duration_since(Utc::now());
        if remaining < Duration::zero() {
            Duration::zero()
        } else {
            remaining
        }
    }

    pub fn debit(&self) -> Money {
        Money::new(self.debit_amount, self.source)
    }

    pub fn credit(&self) -> Money {
        Money::new(self.credit_amount, self.destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchequer_common::CurrencyPair;
    use rust_decimal_macros::dec;

    fn quote() -> Quote {
        Quote::price(
            CurrencyPair::new(Currency::usd(), Currency::cad()),
            dec!(1.35),
            dec!(100.00),
        )
        .unwrap()
    }

    #[test]
    fn test_offer_from_quote() {
        let client = ClientId::new();
        let offer = Offer::new(client, &quote(), false, false, Duration::minutes(2));

        assert_eq!(offer.client_id, client);
        assert_eq!(offer.debit(), Money::new(dec!(100.00), Currency::usd()));
        assert_eq!(offer.credit(), Money::new(dec!(135.00), Currency::cad()));
        assert_eq!(offer.kind(), Some(SettlementKind::FiatExchange));
        assert_eq!(offer.expires_at - offer.created_at, Duration::minutes(2));
        assert!(!offer.is_expired());
        assert!(offer.time_remaining() > Duration::zero());
    }

    #[test]
    fn test_expired_offer() {
        let offer = Offer::new(ClientId::new(), &quote(), false, false, Duration::seconds(-1));

        assert!(offer.is_expired());
        assert_eq!(offer.time_remaining(), Duration::zero());
    }

    #[test]
    fn test_offer_ids_are_unique() {
        let a = Offer::new(ClientId::new(), &quote(), false, false, Duration::minutes(2));
        let b = Offer::new(ClientId::new(), &quote(), false, false, Duration::minutes(2));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_conflicting_flags_have_no_kind() {
        let offer = Offer::new(ClientId::new(), &quote(), true, true, Duration::minutes(2));
        assert_eq!(offer.kind(), None);
    }
}
