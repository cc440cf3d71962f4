//! Settlement shapes and the offer lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The ledger shape a settlement takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementKind {
    /// Value injected from outside: clearing debit, client fiat credit.
    ExternalDeposit,
    /// Fiat to fiat between two accounts of the same client.
    FiatExchange,
    /// Fiat debited, crypto credited.
    CryptoPurchase,
    /// Crypto debited, fiat credited.
    CryptoSale,
}

impl SettlementKind {
    /// Resolve the kind of an offer from its purchase/sale flags.
    ///
    /// Returns `None` when both flags are set.
    pub fn from_offer_flags(is_purchase: bool, is_sale: bool) -> Option<Self> {
        match (is_purchase, is_sale) {
            (false, false) => Some(SettlementKind::FiatExchange),
            (true, false) => Some(SettlementKind::CryptoPurchase),
            (false, true) => Some(SettlementKind::CryptoSale),
            (true, true) => None,
        }
    }

    /// Whether this kind moves value between crypto and fiat.
    pub fn is_crypto(&self) -> bool {
        matches!(
            self,
            SettlementKind::CryptoPurchase | SettlementKind::CryptoSale
        )
    }

    /// Number of journal rows a settlement of this kind posts.
    pub fn expected_rows(&self) -> usize {
        2
    }
}

impl fmt::Display for SettlementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SettlementKind::ExternalDeposit => "EXTERNAL_DEPOSIT",
            SettlementKind::FiatExchange => "FIAT_EXCHANGE",
            SettlementKind::CryptoPurchase => "CRYPTO_PURCHASE",
            SettlementKind::CryptoSale => "CRYPTO_SALE",
        };
        f.write_str(name)
    }
}

/// Lifecycle of an offer. No state returns to `Cached`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferState {
    /// Priced and built, not yet stored.
    Created,
    /// Stored in the offer cache, TTL running.
    Cached,
    /// Consumed and settled.
    Redeemed,
    /// Dropped by cache TTL.
    Expired,
    /// Consumed from the cache but the settlement failed.
    ConsumedButFailed,
}

impl OfferState {
    /// Check if this is a final state.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            OfferState::Redeemed | OfferState::Expired | OfferState::ConsumedButFailed
        )
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[OfferState] {
        match self {
            OfferState::Created => &[OfferState::Cached],
            OfferState::Cached => &[
                OfferState::Redeemed,
                OfferState::Expired,
                OfferState::ConsumedButFailed,
            ],
            OfferState::Redeemed => &[],
            OfferState::Expired => &[],
            OfferState::ConsumedButFailed => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: OfferState) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition_to(&mut self, next: OfferState) -> Result<(), InvalidTransition> {
        if !self.can_transition_to(next) {
            return Err(InvalidTransition { from: *self, to: next });
        }
        *self = next;
        Ok(())
    }
}

/// Attempted an offer state change the lifecycle forbids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: OfferState,
    pub to: OfferState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid offer transition from {:?} to {:?}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_flags() {
        assert_eq!(
            SettlementKind::from_offer_flags(false, false),
            Some(SettlementKind::FiatExchange)
        );
        assert_eq!(
            SettlementKind::from_offer_flags(true, false),
            Some(SettlementKind::CryptoPurchase)
        );
        assert_eq!(
            SettlementKind::from_offer_flags(false, true),
            Some(SettlementKind::CryptoSale)
        );
        assert_eq!(SettlementKind::from_offer_flags(true, true), None);
        assert!(SettlementKind::CryptoSale.is_crypto());
        assert!(!SettlementKind::ExternalDeposit.is_crypto());
    }

    #[test]
    fn test_valid_transitions() {
        let mut state = OfferState::Created;
        state.transition_to(OfferState::Cached).unwrap();
        state.transition_to(OfferState::Redeemed).unwrap();
        assert!(state.is_final());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut state = OfferState::Created;
        assert!(state.transition_to(OfferState::Redeemed).is_err());

        let mut consumed = OfferState::ConsumedButFailed;
        let err = consumed.transition_to(OfferState::Cached).unwrap_err();
        assert_eq!(err.from, OfferState::ConsumedButFailed);
        assert_eq!(consumed, OfferState::ConsumedButFailed);
    }

    #[test]
    fn test_final_states() {
        assert!(!OfferState::Created.is_final());
        assert!(!OfferState::Cached.is_final());
        assert!(OfferState::Expired.is_final());
        assert!(OfferState::ConsumedButFailed.is_final());
    }
}
