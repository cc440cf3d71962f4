//! Journal entries and the settlement consistency rules.
//!
//! Every settlement posts exactly two rows sharing one [`TxId`]. Debits carry a
//! negative amount, credits a positive one.
//!
//! Rows in a single currency must sum to zero. Cross-currency settlements
//! (fiat exchange, crypto purchase and sale) cannot: their two legs differ by
//! the quoted rate. For those the check is structural instead. It requires one
//! debit and one credit, both on the same client, in the currency classes the
//! settlement kind calls for.

use std::collections::HashMap;

use chrono::{DateTime, SubsecRound, Utc};
use exchequer_common::{
    AccountKey, ClientId, Currency, Money, SettlementKind, TxId, MAX_AMOUNT,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One immutable signed ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Settlement this row belongs to.
    pub tx_id: TxId,
    /// Client owning the account.
    pub client_id: ClientId,
    /// Account currency.
    pub currency: Currency,
    /// Signed amount: negative for a debit.
    pub amount: Decimal,
    /// When the settlement was posted.
    pub transacted_at: DateTime<Utc>,
}

impl JournalEntry {
    pub fn key(&self) -> AccountKey {
        AccountKey::new(self.client_id, self.currency)
    }

    pub fn is_debit(&self) -> bool {
        self.amount < Decimal::ZERO
    }

    /// Whether this row moves a system clearing account.
    pub fn is_clearing(&self) -> bool {
        self.currency.is_clearing()
    }
}

/// The closed set of rows one settlement posts.
#[derive(Debug, Clone)]
pub struct JournalBatch {
    pub tx_id: TxId,
    pub kind: SettlementKind,
    pub entries: Vec<JournalEntry>,
}

impl JournalBatch {
    /// Value entering from outside: the treasury's clearing account is debited
    /// and the client's fiat account credited by the same amount.
    pub fn external_deposit(treasury: ClientId, client_id: ClientId, amount: Money) -> Self {
        let tx_id = TxId::new();
        let at = posting_time();
        Self {
            tx_id,
            kind: SettlementKind::ExternalDeposit,
            entries: vec![
                JournalEntry {
                    tx_id,
                    client_id: treasury,
                    currency: Currency::deposit(),
                    amount: -amount.value,
                    transacted_at: at,
                },
                JournalEntry {
                    tx_id,
                    client_id,
                    currency: amount.currency,
                    amount: amount.value,
                    transacted_at: at,
                },
            ],
        }
    }

    /// A conversion between two accounts of one client.
    pub fn conversion(kind: SettlementKind, client_id: ClientId, debit: Money, credit: Money) -> Self {
        let tx_id = TxId::new();
        let at = posting_time();
        Self {
            tx_id,
            kind,
            entries: vec![
                JournalEntry {
                    tx_id,
                    client_id,
                    currency: debit.currency,
                    amount: -debit.value,
                    transacted_at: at,
                },
                JournalEntry {
                    tx_id,
                    client_id,
                    currency: credit.currency,
                    amount: credit.value,
                    transacted_at: at,
                },
            ],
        }
    }

    /// Net delta per account, clearing accounts included.
    pub fn deltas(&self) -> HashMap<AccountKey, Decimal> {
        let mut deltas: HashMap<AccountKey, Decimal> = HashMap::new();
        for entry in &self.entries {
            *deltas.entry(entry.key()).or_insert(Decimal::ZERO) += entry.amount;
        }
        deltas
    }

    /// Whether single-currency rows sum to zero.
    ///
    /// Batches spanning more than one currency are always reported balanced;
    /// [`check_consistency`] covers them.
    pub fn is_balanced(&self) -> bool {
        let mut sums: HashMap<Currency, Decimal> = HashMap::new();
        for entry in &self.entries {
            *sums.entry(entry.currency).or_insert(Decimal::ZERO) += entry.amount;
        }
        sums.len() > 1 || sums.values().all(|sum| sum.is_zero())
    }

    /// Total debited across all rows, as a positive number.
    pub fn total_debits(&self) -> Decimal {
        self.entries
            .iter()
            .filter(|e| e.is_debit())
            .map(|e| -e.amount)
            .sum()
    }

    /// Validate the batch against its own declared kind.
    pub fn check(&self) -> Result<(), ConsistencyError> {
        let kind = check_consistency(&self.entries)?;
        if kind != self.kind {
            return Err(ConsistencyError::KindMismatch {
                declared: self.kind,
                found: kind,
            });
        }
        Ok(())
    }
}

/// Timestamps are stored at microsecond precision.
fn posting_time() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Ways a set of journal rows can violate the settlement rules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsistencyError {
    #[error("expected 2 rows, found {0}")]
    RowCount(usize),

    #[error("rows carry different transaction ids")]
    MixedTransactions,

    #[error("zero amount row")]
    ZeroAmount,

    #[error("row amount {0} is outside the amount range")]
    OutOfRange(Decimal),

    #[error("expected one debit and one credit")]
    Direction,

    #[error("single-currency rows sum to {0}, not zero")]
    Unbalanced(Decimal),

    #[error("legs belong to different clients")]
    ClientMismatch,

    #[error("no settlement kind matches currencies {debit} -> {credit}")]
    UnknownShape { debit: Currency, credit: Currency },

    #[error("declared {declared} but rows form {found}")]
    KindMismatch {
        declared: SettlementKind,
        found: SettlementKind,
    },
}

/// Check a transaction's rows and return the settlement kind they form.
pub fn check_consistency(entries: &[JournalEntry]) -> Result<SettlementKind, ConsistencyError> {
    if entries.len() != 2 {
        return Err(ConsistencyError::RowCount(entries.len()));
    }
    if entries.iter().any(|e| e.tx_id != entries[0].tx_id) {
        return Err(ConsistencyError::MixedTransactions);
    }
    if entries.iter().any(|e| e.amount.is_zero()) {
        return Err(ConsistencyError::ZeroAmount);
    }
    if let Some(entry) = entries.iter().find(|e| e.amount.abs() > MAX_AMOUNT) {
        return Err(ConsistencyError::OutOfRange(entry.amount));
    }

    let (debit, credit) = match (&entries[0], &entries[1]) {
        (a, b) if a.is_debit() && !b.is_debit() => (a, b),
        (a, b) if b.is_debit() && !a.is_debit() => (b, a),
        _ => return Err(ConsistencyError::Direction),
    };

    if debit.currency == credit.currency {
        return Err(ConsistencyError::Unbalanced(debit.amount + credit.amount));
    }

    let shape = ConsistencyError::UnknownShape {
        debit: debit.currency,
        credit: credit.currency,
    };

    if debit.currency == Currency::deposit() {
        if !credit.currency.is_fiat() {
            return Err(shape);
        }
        // Clearing and client legs are in different units but the same value.
        let net = debit.amount + credit.amount;
        if !net.is_zero() {
            return Err(ConsistencyError::Unbalanced(net));
        }
        return Ok(SettlementKind::ExternalDeposit);
    }

    if debit.client_id != credit.client_id {
        return Err(ConsistencyError::ClientMismatch);
    }

    match (debit.currency.is_fiat(), credit.currency.is_fiat()) {
        (true, true) => Ok(SettlementKind::FiatExchange),
        (true, false) if credit.currency.is_crypto() => Ok(SettlementKind::CryptoPurchase),
        (false, true) if debit.currency.is_crypto() => Ok(SettlementKind::CryptoSale),
        _ => Err(shape),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn usd(value: Decimal) -> Money {
        Money::new(value, Currency::usd())
    }

    #[test]
    fn test_fiat_exchange_rows() {
        let client = ClientId::new();
        let batch = JournalBatch::conversion(
            SettlementKind::FiatExchange,
            client,
            usd(dec!(100.00)),
            Money::new(dec!(135.00), Currency::cad()),
        );

        assert_eq!(batch.entries.len(), 2);
        assert_eq!(batch.entries[0].amount, dec!(-100.00));
        assert_eq!(batch.entries[1].amount, dec!(135.00));
        assert!(batch.entries.iter().all(|e| e.tx_id == batch.tx_id));
        assert_eq!(batch.total_debits(), dec!(100.00));
        assert!(batch.check().is_ok());
    }

    #[test]
    fn test_cross_currency_does_not_sum_to_zero() {
        let batch = JournalBatch::conversion(
            SettlementKind::FiatExchange,
            ClientId::new(),
            usd(dec!(100.00)),
            Money::new(dec!(135.00), Currency::cad()),
        );

        let raw: Decimal = batch.entries.iter().map(|e| e.amount).sum();
        assert_ne!(raw, Decimal::ZERO);
        assert!(batch.is_balanced());
        assert_eq!(
            check_consistency(&batch.entries),
            Ok(SettlementKind::FiatExchange)
        );
    }

    #[test]
    fn test_deposit_rows() {
        let treasury = ClientId::new();
        let client = ClientId::new();
        let batch = JournalBatch::external_deposit(treasury, client, usd(dec!(500.00)));

        assert_eq!(batch.entries[0].currency, Currency::deposit());
        assert_eq!(batch.entries[0].client_id, treasury);
        assert!(batch.entries[0].is_clearing());
        assert_eq!(batch.entries[1].key(), AccountKey::new(client, Currency::usd()));
        assert_eq!(
            check_consistency(&batch.entries),
            Ok(SettlementKind::ExternalDeposit)
        );
    }

    #[test]
    fn test_crypto_kinds() {
        let client = ClientId::new();
        let purchase = JournalBatch::conversion(
            SettlementKind::CryptoPurchase,
            client,
            usd(dec!(300.00)),
            Money::new(dec!(0.012), Currency::btc()),
        );
        let sale = JournalBatch::conversion(
            SettlementKind::CryptoSale,
            client,
            Money::new(dec!(0.5), Currency::eth()),
            usd(dec!(900.00)),
        );

        assert!(purchase.check().is_ok());
        assert!(sale.check().is_ok());
    }

    #[test]
    fn test_declared_kind_must_match() {
        let batch = JournalBatch::conversion(
            SettlementKind::CryptoSale,
            ClientId::new(),
            usd(dec!(300.00)),
            Money::new(dec!(0.012), Currency::btc()),
        );

        assert_eq!(
            batch.check(),
            Err(ConsistencyError::KindMismatch {
                declared: SettlementKind::CryptoSale,
                found: SettlementKind::CryptoPurchase,
            })
        );
    }

    #[test]
    fn test_same_currency_must_sum_to_zero() {
        let client = ClientId::new();
        let batch = JournalBatch::conversion(
            SettlementKind::FiatExchange,
            client,
            usd(dec!(100.00)),
            usd(dec!(99.00)),
        );

        assert!(!batch.is_balanced());
        assert_eq!(
            check_consistency(&batch.entries),
            Err(ConsistencyError::Unbalanced(dec!(-1.00)))
        );
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let client = ClientId::new();
        let mut batch = JournalBatch::conversion(
            SettlementKind::FiatExchange,
            client,
            usd(dec!(100.00)),
            Money::new(dec!(92.00), Currency::eur()),
        );

        let mut three = batch.entries.clone();
        three.push(batch.entries[0].clone());
        assert_eq!(check_consistency(&three), Err(ConsistencyError::RowCount(3)));

        batch.entries[1].client_id = ClientId::new();
        assert_eq!(
            check_consistency(&batch.entries),
            Err(ConsistencyError::ClientMismatch)
        );

        batch.entries[1].client_id = client;
        batch.entries[1].amount = dec!(-92.00);
        assert_eq!(
            check_consistency(&batch.entries),
            Err(ConsistencyError::Direction)
        );

        batch.entries[1].tx_id = TxId::new();
        assert_eq!(
            check_consistency(&batch.entries),
            Err(ConsistencyError::MixedTransactions)
        );
    }

    #[test]
    fn test_rejects_rows_past_max_amount() {
        let batch = JournalBatch::conversion(
            SettlementKind::FiatExchange,
            ClientId::new(),
            usd(dec!(1.00)),
            Money::new(Decimal::MAX, Currency::cad()),
        );

        assert_eq!(
            check_consistency(&batch.entries),
            Err(ConsistencyError::OutOfRange(Decimal::MAX))
        );
    }

    #[test]
    fn test_crypto_to_crypto_has_no_kind() {
        let batch = JournalBatch::conversion(
            SettlementKind::CryptoSale,
            ClientId::new(),
            Money::new(dec!(1), Currency::btc()),
            Money::new(dec!(15), Currency::eth()),
        );

        assert!(matches!(
            check_consistency(&batch.entries),
            Err(ConsistencyError::UnknownShape { .. })
        ));
    }
}
