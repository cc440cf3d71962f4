//! Currency and amount model.
//!
//! Currencies are a closed set: ISO 4217 fiat codes, a fixed list of crypto
//! tickers, and two clearing sentinels owned by the system. Amounts are
//! `Decimal` values constrained to the scale of their currency.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Fractional digits carried by fiat amounts.
pub const FIAT_DECIMAL_PLACES: u32 = 2;

/// Fractional digits carried by crypto amounts.
pub const CRYPTO_DECIMAL_PLACES: u32 = 8;

/// Largest magnitude an amount or balance may take: twenty integer digits,
/// the integer range of the `NUMERIC(28, 8)` ledger columns.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0x630F_FFFF, 0x6BC7_5E2D, 0x5, false, 0);

const FIAT_CODES: &[&str] = &[
    "AED", "AFN", "ALL", "AMD", "ANG", "AOA", "ARS", "AUD", "AWG", "AZN", "BAM", "BBD", "BDT",
    "BGN", "BHD", "BIF", "BMD", "BND", "BOB", "BRL", "BSD", "BTN", "BWP", "BYN", "BZD", "CAD",
    "CDF", "CHF", "CLP", "CNY", "COP", "CRC", "CUC", "CUP", "CVE", "CZK", "DJF", "DKK", "DOP",
    "DZD", "EGP", "ERN", "ETB", "EUR", "FJD", "FKP", "GBP", "GEL", "GGP", "GHS", "GIP", "GMD",
    "GNF", "GTQ", "GYD", "HKD", "HNL", "HRK", "HTG", "HUF", "IDR", "ILS", "IMP", "INR", "IQD",
    "IRR", "ISK", "JEP", "JMD", "JOD", "JPY", "KES", "KGS", "KHR", "KMF", "KPW", "KRW", "KWD",
    "KYD", "KZT", "LAK", "LBP", "LKR", "LRD", "LSL", "LYD", "MAD", "MDL", "MGA", "MKD", "MMK",
    "MNT", "MOP", "MRU", "MUR", "MVR", "MWK", "MXN", "MYR", "MZN", "NAD", "NGN", "NIO", "NOK",
    "NPR", "NZD", "OMR", "PAB", "PEN", "PGK", "PHP", "PKR", "PLN", "PYG", "QAR", "RON", "RSD",
    "RUB", "RWF", "SAR", "SBD", "SCR", "SDG", "SEK", "SGD", "SHP", "SLL", "SOS", "SPL", "SRD",
    "STN", "SVC", "SYP", "SZL", "THB", "TJS", "TMT", "TND", "TOP", "TRY", "TTD", "TVD", "TWD",
    "TZS", "UAH", "UGX", "USD", "UYU", "UZS", "VEF", "VND", "VUV", "WST", "XAF", "XCD", "XDR",
    "XOF", "XPF", "YER", "ZAR", "ZMW", "ZWD",
];

const CRYPTO_TICKERS: &[&str] = &[
    "ADA", "ATOM", "AVAX", "BCH", "BNB", "BTC", "DOGE", "DOT", "ETC", "ETH", "LINK", "LTC",
    "MATIC", "SOL", "TRX", "USDC", "USDT", "XLM", "XMR", "XRP",
];

const DEPOSIT: &str = "DEPOSIT";
const CRYPTO_CLEARING: &str = "CRYPTO";

/// Asset class of a currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetClass {
    /// ISO 4217 money.
    Fiat,
    /// Cryptocurrency ticker.
    Crypto,
    /// System clearing sentinel; never held by clients.
    Clearing,
}

/// The code was not a member of the supported currency set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid currency: {0}")]
pub struct InvalidCurrency(pub String);

/// A validated currency code.
///
/// Ordering is lexicographic on the code, which is the second component of the
/// canonical account lock order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(into = "String")]
pub struct Currency(&'static str);

impl Currency {
    /// Parse and validate a currency code. Matching ignores ASCII case.
    pub fn parse(code: &str) -> Result<Self, InvalidCurrency> {
        Self::lookup(code).ok_or_else(|| InvalidCurrency(code.to_string()))
    }

    /// Whether `code` names a supported currency.
    pub fn is_valid_code(code: &str) -> bool {
        Self::lookup(code).is_some()
    }

    fn lookup(code: &str) -> Option<Self> {
        let upper = code.trim().to_ascii_uppercase();
        FIAT_CODES
            .iter()
            .chain(CRYPTO_TICKERS.iter())
            .chain([DEPOSIT, CRYPTO_CLEARING].iter())
            .find(|known| **known == upper.as_str())
            .map(|known| Self(*known))
    }

    /// Get the currency code.
    pub fn code(&self) -> &'static str {
        self.0
    }

    /// Whether this value is still a member of the supported set.
    pub fn is_valid(&self) -> bool {
        Self::lookup(self.0).is_some_and(|found| found == *self)
    }

    /// Asset class of this currency.
    pub fn asset_class(&self) -> AssetClass {
        if FIAT_CODES.contains(&self.0) {
            AssetClass::Fiat
        } else if CRYPTO_TICKERS.contains(&self.0) {
            AssetClass::Crypto
        } else {
            AssetClass::Clearing
        }
    }

    pub fn is_fiat(&self) -> bool {
        self.asset_class() == AssetClass::Fiat
    }

    pub fn is_crypto(&self) -> bool {
        self.asset_class() == AssetClass::Crypto
    }

    pub fn is_clearing(&self) -> bool {
        self.asset_class() == AssetClass::Clearing
    }

    /// Fixed scale of amounts in this currency.
    pub fn decimal_places(&self) -> u32 {
        match self.0 {
            CRYPTO_CLEARING => CRYPTO_DECIMAL_PLACES,
            DEPOSIT => FIAT_DECIMAL_PLACES,
            _ if self.is_crypto() => CRYPTO_DECIMAL_PLACES,
            _ => FIAT_DECIMAL_PLACES,
        }
    }

    /// Clearing sentinel debited by external fiat deposits.
    pub fn deposit() -> Self {
        Self(DEPOSIT)
    }

    /// Clearing sentinel reserved for crypto-side system accounts.
    pub fn crypto_clearing() -> Self {
        Self(CRYPTO_CLEARING)
    }

    /// Common currencies
    pub fn usd() -> Self {
        Self("USD")
    }

    pub fn eur() -> Self {
        Self("EUR")
    }

    pub fn gbp() -> Self {
        Self("GBP")
    }

    pub fn cad() -> Self {
        Self("CAD")
    }

    pub fn aed() -> Self {
        Self("AED")
    }

    pub fn btc() -> Self {
        Self("BTC")
    }

    pub fn eth() -> Self {
        Self("ETH")
    }

    /// All client-holdable currencies in code order.
    pub fn all_holdable() -> Vec<Self> {
        let mut all: Vec<Self> = FIAT_CODES
            .iter()
            .chain(CRYPTO_TICKERS.iter())
            .map(|code| Self(*code))
            .collect();
        all.sort();
        all
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl FromStr for Currency {
    type Err = InvalidCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = InvalidCurrency;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0.to_string()
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let code = String::deserialize(deserializer)?;
        Self::parse(&code).map_err(serde::de::Error::custom)
    }
}

/// Truncate `value` toward zero to the fixed scale of `currency`.
pub fn truncate_to_scale(value: Decimal, currency: Currency) -> Decimal {
    value.round_dp_with_strategy(currency.decimal_places(), RoundingStrategy::ToZero)
}

/// Rejections raised while validating an amount.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount {amount} must be greater than zero")]
    NotPositive { amount: Decimal },

    #[error("amount {amount} exceeds {places} decimal places for {currency}")]
    ExcessPrecision {
        amount: Decimal,
        currency: Currency,
        places: u32,
    },

    #[error("amount {amount} exceeds the maximum of {max}")]
    TooLarge { amount: Decimal, max: Decimal },
}

/// A monetary amount with currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// The amount value.
    pub value: Decimal,
    /// Currency of the amount.
    pub currency: Currency,
}

impl Money {
    /// Create a new Money instance.
    pub fn new(value: Decimal, currency: Currency) -> Self {
        Self { value, currency }
    }

    /// Create a zero amount in the given currency.
    pub fn zero(currency: Currency) -> Self {
        Self {
            value: Decimal::ZERO,
            currency,
        }
    }

    pub fn is_positive(&self) -> bool {
        self.value > Decimal::ZERO
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    /// The amount truncated to its currency's scale.
    pub fn truncated(&self) -> Self {
        Self {
            value: truncate_to_scale(self.value, self.currency),
            currency: self.currency,
        }
    }

    /// Whether the amount already equals its own truncation.
    pub fn is_at_scale(&self) -> bool {
        self.value == truncate_to_scale(self.value, self.currency)
    }

    /// Accept the amount as a debit magnitude: at scale, strictly positive and
    /// no larger than [`MAX_AMOUNT`].
    pub fn validate_debit(&self) -> Result<(), AmountError> {
        if !self.is_at_scale() {
            return Err(AmountError::ExcessPrecision {
                amount: self.value,
                currency: self.currency,
                places: self.currency.decimal_places(),
            });
        }
        if !self.is_positive() {
            return Err(AmountError::NotPositive { amount: self.value });
        }
        if self.value > MAX_AMOUNT {
            return Err(AmountError::TooLarge {
                amount: self.value,
                max: MAX_AMOUNT,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.currency)
    }
}

/// A directed currency pair used for quoting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    /// Currency being sold.
    pub base: Currency,
    /// Currency being bought.
    pub quote: Currency,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(base: Currency, quote: Currency) -> Self {
        Self { base, quote }
    }

    /// Get the inverse pair.
    pub fn inverse(&self) -> Self {
        Self {
            base: self.quote,
            quote: self.base,
        }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}
