//! Canonical lock ordering.
//!
//! Two postings that touch the same accounts must request their row locks in
//! the same order, or each can end up holding one lock while waiting on the
//! other. Every posting therefore locks accounts sorted by [`AccountKey`]'s
//! ordering, `(client_id, currency)`, regardless of which side is the debit.

use std::collections::BTreeSet;

use exchequer_common::AccountKey;

/// Accounts to lock for a posting, deduplicated and in canonical order.
///
/// Clearing accounts are journal-only and never locked.
pub fn lock_order<I>(keys: I) -> Vec<AccountKey>
where
    I: IntoIterator<Item = AccountKey>,
{
    keys.into_iter()
        .filter(|key| !key.currency.is_clearing())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
