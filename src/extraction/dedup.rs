//! Duplicate removal at batch and tier boundaries.

use super::Txn;
use std::collections::HashSet;
use tracing::info;

/// Remove duplicate transactions.
///
/// Pass 1 is an exact fingerprint on (date, description prefix, amount,
/// balance, type). Pass 2 is balance-based: a credit/debit with the same
/// balance, date, type and amount as an earlier row is the same transaction
/// seen again from an overlapping batch.
pub fn deduplicate_transactions(transactions: Vec<Txn>) -> Vec<Txn> {
    if transactions.is_empty() {
        return transactions;
    }
    let before = transactions.len();

    let mut seen_exact: HashSet<String> = HashSet::new();
    let mut pass1: Vec<Txn> = Vec::with_capacity(before);
    for t in transactions {
        let date = if t.value_date.is_empty() { &t.transaction_date } else { &t.value_date };
        let desc: String = t.description.chars().take(60).collect();
        let amt = t.amount().unwrap_or(0.0);
        let bal = t.balance.unwrap_or(0.0);
        let key = format!("{date}|{desc}|{amt:.2}|{bal:.2}|{}", t.txn_type.as_str());
        if seen_exact.insert(key) {
            pass1.push(t);
        }
    }
    let exact_removed = before - pass1.len();

    let mut seen_balance: HashSet<String> = HashSet::new();
    let mut pass2: Vec<Txn> = Vec::with_capacity(pass1.len());
    for t in pass1 {
        if t.is_monetary() {
            if let Some(bal) = t.balance {
                let date = if t.value_date.is_empty() { &t.transaction_date } else { &t.value_date };
                let amt = t.amount().unwrap_or(0.0);
                let key = format!("{date}|{bal:.2}|{}|{amt:.2}", t.txn_type.as_str());
                if !seen_balance.insert(key) {
                    continue;
                }
            }
        }
        pass2.push(t);
    }
    let fuzzy_removed = before - exact_removed - pass2.len();

    let total_removed = exact_removed + fuzzy_removed;
    if total_removed > 0 {
        info!(
            "  🔄 Deduplication removed {total_removed} duplicates \
             (exact: {exact_removed}, fuzzy: {fuzzy_removed})"
        );
    }
    pass2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::TxnType;

    fn txn(date: &str, desc: &str, amount: f64, balance: f64) -> Txn {
        Txn {
            transaction_date: date.to_string(),
            value_date: date.to_string(),
            description: desc.to_string(),
            withdrawal: Some(amount),
            balance: Some(balance),
            txn_type: TxnType::Debit,
            ..Txn::default()
        }
    }

    #[test]
    fn exact_duplicates_are_removed() {
        let txns = vec![
            txn("01 DEC", "FAST PAYMENT", 100.0, 900.0),
            txn("01 DEC", "FAST PAYMENT", 100.0, 900.0),
        ];
        assert_eq!(deduplicate_transactions(txns).len(), 1);
    }

    #[test]
    fn fuzzy_catches_same_balance_with_different_description() {
        // Overlapping batches emit the same row with a re-worded
        // description; the balance fingerprint catches it.
        let txns = vec![
            txn("15 NOV", "PAYMENT TO ACME PTE LTD", 250.0, 12345.67),
            txn("15 NOV", "PAYMENT ACME", 250.0, 12345.67),
        ];
        let out = deduplicate_transactions(txns);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].description, "PAYMENT TO ACME PTE LTD");
    }

    #[test]
    fn distinct_transactions_survive() {
        let txns = vec![
            txn("01 DEC", "A", 100.0, 900.0),
            txn("01 DEC", "B", 100.0, 800.0),
            txn("02 DEC", "A", 100.0, 700.0),
        ];
        assert_eq!(deduplicate_transactions(txns).len(), 3);
    }

    #[test]
    fn dedup_is_idempotent() {
        let txns = vec![
            txn("01 DEC", "A", 100.0, 900.0),
            txn("01 DEC", "A", 100.0, 900.0),
            txn("02 DEC", "B", 50.0, 850.0),
        ];
        let once = deduplicate_transactions(txns);
        let twice = deduplicate_transactions(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn balanceless_rows_are_not_fuzzed() {
        let mut a = txn("01 DEC", "A", 100.0, 0.0);
        a.balance = None;
        let mut b = txn("01 DEC", "B", 100.0, 0.0);
        b.balance = None;
        assert_eq!(deduplicate_transactions(vec![a, b]).len(), 2);
    }
}
