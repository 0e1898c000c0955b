//! Balance-chain validation and extraction accuracy scoring.

use super::{Txn, TxnType};
use crate::models::StatementMetricsRecord;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Tolerance for rounding differences in balance arithmetic.
pub const CHAIN_TOLERANCE: f64 = 0.02;
/// At most this many breaks are reported in detail.
const MAX_BREAKS: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct ChainBreak {
    pub index: usize,
    pub section: u32,
    pub date: String,
    pub description: String,
    pub expected_balance: f64,
    pub actual_balance: f64,
    pub difference: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceChainReport {
    pub total_checked: usize,
    pub valid: usize,
    pub invalid: usize,
    pub chain_accuracy_pct: f64,
    pub breaks: Vec<ChainBreak>,
    pub sections: usize,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Partition transactions into sections.
///
/// Explicit `account_section` tags win (multi-currency word extraction);
/// otherwise successive opening-balance records start new sections.
fn partition_sections(transactions: &[Txn]) -> BTreeMap<u32, Vec<&Txn>> {
    let has_tags = transactions.iter().any(|t| t.account_section != 0);
    let mut sections: BTreeMap<u32, Vec<&Txn>> = BTreeMap::new();

    if has_tags {
        for t in transactions {
            sections.entry(t.account_section).or_default().push(t);
        }
    } else {
        let mut current = 0u32;
        for t in transactions {
            if t.txn_type == TxnType::OpeningBalance
                && sections.get(&current).is_some_and(|s| !s.is_empty())
            {
                current += 1;
            }
            sections.entry(current).or_default().push(t);
        }
    }
    sections
}

/// Validate that running balances form a consistent chain per section.
pub fn validate_balance_chain(transactions: &[Txn]) -> BalanceChainReport {
    let sections = partition_sections(transactions);

    let mut valid = 0usize;
    let mut invalid = 0usize;
    let mut breaks: Vec<ChainBreak> = Vec::new();

    for (section_id, section) in &sections {
        let monetary: Vec<&&Txn> = section
            .iter()
            .filter(|t| t.is_monetary() && t.balance.is_some())
            .collect();
        if monetary.len() < 2 {
            continue;
        }

        for i in 1..monetary.len() {
            let prev_bal = monetary[i - 1].balance.unwrap_or(0.0);
            let curr = monetary[i];
            let curr_bal = curr.balance.unwrap_or(0.0);
            let amt = curr.amount().unwrap_or(0.0);

            let expected = round2(match curr.txn_type {
                TxnType::Debit => prev_bal - amt,
                _ => prev_bal + amt,
            });

            let diff = (expected - curr_bal).abs();
            if diff <= CHAIN_TOLERANCE {
                valid += 1;
            } else {
                invalid += 1;
                if breaks.len() < MAX_BREAKS {
                    breaks.push(ChainBreak {
                        index: i,
                        section: *section_id,
                        date: if curr.value_date.is_empty() {
                            curr.transaction_date.clone()
                        } else {
                            curr.value_date.clone()
                        },
                        description: curr.description.chars().take(50).collect(),
                        expected_balance: expected,
                        actual_balance: curr_bal,
                        difference: round2(diff),
                    });
                }
            }
        }
    }

    let total = valid + invalid;
    let pct = if total > 0 {
        (valid as f64 / total as f64 * 1000.0).round() / 10.0
    } else {
        100.0
    };

    BalanceChainReport {
        total_checked: total,
        valid,
        invalid,
        chain_accuracy_pct: pct,
        breaks,
        sections: sections.len(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccuracyReport {
    pub overall_score: f64,
    pub grade: &'static str,
    pub breakdown: Value,
    pub balance_chain_detail: BalanceChainReport,
}

/// Weighted extraction accuracy score (0–100).
///
/// Balance-chain continuity 40%, opening/closing presence 20%, accounting
/// equation 20%, amount completeness 10%, balance completeness 10%.
pub fn compute_accuracy_score(
    transactions: &[Txn],
    metrics: &StatementMetricsRecord,
    chain: BalanceChainReport,
) -> AccuracyReport {
    let chain_pct = chain.chain_accuracy_pct;

    let has_opening = metrics.opening_balance.is_some();
    let has_closing = metrics.closing_balance.is_some();
    let ob_score = if has_opening && has_closing {
        100.0
    } else if has_opening || has_closing {
        50.0
    } else {
        0.0
    };

    // For multi-currency statements the single equation does not apply
    // across currencies; a perfect chain is trusted outright.
    let equation_score = if chain_pct >= 99.9 {
        100.0
    } else if has_opening && has_closing {
        let opening = metrics.opening_balance.unwrap_or(0.0);
        let closing = metrics.closing_balance.unwrap_or(0.0);
        let expected = round2(
            opening + metrics.total_amount_of_credit_transactions
                - metrics.total_amount_of_debit_transactions,
        );
        let relative_error = (expected - closing).abs() / closing.abs().max(1.0);
        (100.0 - relative_error * 2000.0).clamp(0.0, 100.0)
    } else {
        50.0
    };

    let monetary: Vec<&Txn> = transactions.iter().filter(|t| t.is_monetary()).collect();
    let n = monetary.len().max(1) as f64;
    let missing_amount =
        monetary.iter().filter(|t| t.withdrawal.is_none() && t.deposit.is_none()).count() as f64;
    let missing_score = (100.0 - missing_amount / n * 100.0 * 5.0).max(0.0);
    let null_balance = monetary.iter().filter(|t| t.balance.is_none()).count() as f64;
    let null_score = (100.0 - null_balance / n * 100.0 * 5.0).max(0.0);

    let weighted = [
        (chain_pct, 40.0),
        (ob_score, 20.0),
        (equation_score, 20.0),
        (missing_score, 10.0),
        (null_score, 10.0),
    ];
    let total_weight: f64 = weighted.iter().map(|(_, w)| w).sum();
    let overall =
        round1(weighted.iter().map(|(v, w)| v * w).sum::<f64>() / total_weight);

    let grade = if overall >= 95.0 {
        "A+"
    } else if overall >= 90.0 {
        "A"
    } else if overall >= 80.0 {
        "B"
    } else if overall >= 70.0 {
        "C"
    } else if overall >= 50.0 {
        "D"
    } else {
        "F"
    };

    let breakdown = json!({
        "balance_chain": {"value": round1(chain_pct), "weight": 40},
        "opening_closing_present": {"value": ob_score, "weight": 20},
        "accounting_equation": {"value": round1(equation_score), "weight": 20},
        "completeness": {"value": round1(missing_score), "weight": 10},
        "balance_completeness": {"value": round1(null_score), "weight": 10},
    });

    AccuracyReport {
        overall_score: overall,
        grade,
        breakdown,
        balance_chain_detail: chain,
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debit(date: &str, amount: f64, balance: f64) -> Txn {
        Txn {
            transaction_date: date.to_string(),
            value_date: date.to_string(),
            withdrawal: Some(amount),
            balance: Some(balance),
            txn_type: TxnType::Debit,
            ..Txn::default()
        }
    }

    fn credit(date: &str, amount: f64, balance: f64) -> Txn {
        Txn {
            transaction_date: date.to_string(),
            value_date: date.to_string(),
            deposit: Some(amount),
            balance: Some(balance),
            txn_type: TxnType::Credit,
            ..Txn::default()
        }
    }

    #[test]
    fn perfect_chain_scores_100() {
        let txns = vec![
            credit("01 DEC", 1000.0, 1000.0),
            debit("02 DEC", 100.0, 900.0),
            debit("03 DEC", 50.0, 850.0),
        ];
        let report = validate_balance_chain(&txns);
        assert_eq!(report.total_checked, 2);
        assert_eq!(report.valid, 2);
        assert_eq!(report.chain_accuracy_pct, 100.0);
        assert!(report.breaks.is_empty());
        assert_eq!(report.sections, 1);
    }

    #[test]
    fn breaks_are_recorded_with_detail() {
        let txns = vec![credit("01 DEC", 1000.0, 1000.0), debit("02 DEC", 100.0, 950.0)];
        let report = validate_balance_chain(&txns);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.breaks.len(), 1);
        assert_eq!(report.breaks[0].expected_balance, 900.0);
        assert_eq!(report.breaks[0].actual_balance, 950.0);
    }

    #[test]
    fn tolerance_allows_two_cents() {
        let txns = vec![credit("01 DEC", 1000.0, 1000.0), debit("02 DEC", 100.0, 900.02)];
        let report = validate_balance_chain(&txns);
        assert_eq!(report.valid, 1);
        assert_eq!(report.invalid, 0);
    }

    #[test]
    fn sections_validate_independently() {
        // SGD section then USD section; each chain is internally valid but
        // the cross-section transition would not be.
        let mut sgd1 = credit("01 DEC", 1000.0, 1000.0);
        sgd1.account_section = 0;
        let mut sgd2 = debit("02 DEC", 100.0, 900.0);
        sgd2.account_section = 0;
        let mut usd1 = credit("03 DEC", 500.0, 500.0);
        usd1.account_section = 1;
        let mut usd2 = debit("04 DEC", 50.0, 450.0);
        usd2.account_section = 1;

        let report = validate_balance_chain(&[sgd1, sgd2, usd1, usd2]);
        assert_eq!(report.sections, 2);
        assert_eq!(report.total_checked, 2);
        assert_eq!(report.chain_accuracy_pct, 100.0);
    }

    #[test]
    fn opening_balance_markers_split_sections() {
        let opening = |bal: f64| Txn {
            balance: Some(bal),
            txn_type: TxnType::OpeningBalance,
            ..Txn::default()
        };
        let txns = vec![
            opening(1000.0),
            credit("01 DEC", 100.0, 1100.0),
            opening(2000.0),
            debit("02 DEC", 100.0, 1900.0),
        ];
        let report = validate_balance_chain(&txns);
        assert_eq!(report.sections, 2);
        // One monetary row per section: nothing to check, accuracy 100.
        assert_eq!(report.total_checked, 0);
        assert_eq!(report.chain_accuracy_pct, 100.0);
    }

    #[test]
    fn accuracy_grades() {
        let txns = vec![
            credit("01 DEC", 1000.0, 1000.0),
            debit("02 DEC", 100.0, 900.0),
        ];
        let metrics = StatementMetricsRecord {
            opening_balance: Some(0.0),
            closing_balance: Some(900.0),
            total_amount_of_credit_transactions: 1000.0,
            total_amount_of_debit_transactions: 100.0,
            ..Default::default()
        };
        let chain = validate_balance_chain(&txns);
        let report = compute_accuracy_score(&txns, &metrics, chain);
        assert_eq!(report.overall_score, 100.0);
        assert_eq!(report.grade, "A+");
    }

    #[test]
    fn equation_penalises_mismatch() {
        let txns = vec![
            credit("01 DEC", 1000.0, 1000.0),
            debit("02 DEC", 100.0, 500.0), // broken chain
        ];
        let metrics = StatementMetricsRecord {
            opening_balance: Some(0.0),
            closing_balance: Some(500.0),
            total_amount_of_credit_transactions: 1000.0,
            total_amount_of_debit_transactions: 100.0,
            ..Default::default()
        };
        let chain = validate_balance_chain(&txns);
        assert_eq!(chain.chain_accuracy_pct, 0.0);
        let report = compute_accuracy_score(&txns, &metrics, chain);
        // Chain contributes 0, equation far off: grade drops hard.
        assert!(report.overall_score < 70.0);
        assert_ne!(report.grade, "A+");
    }
}
