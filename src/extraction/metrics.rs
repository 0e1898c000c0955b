//! Statement-level metric computation and cross-statement aggregation.

use super::account::AccountInfo;
use super::normalize::{categorize_transaction, is_cash_transaction, is_cheque_transaction};
use super::{Txn, TxnType};
use crate::agents::dates::{parse_month, MONTH_ORDER};
use crate::models::{AggregatedMetricsRecord, RawTransactionRecord, StatementMetricsRecord};
use serde_json::{json, Value};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn mean_or_zero(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        round2(values.iter().copied().mean())
    }
}

/// Compute the per-statement metric set from canonical transactions.
///
/// `document_id`/`upload_group_id` are left for the caller to fill.
pub fn compute_metrics(transactions: &[Txn], account_info: &AccountInfo) -> StatementMetricsRecord {
    let credits: Vec<&Txn> = transactions.iter().filter(|t| t.txn_type == TxnType::Credit).collect();
    let debits: Vec<&Txn> = transactions.iter().filter(|t| t.txn_type == TxnType::Debit).collect();

    let credit_amounts: Vec<f64> = credits.iter().filter_map(|t| t.deposit).collect();
    let debit_amounts: Vec<f64> = debits.iter().filter_map(|t| t.withdrawal).collect();

    let mut opening_balance = None;
    let mut closing_balance = None;
    for t in transactions {
        match t.txn_type {
            TxnType::OpeningBalance => opening_balance = t.balance,
            TxnType::ClosingBalance => closing_balance = t.balance,
            _ => {}
        }
    }

    let balances: Vec<f64> = transactions.iter().filter_map(|t| t.balance).collect();
    if opening_balance.is_none() {
        opening_balance = balances.first().copied();
    }
    if closing_balance.is_none() {
        closing_balance = balances.last().copied();
    }

    let cash_deposits: Vec<&&Txn> =
        credits.iter().filter(|t| is_cash_transaction(&t.description)).collect();
    let cash_withdrawals: Vec<&&Txn> =
        debits.iter().filter(|t| is_cash_transaction(&t.description)).collect();
    let cheque_withdrawals: Vec<&&Txn> =
        debits.iter().filter(|t| is_cheque_transaction(&t.description)).collect();
    let fees: Vec<&&Txn> = debits
        .iter()
        .filter(|t| categorize_transaction(&t.description) == "fees_charges")
        .collect();

    // Per-currency breakdown, attached only when more than one currency
    // appears.
    let currencies: Vec<String> = {
        let mut set: Vec<String> = transactions
            .iter()
            .map(|t| t.currency.clone().unwrap_or_else(|| "SGD".to_string()))
            .collect();
        set.sort();
        set.dedup();
        set
    };

    let currency_breakdown = (currencies.len() > 1).then(|| {
        let mut breakdown = serde_json::Map::new();
        for ccy in &currencies {
            let ccy_txns: Vec<&Txn> = transactions
                .iter()
                .filter(|t| t.currency.as_deref().unwrap_or("SGD") == ccy)
                .collect();
            let ccy_credits: Vec<f64> = ccy_txns
                .iter()
                .filter(|t| t.txn_type == TxnType::Credit)
                .filter_map(|t| t.deposit)
                .collect();
            let ccy_debits: Vec<f64> = ccy_txns
                .iter()
                .filter(|t| t.txn_type == TxnType::Debit)
                .filter_map(|t| t.withdrawal)
                .collect();
            let ccy_balances: Vec<f64> = ccy_txns.iter().filter_map(|t| t.balance).collect();

            let mut ccy_opening = None;
            let mut ccy_closing = None;
            for t in &ccy_txns {
                match t.txn_type {
                    TxnType::OpeningBalance => ccy_opening = t.balance,
                    TxnType::ClosingBalance => ccy_closing = t.balance,
                    _ => {}
                }
            }
            if ccy_opening.is_none() {
                ccy_opening = ccy_balances.first().copied();
            }
            if ccy_closing.is_none() {
                ccy_closing = ccy_balances.last().copied();
            }

            let max_balance = ccy_balances
                .iter()
                .copied()
                .fold(None, |acc: Option<f64>, b| Some(acc.map_or(b, |a| a.max(b))));
            let min_balance = ccy_balances
                .iter()
                .copied()
                .fold(None, |acc: Option<f64>, b| Some(acc.map_or(b, |a| a.min(b))));

            breakdown.insert(
                ccy.clone(),
                json!({
                    "currency": ccy,
                    "opening_balance": ccy_opening,
                    "closing_balance": ccy_closing,
                    "total_credits": ccy_txns.iter().filter(|t| t.txn_type == TxnType::Credit).count(),
                    "total_credit_amount": round2(ccy_credits.iter().sum()),
                    "total_debits": ccy_txns.iter().filter(|t| t.txn_type == TxnType::Debit).count(),
                    "total_debit_amount": round2(ccy_debits.iter().sum()),
                    "max_balance": max_balance,
                    "min_balance": min_balance,
                    "avg_balance": (!ccy_balances.is_empty()).then(|| mean_or_zero(&ccy_balances)),
                    "transaction_count": ccy_txns.iter().filter(|t| t.is_monetary()).count(),
                }),
            );
        }
        Value::Object(breakdown)
    });

    // Primary currency: the one with the most monetary transactions.
    let primary_currency = currencies
        .iter()
        .max_by_key(|ccy| {
            transactions
                .iter()
                .filter(|t| t.currency.as_deref().unwrap_or("SGD") == ccy.as_str() && t.is_monetary())
                .count()
        })
        .cloned()
        .or_else(|| account_info.currency.clone())
        .unwrap_or_else(|| "SGD".to_string());

    StatementMetricsRecord {
        document_id: String::new(),
        upload_group_id: String::new(),
        account_holder: account_info.account_holder.clone(),
        bank: account_info.bank.clone(),
        account_number: account_info.account_number.clone(),
        currency: primary_currency,
        statement_period: account_info.statement_period.clone(),
        opening_balance,
        closing_balance,
        max_eod_balance: balances.iter().copied().fold(None, |acc: Option<f64>, b| {
            Some(acc.map_or(b, |a| a.max(b)))
        }),
        min_eod_balance: balances.iter().copied().fold(None, |acc: Option<f64>, b| {
            Some(acc.map_or(b, |a| a.min(b)))
        }),
        avg_eod_balance: (!balances.is_empty()).then(|| mean_or_zero(&balances)),
        total_no_of_credit_transactions: credits.len() as i64,
        total_amount_of_credit_transactions: round2(credit_amounts.iter().sum()),
        total_no_of_debit_transactions: debits.len() as i64,
        total_amount_of_debit_transactions: round2(debit_amounts.iter().sum()),
        average_deposit: mean_or_zero(&credit_amounts),
        average_withdrawal: mean_or_zero(&debit_amounts),
        max_debit_transaction: debit_amounts.iter().copied().fold(0.0, f64::max),
        min_debit_transaction: if debit_amounts.is_empty() {
            0.0
        } else {
            debit_amounts.iter().copied().fold(f64::INFINITY, f64::min)
        },
        max_credit_transaction: credit_amounts.iter().copied().fold(0.0, f64::max),
        min_credit_transaction: if credit_amounts.is_empty() {
            0.0
        } else {
            credit_amounts.iter().copied().fold(f64::INFINITY, f64::min)
        },
        total_no_of_cash_deposits: cash_deposits.len() as i64,
        total_amount_of_cash_deposits: round2(
            cash_deposits.iter().filter_map(|t| t.deposit).sum(),
        ),
        total_no_of_cash_withdrawals: cash_withdrawals.len() as i64,
        total_amount_of_cash_withdrawals: round2(
            cash_withdrawals.iter().filter_map(|t| t.withdrawal).sum(),
        ),
        total_no_of_cheque_withdrawals: cheque_withdrawals.len() as i64,
        total_amount_of_cheque_withdrawals: round2(
            cheque_withdrawals.iter().filter_map(|t| t.withdrawal).sum(),
        ),
        total_fees_charged: round2(fees.iter().filter_map(|t| t.withdrawal).sum()),
        currency_breakdown,
    }
}

/// Recompute group aggregates from every statement's metrics plus the pooled
/// transactions (monthly chart arrays).
pub fn compute_aggregated_metrics(
    group_id: &str,
    all_metrics: &[StatementMetricsRecord],
    group_transactions: &[RawTransactionRecord],
) -> Option<AggregatedMetricsRecord> {
    if all_metrics.is_empty() {
        return None;
    }
    let first = &all_metrics[0];
    let last = &all_metrics[all_metrics.len() - 1];

    let opt_values = |f: fn(&StatementMetricsRecord) -> Option<f64>| -> Vec<f64> {
        all_metrics.iter().filter_map(f).collect()
    };

    let max_eods = opt_values(|m| m.max_eod_balance);
    let min_eods = opt_values(|m| m.min_eod_balance);
    let avg_eods = opt_values(|m| m.avg_eod_balance);
    let openings = opt_values(|m| m.opening_balance);
    let closings = opt_values(|m| m.closing_balance);

    // Monthly chart arrays from the pooled transactions.
    let mut by_month: BTreeMap<usize, (f64, f64)> = BTreeMap::new();
    for t in group_transactions {
        let Some(month) = parse_month(&t.date) else { continue };
        let Some(order) = MONTH_ORDER.iter().position(|m| *m == month) else { continue };
        let entry = by_month.entry(order).or_insert((0.0, 0.0));
        match t.transaction_type.as_str() {
            "credit" => entry.0 += t.amount.unwrap_or(0.0),
            "debit" => entry.1 += t.amount.unwrap_or(0.0),
            _ => {}
        }
    }
    let monthly_credit_totals: Vec<Value> = by_month
        .iter()
        .map(|(order, (c, _))| json!({"month": MONTH_ORDER[*order], "amount": round2(*c)}))
        .collect();
    let monthly_debit_totals: Vec<Value> = by_month
        .iter()
        .map(|(order, (_, d))| json!({"month": MONTH_ORDER[*order], "amount": round2(*d)}))
        .collect();
    let monthly_balances: Vec<Value> = all_metrics
        .iter()
        .map(|m| {
            json!({
                "period": m.statement_period,
                "opening": m.opening_balance,
                "closing": m.closing_balance,
            })
        })
        .collect();

    Some(AggregatedMetricsRecord {
        upload_group_id: group_id.to_string(),
        account_holder: first.account_holder.clone(),
        bank: first.bank.clone(),
        account_number: first.account_number.clone(),
        currency: first.currency.clone(),
        total_statements: all_metrics.len() as i64,
        period_covered: match (first.statement_period.as_ref(), last.statement_period.as_ref()) {
            (Some(a), Some(b)) if all_metrics.len() > 1 => Some(format!("{a} — {b}")),
            (Some(a), _) => Some(a.clone()),
            _ => None,
        },
        overall_max_eod_balance: max_eods.iter().copied().fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.max(v)))
        }),
        overall_min_eod_balance: min_eods.iter().copied().fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.min(v)))
        }),
        overall_avg_eod_balance: (!avg_eods.is_empty()).then(|| mean_or_zero(&avg_eods)),
        avg_opening_balance: (!openings.is_empty()).then(|| mean_or_zero(&openings)),
        avg_closing_balance: (!closings.is_empty()).then(|| mean_or_zero(&closings)),
        total_credit_transactions: all_metrics
            .iter()
            .map(|m| m.total_no_of_credit_transactions)
            .sum(),
        total_credit_amount: round2(
            all_metrics.iter().map(|m| m.total_amount_of_credit_transactions).sum(),
        ),
        total_debit_transactions: all_metrics
            .iter()
            .map(|m| m.total_no_of_debit_transactions)
            .sum(),
        total_debit_amount: round2(
            all_metrics.iter().map(|m| m.total_amount_of_debit_transactions).sum(),
        ),
        overall_avg_deposit: mean_or_zero(
            &all_metrics.iter().map(|m| m.average_deposit).collect::<Vec<_>>(),
        ),
        overall_avg_withdrawal: mean_or_zero(
            &all_metrics.iter().map(|m| m.average_withdrawal).collect::<Vec<_>>(),
        ),
        overall_max_debit: all_metrics.iter().map(|m| m.max_debit_transaction).fold(0.0, f64::max),
        overall_max_credit: all_metrics
            .iter()
            .map(|m| m.max_credit_transaction)
            .fold(0.0, f64::max),
        total_cash_deposits: all_metrics.iter().map(|m| m.total_no_of_cash_deposits).sum(),
        total_cash_deposit_amount: round2(
            all_metrics.iter().map(|m| m.total_amount_of_cash_deposits).sum(),
        ),
        total_cash_withdrawals: all_metrics.iter().map(|m| m.total_no_of_cash_withdrawals).sum(),
        total_cash_withdrawal_amount: round2(
            all_metrics.iter().map(|m| m.total_amount_of_cash_withdrawals).sum(),
        ),
        total_cheque_withdrawals: all_metrics
            .iter()
            .map(|m| m.total_no_of_cheque_withdrawals)
            .sum(),
        total_cheque_withdrawal_amount: round2(
            all_metrics.iter().map(|m| m.total_amount_of_cheque_withdrawals).sum(),
        ),
        total_fees: round2(all_metrics.iter().map(|m| m.total_fees_charged).sum()),
        monthly_credit_totals: Value::Array(monthly_credit_totals),
        monthly_debit_totals: Value::Array(monthly_debit_totals),
        monthly_balances: Value::Array(monthly_balances),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credit(date: &str, amount: f64, balance: f64) -> Txn {
        Txn {
            transaction_date: date.to_string(),
            value_date: date.to_string(),
            description: "GIRO SALARY".to_string(),
            deposit: Some(amount),
            balance: Some(balance),
            txn_type: TxnType::Credit,
            ..Txn::default()
        }
    }

    fn debit(date: &str, desc: &str, amount: f64, balance: f64) -> Txn {
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
    fn metric_identity_holds() {
        let txns = vec![
            credit("01 DEC", 1000.0, 1000.0),
            debit("02 DEC", "FAST PAYMENT", 100.0, 900.0),
            debit("03 DEC", "SERVICE CHARGE FEE", 10.0, 890.0),
        ];
        let m = compute_metrics(&txns, &AccountInfo::default());
        assert_eq!(m.total_no_of_credit_transactions + m.total_no_of_debit_transactions, 3);
        assert_eq!(m.total_amount_of_credit_transactions, 1000.0);
        assert_eq!(m.total_amount_of_debit_transactions, 110.0);
        assert_eq!(m.total_fees_charged, 10.0);
        assert_eq!(m.opening_balance, Some(1000.0));
        assert_eq!(m.closing_balance, Some(890.0));
        assert_eq!(m.max_eod_balance, Some(1000.0));
        assert_eq!(m.min_eod_balance, Some(890.0));
        assert!(m.currency_breakdown.is_none());
    }

    #[test]
    fn explicit_boundary_markers_win() {
        let mut txns = vec![credit("02 DEC", 100.0, 1100.0)];
        txns.insert(
            0,
            Txn {
                balance: Some(1000.0),
                txn_type: TxnType::OpeningBalance,
                ..Txn::default()
            },
        );
        txns.push(Txn {
            balance: Some(1100.0),
            txn_type: TxnType::ClosingBalance,
            ..Txn::default()
        });
        let m = compute_metrics(&txns, &AccountInfo::default());
        assert_eq!(m.opening_balance, Some(1000.0));
        assert_eq!(m.closing_balance, Some(1100.0));
    }

    #[test]
    fn multi_currency_breakdown_present() {
        let mut sgd = credit("01 DEC", 1000.0, 1000.0);
        sgd.currency = Some("SGD".to_string());
        let mut usd = debit("02 DEC", "WIRE OUT", 50.0, 450.0);
        usd.currency = Some("USD".to_string());
        usd.account_section = 1;

        let m = compute_metrics(&[sgd, usd], &AccountInfo::default());
        let breakdown = m.currency_breakdown.expect("multi-currency breakdown");
        assert!(breakdown.get("SGD").is_some());
        assert!(breakdown.get("USD").is_some());
        assert_eq!(breakdown["USD"]["total_debit_amount"], 50.0);
    }

    #[test]
    fn zero_transactions_yield_default_metrics() {
        let m = compute_metrics(&[], &AccountInfo::default());
        assert_eq!(m.total_no_of_credit_transactions, 0);
        assert_eq!(m.opening_balance, None);
        assert_eq!(m.average_deposit, 0.0);
        assert_eq!(m.currency, "SGD");
    }

    #[test]
    fn aggregation_sums_and_averages() {
        let m1 = StatementMetricsRecord {
            statement_period: Some("01 Nov to 30 Nov".to_string()),
            opening_balance: Some(1000.0),
            closing_balance: Some(2000.0),
            max_eod_balance: Some(2500.0),
            min_eod_balance: Some(800.0),
            avg_eod_balance: Some(1500.0),
            total_no_of_credit_transactions: 5,
            total_amount_of_credit_transactions: 5000.0,
            total_no_of_debit_transactions: 3,
            total_amount_of_debit_transactions: 4000.0,
            average_deposit: 1000.0,
            average_withdrawal: 1333.33,
            ..Default::default()
        };
        let m2 = StatementMetricsRecord {
            statement_period: Some("01 Dec to 31 Dec".to_string()),
            opening_balance: Some(2000.0),
            closing_balance: Some(1500.0),
            max_eod_balance: Some(2200.0),
            min_eod_balance: Some(500.0),
            avg_eod_balance: Some(1400.0),
            total_no_of_credit_transactions: 2,
            total_amount_of_credit_transactions: 1000.0,
            total_no_of_debit_transactions: 4,
            total_amount_of_debit_transactions: 1500.0,
            average_deposit: 500.0,
            average_withdrawal: 375.0,
            ..Default::default()
        };

        let agg = compute_aggregated_metrics("g1", &[m1, m2], &[]).unwrap();
        assert_eq!(agg.total_statements, 2);
        assert_eq!(agg.total_credit_transactions, 7);
        assert_eq!(agg.total_credit_amount, 6000.0);
        assert_eq!(agg.overall_max_eod_balance, Some(2500.0));
        assert_eq!(agg.overall_min_eod_balance, Some(500.0));
        assert_eq!(agg.period_covered.as_deref(), Some("01 Nov to 30 Nov — 01 Dec to 31 Dec"));
    }

    #[test]
    fn empty_group_has_no_aggregate() {
        assert!(compute_aggregated_metrics("g1", &[], &[]).is_none());
    }
}
