//! Fraud agent: rule-based transaction checks plus a model-backed
//! counterparty assessment.

use super::dates::{date_key, parse_day};
use super::{checks_to_results, compute_risk, AgentOutcome, CheckResult, CheckStatus};
use crate::llm::ModelClient;
use crate::models::{RawTransactionRecord, StatementMetricsRecord};
use crate::store::AnalysisStore;
use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Flag round amounts at or above this value…
const ROUND_AMOUNT_THRESHOLD: f64 = 5_000.0;
/// …when divisible by this modulo.
const ROUND_MODULO: f64 = 1_000.0;
/// Days with at least this many transactions are flagged.
const RAPID_TXN_THRESHOLD: usize = 10;
/// Outliers sit this many standard deviations above the mean.
const OUTLIER_STD_DEVS: f64 = 3.0;
/// Balance swings beyond this share of the maximum balance are anomalous.
const BALANCE_SWING_RATIO: f64 = 0.5;
/// Cash share of total volume above this is flagged.
const CASH_RATIO_THRESHOLD: f64 = 0.30;
/// Start / end of month days.
const MONTH_EDGE_DAYS: [u32; 7] = [1, 2, 3, 28, 29, 30, 31];

lazy_static! {
    static ref FENCE: Regex = Regex::new(r"^```json\s*|```\s*$").unwrap();
}

/// Check 1: large round-number amounts (structuring signal).
pub fn check_round_amounts(txns: &[RawTransactionRecord]) -> CheckResult {
    let name = "Round-Amount Transactions";
    let flagged: Vec<Value> = txns
        .iter()
        .filter(|t| {
            let amt = t.amount.unwrap_or(0.0);
            amt >= ROUND_AMOUNT_THRESHOLD && (amt % ROUND_MODULO).abs() < f64::EPSILON
        })
        .map(|t| {
            json!({
                "date": t.date,
                "amount": t.amount,
                "type": t.transaction_type,
                "description": t.description.chars().take(80).collect::<String>(),
            })
        })
        .collect();

    if flagged.is_empty() {
        return CheckResult::new(
            name,
            CheckStatus::Pass,
            format!("No round amounts ≥ {ROUND_AMOUNT_THRESHOLD:.0} found."),
        );
    }
    let status = if flagged.len() >= 5 { CheckStatus::Fail } else { CheckStatus::Warning };
    CheckResult::new(
        name,
        status,
        format!(
            "{} transactions with round amounts ≥ {ROUND_AMOUNT_THRESHOLD:.0} \
             (divisible by {ROUND_MODULO:.0}).",
            flagged.len()
        ),
    )
    .with_items(flagged.into_iter().take(20).collect())
}

/// Check 2: duplicate transactions keyed on date + amount + counterparty.
pub fn check_duplicates(txns: &[RawTransactionRecord]) -> CheckResult {
    let name = "Duplicate / Near-Duplicate Transactions";
    let mut groups: BTreeMap<String, Vec<&RawTransactionRecord>> = BTreeMap::new();

    for t in txns {
        let cp: String = t
            .counterparty
            .as_deref()
            .unwrap_or("")
            .to_uppercase()
            .chars()
            .take(30)
            .collect();
        let key = format!("{}|{:.2}|{cp}", date_key(&t.date), t.amount.unwrap_or(0.0));
        groups.entry(key).or_default().push(t);
    }

    let dupes: Vec<Value> = groups
        .values()
        .filter(|g| g.len() >= 2)
        .map(|g| {
            json!({
                "count": g.len(),
                "date": g[0].date,
                "amount": g[0].amount,
                "counterparty": g[0].counterparty.as_deref().unwrap_or(""),
                "description": g[0].description.chars().take(80).collect::<String>(),
            })
        })
        .collect();

    if dupes.is_empty() {
        return CheckResult::new(name, CheckStatus::Pass, "No duplicate transactions detected.");
    }
    let total: i64 = dupes.iter().filter_map(|d| d["count"].as_i64()).sum();
    let status = if total >= 6 { CheckStatus::Fail } else { CheckStatus::Warning };
    CheckResult::new(
        name,
        status,
        format!("{} groups of duplicate transactions ({total} total transactions).", dupes.len()),
    )
    .with_items(dupes.into_iter().take(20).collect())
}

/// Check 3: days with unusually many transactions.
pub fn check_rapid_succession(txns: &[RawTransactionRecord]) -> CheckResult {
    let name = "Rapid Succession Transactions";
    let mut by_day: BTreeMap<String, usize> = BTreeMap::new();
    for t in txns {
        let key = date_key(&t.date);
        if !key.is_empty() {
            *by_day.entry(key).or_default() += 1;
        }
    }

    let mut busy: Vec<(&String, &usize)> =
        by_day.iter().filter(|(_, c)| **c >= RAPID_TXN_THRESHOLD).collect();
    busy.sort_by(|a, b| b.1.cmp(a.1));

    if busy.is_empty() {
        return CheckResult::new(
            name,
            CheckStatus::Pass,
            format!("No days with ≥ {RAPID_TXN_THRESHOLD} transactions."),
        );
    }
    let items: Vec<Value> =
        busy.iter().take(10).map(|(d, c)| json!({"date": d, "count": c})).collect();
    CheckResult::new(
        name,
        CheckStatus::Warning,
        format!(
            "{} days with ≥ {RAPID_TXN_THRESHOLD} transactions (max {} on {}).",
            busy.len(),
            busy[0].1,
            busy[0].0
        ),
    )
    .with_items(items)
}

/// Check 4: statistical outliers above mean + 3σ.
pub fn check_large_outliers(txns: &[RawTransactionRecord]) -> CheckResult {
    let name = "Large Outlier Transactions";
    let amounts: Vec<f64> =
        txns.iter().filter_map(|t| t.amount).filter(|a| *a > 0.0).collect();

    if amounts.len() < 5 {
        return CheckResult::new(
            name,
            CheckStatus::Pass,
            "Too few transactions for outlier analysis.",
        );
    }

    let mean = amounts.iter().copied().mean();
    let stdev = amounts.iter().copied().std_dev();
    let threshold = mean + OUTLIER_STD_DEVS * stdev;

    let mut flagged: Vec<Value> = txns
        .iter()
        .filter(|t| t.amount.unwrap_or(0.0) > threshold)
        .map(|t| {
            let amount = t.amount.unwrap_or(0.0);
            json!({
                "date": t.date,
                "amount": amount,
                "type": t.transaction_type,
                "description": t.description.chars().take(80).collect::<String>(),
                "std_devs": if stdev > 0.0 { ((amount - mean) / stdev * 10.0).round() / 10.0 } else { 0.0 },
            })
        })
        .collect();
    flagged.sort_by(|a, b| {
        b["amount"]
            .as_f64()
            .partial_cmp(&a["amount"].as_f64())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if flagged.is_empty() {
        return CheckResult::new(
            name,
            CheckStatus::Pass,
            format!("No outliers (threshold: {threshold:.2}, mean: {mean:.2}, σ: {stdev:.2})."),
        );
    }
    let status = if flagged.len() >= 3 { CheckStatus::Fail } else { CheckStatus::Warning };
    CheckResult::new(
        name,
        status,
        format!(
            "{} transactions exceed {OUTLIER_STD_DEVS}σ above mean (threshold: {threshold:.2}).",
            flagged.len()
        ),
    )
    .with_items(flagged.into_iter().take(15).collect())
}

/// Check 5: sudden large balance swings.
pub fn check_balance_anomalies(txns: &[RawTransactionRecord]) -> CheckResult {
    let name = "Balance Anomalies";
    let balances: Vec<(&str, f64)> = txns
        .iter()
        .filter_map(|t| t.balance.map(|b| (t.date.as_str(), b)))
        .collect();

    if balances.len() < 3 {
        return CheckResult::new(
            name,
            CheckStatus::Pass,
            "Too few balance data points for analysis.",
        );
    }

    let max_bal = balances.iter().map(|(_, b)| b.abs()).fold(0.0_f64, f64::max).max(1.0);

    let flagged: Vec<Value> = balances
        .windows(2)
        .filter_map(|pair| {
            let (_, prev) = pair[0];
            let (date, curr) = pair[1];
            let swing = (curr - prev).abs();
            (swing > BALANCE_SWING_RATIO * max_bal && swing > 10_000.0).then(|| {
                json!({
                    "date": date,
                    "previous_balance": (prev * 100.0).round() / 100.0,
                    "new_balance": (curr * 100.0).round() / 100.0,
                    "swing": (swing * 100.0).round() / 100.0,
                    "swing_pct": (swing / max_bal * 1000.0).round() / 10.0,
                })
            })
        })
        .collect();

    if flagged.is_empty() {
        return CheckResult::new(name, CheckStatus::Pass, "No large balance swings detected.");
    }
    let status = if flagged.len() >= 3 { CheckStatus::Fail } else { CheckStatus::Warning };
    CheckResult::new(
        name,
        status,
        format!(
            "{} large balance swings (> {:.0}% of max balance {max_bal:.2}).",
            flagged.len(),
            BALANCE_SWING_RATIO * 100.0
        ),
    )
    .with_items(flagged.into_iter().take(15).collect())
}

/// Check 6: disproportionate cash activity.
pub fn check_cash_heavy(
    txns: &[RawTransactionRecord],
    metrics: Option<&StatementMetricsRecord>,
) -> CheckResult {
    let name = "Cash-Heavy Activity";
    let total_credits: f64 = txns
        .iter()
        .filter(|t| t.transaction_type == "credit")
        .filter_map(|t| t.amount)
        .sum();
    let total_debits: f64 = txns
        .iter()
        .filter(|t| t.transaction_type == "debit")
        .filter_map(|t| t.amount)
        .sum();
    let total_volume = total_credits + total_debits;

    let (cash_deposits, cash_withdrawals, cash_count) = match metrics {
        Some(m) => (
            m.total_amount_of_cash_deposits,
            m.total_amount_of_cash_withdrawals,
            m.total_no_of_cash_deposits + m.total_no_of_cash_withdrawals,
        ),
        None => {
            let mut deposits = 0.0;
            let mut withdrawals = 0.0;
            let mut count = 0i64;
            for t in txns.iter().filter(|t| t.is_cash) {
                count += 1;
                if t.transaction_type == "credit" {
                    deposits += t.amount.unwrap_or(0.0);
                } else {
                    withdrawals += t.amount.unwrap_or(0.0);
                }
            }
            (deposits, withdrawals, count)
        }
    };

    let cash_total = cash_deposits + cash_withdrawals;
    let ratio = if total_volume > 0.0 { cash_total / total_volume } else { 0.0 };

    if ratio < CASH_RATIO_THRESHOLD {
        return CheckResult::new(
            name,
            CheckStatus::Pass,
            format!(
                "Cash activity: {:.1}% of total volume ({cash_count} cash transactions, \
                 deposits: {cash_deposits:.2}, withdrawals: {cash_withdrawals:.2}).",
                ratio * 100.0
            ),
        );
    }
    let status = if ratio > 0.5 { CheckStatus::Fail } else { CheckStatus::Warning };
    CheckResult::new(
        name,
        status,
        format!(
            "Cash activity: {:.1}% of total volume (threshold: {:.0}%). \
             {cash_count} cash transactions, deposits: {cash_deposits:.2}, \
             withdrawals: {cash_withdrawals:.2}.",
            ratio * 100.0,
            CASH_RATIO_THRESHOLD * 100.0
        ),
    )
    .with_items(vec![json!({
        "cash_ratio": (ratio * 1000.0).round() / 1000.0,
        "cash_deposits": cash_deposits,
        "cash_withdrawals": cash_withdrawals,
        "cash_count": cash_count,
    })])
}

/// Check 7: concentration at month edges.
pub fn check_timing_patterns(txns: &[RawTransactionRecord]) -> CheckResult {
    let name = "Unusual Timing Patterns";
    let mut edge_count = 0usize;
    let mut mid_count = 0usize;

    for t in txns {
        let Some(day) = parse_day(&t.date) else { continue };
        if MONTH_EDGE_DAYS.contains(&day) {
            edge_count += 1;
        } else {
            mid_count += 1;
        }
    }

    let total = edge_count + mid_count;
    if total < 10 {
        return CheckResult::new(
            name,
            CheckStatus::Pass,
            "Too few dated transactions for timing analysis.",
        );
    }

    let edge_ratio = edge_count as f64 / total as f64;
    // With 7 edge days out of ~30 the expected ratio is ≈23%.
    if edge_ratio <= 0.60 {
        return CheckResult::new(
            name,
            CheckStatus::Pass,
            format!(
                "{edge_count}/{total} ({:.0}%) transactions at month start/end — within \
                 normal range.",
                edge_ratio * 100.0
            ),
        );
    }
    CheckResult::new(
        name,
        CheckStatus::Warning,
        format!(
            "{edge_count}/{total} ({:.0}%) transactions concentrated at month start/end \
             (days {MONTH_EDGE_DAYS:?}).",
            edge_ratio * 100.0
        ),
    )
    .with_items(vec![json!({
        "edge_count": edge_count,
        "mid_count": mid_count,
        "edge_ratio": (edge_ratio * 1000.0).round() / 1000.0,
    })])
}

/// Check 8: model assessment of the top counterparties by volume.
pub async fn check_counterparty_risk(
    model: &ModelClient,
    txns: &[RawTransactionRecord],
) -> CheckResult {
    let name = "Counterparty Risk Assessment";

    let mut volume: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for t in txns {
        let cp = t
            .counterparty
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(&t.description)
            .trim();
        if cp.len() < 3 {
            continue;
        }
        let key: String = cp.chars().take(60).collect::<String>().to_uppercase();
        let entry = volume.entry(key).or_insert((0.0, 0));
        entry.0 += t.amount.unwrap_or(0.0);
        entry.1 += 1;
    }

    if volume.is_empty() {
        return CheckResult::new(name, CheckStatus::Pass, "No counterparty data available.");
    }

    let mut top: Vec<(&String, &(f64, usize))> = volume.iter().collect();
    top.sort_by(|a, b| b.1 .0.partial_cmp(&a.1 .0).unwrap_or(std::cmp::Ordering::Equal));
    let listing = top
        .iter()
        .take(30)
        .enumerate()
        .map(|(i, (cp, (vol, count)))| format!("  {}. {cp} — {count} txn(s), total {vol:.2}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = format!(
        "You are a fraud analyst reviewing bank statement counterparties. \
         Below are the top counterparties by transaction volume.\n\n{listing}\n\n\
         Identify any suspicious patterns:\n\
         - Shell company names (random letters, no real business name)\n\
         - Money service businesses or remittance companies\n\
         - Gambling or high-risk merchants\n\
         - Counterparties that appear to be personal accounts in a business statement\n\
         - Any other red flags\n\n\
         Respond ONLY with valid JSON (no markdown fences):\n\
         {{\"status\": \"pass\" or \"fail\" or \"warning\", \
         \"details\": \"brief assessment of counterparty risk\", \
         \"flagged_counterparties\": [\"name1\", \"name2\"]}}"
    );

    match model.chat_completion(&[("user", prompt)], 0.1, 500, false).await {
        Ok(raw) => {
            let cleaned = FENCE.replace_all(raw.trim(), "").trim().to_string();
            match serde_json::from_str::<Value>(&cleaned) {
                Ok(parsed) => {
                    let status = parsed
                        .get("status")
                        .and_then(Value::as_str)
                        .map(CheckStatus::from_str)
                        .unwrap_or(CheckStatus::Warning);
                    let details = parsed
                        .get("details")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| raw.chars().take(300).collect());
                    let items: Vec<Value> = parsed
                        .get("flagged_counterparties")
                        .and_then(Value::as_array)
                        .map(|a| a.iter().map(|c| json!({"counterparty": c})).collect())
                        .unwrap_or_default();
                    CheckResult::new(name, status, details).with_items(items)
                }
                Err(e) => CheckResult::new(
                    name,
                    CheckStatus::Warning,
                    format!("Could not run counterparty analysis: {e}"),
                ),
            }
        }
        Err(e) => CheckResult::new(
            name,
            CheckStatus::Warning,
            format!("Could not run counterparty analysis: {e:#}"),
        ),
    }
}

async fn run_checks(
    model: &ModelClient,
    txns: &[RawTransactionRecord],
    metrics: Option<&StatementMetricsRecord>,
) -> Vec<CheckResult> {
    info!("  🔢 Running rule-based fraud checks...");
    let mut checks = vec![
        check_round_amounts(txns),
        check_duplicates(txns),
        check_rapid_succession(txns),
        check_large_outliers(txns),
        check_balance_anomalies(txns),
        check_cash_heavy(txns, metrics),
        check_timing_patterns(txns),
    ];
    info!("  🤖 Running counterparty risk assessment (model)...");
    checks.push(check_counterparty_risk(model, txns).await);
    checks
}

/// Per-document fraud analysis.
pub async fn analyse(
    document_id: &str,
    store: &AnalysisStore,
    model: &ModelClient,
) -> Result<AgentOutcome> {
    info!("🕵️  Fraud agent starting for document {document_id}");

    let txns = store.all_transactions_for_document(document_id).await?;
    let metrics = store.statement_metrics(document_id).await?;

    if txns.is_empty() {
        warn!("  No transactions found — skipping fraud checks");
        return Ok(AgentOutcome::low(
            json!({"checks": [], "total_checks": 0}),
            "No transactions available for fraud analysis.",
        ));
    }

    info!("  📊 Analysing {} transactions for fraud signals...", txns.len());
    let checks = run_checks(model, &txns, metrics.as_ref()).await;

    let (risk_level, score, summary) = compute_risk(&checks);
    info!("  🕵️  Fraud result: {risk_level} (score={score}) — {summary}");

    Ok(AgentOutcome {
        results: checks_to_results(&checks, score),
        summary,
        risk_level,
    })
}

/// Group-level fraud analysis over the pooled transactions.
pub async fn analyse_group(
    group_id: &str,
    store: &AnalysisStore,
    model: &ModelClient,
) -> Result<AgentOutcome> {
    info!("🕵️  Group fraud agent starting for group {group_id}");

    let txns = store.all_transactions_for_group(group_id).await?;
    if txns.is_empty() {
        return Ok(AgentOutcome::low(
            json!({"checks": [], "total_checks": 0}),
            "No transactions available for group fraud analysis.",
        ));
    }

    info!("  📊 Analysing {} transactions across the group...", txns.len());
    let checks = run_checks(model, &txns, None).await;

    let (risk_level, score, summary) = compute_risk(&checks);
    let mut results = checks_to_results(&checks, score);
    if let Some(map) = results.as_object_mut() {
        map.insert("transactions_analyzed".to_string(), json!(txns.len()));
    }

    Ok(AgentOutcome {
        results,
        summary: format!("[group] {summary}"),
        risk_level,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::new_transaction_record;

    fn txn(date: &str, kind: &str, amount: f64) -> RawTransactionRecord {
        let mut t = new_transaction_record("d1", "g1");
        t.date = date.to_string();
        t.transaction_type = kind.to_string();
        t.amount = Some(amount);
        t.description = format!("{kind} {amount}");
        t
    }

    #[test]
    fn round_amounts_thresholds() {
        let none = vec![txn("01 DEC", "debit", 4_999.0), txn("02 DEC", "debit", 5_500.0)];
        assert_eq!(check_round_amounts(&none).status, CheckStatus::Pass);

        let one = vec![txn("01 DEC", "debit", 10_000.0)];
        assert_eq!(check_round_amounts(&one).status, CheckStatus::Warning);

        let many: Vec<_> = (0..5).map(|i| txn("01 DEC", "debit", 5_000.0 + i as f64 * 1_000.0)).collect();
        assert_eq!(check_round_amounts(&many).status, CheckStatus::Fail);
    }

    #[test]
    fn duplicates_grouped_by_key() {
        let mut a = txn("15 NOV", "debit", 250.0);
        a.counterparty = Some("ACME PTE LTD".to_string());
        let mut b = txn("15 nov", "debit", 250.0);
        b.counterparty = Some("Acme Pte Ltd".to_string());
        let c = check_duplicates(&[a, b]);
        assert_eq!(c.status, CheckStatus::Warning);
        assert_eq!(c.flagged_items.len(), 1);
        assert_eq!(c.flagged_items[0]["count"], 2);

        let distinct = vec![txn("01 DEC", "debit", 10.0), txn("02 DEC", "debit", 10.0)];
        assert_eq!(check_duplicates(&distinct).status, CheckStatus::Pass);
    }

    #[test]
    fn rapid_succession_warns_only() {
        let busy: Vec<_> = (0..12).map(|_| txn("03 DEC", "debit", 10.0)).collect();
        let c = check_rapid_succession(&busy);
        assert_eq!(c.status, CheckStatus::Warning);
        assert!(c.details.contains("03 DEC"));
    }

    #[test]
    fn outliers_need_five_samples() {
        let few = vec![txn("01 DEC", "debit", 1.0), txn("01 DEC", "debit", 1_000_000.0)];
        assert_eq!(check_large_outliers(&few).status, CheckStatus::Pass);

        let mut txns: Vec<_> = (0..10).map(|_| txn("01 DEC", "debit", 100.0)).collect();
        txns.push(txn("02 DEC", "debit", 100_000.0));
        let c = check_large_outliers(&txns);
        assert_eq!(c.status, CheckStatus::Warning);
        assert_eq!(c.flagged_items.len(), 1);
    }

    #[test]
    fn balance_swings() {
        let mut txns = Vec::new();
        for (i, bal) in [100_000.0, 99_000.0, 20_000.0, 98_000.0].iter().enumerate() {
            let mut t = txn(&format!("0{} DEC", i + 1), "debit", 100.0);
            t.balance = Some(*bal);
            txns.push(t);
        }
        // Two swings of ~80k on a 100k max balance.
        let c = check_balance_anomalies(&txns);
        assert_eq!(c.status, CheckStatus::Warning);
        assert_eq!(c.flagged_items.len(), 2);
    }

    #[test]
    fn cash_ratio_bands() {
        let mut cash = txn("01 DEC", "credit", 6_000.0);
        cash.is_cash = true;
        let normal = txn("02 DEC", "debit", 4_000.0);
        // 60% cash → fail.
        let c = check_cash_heavy(&[cash.clone(), normal.clone()], None);
        assert_eq!(c.status, CheckStatus::Fail);

        let mut small_cash = txn("01 DEC", "credit", 1_000.0);
        small_cash.is_cash = true;
        let big = txn("02 DEC", "debit", 9_000.0);
        let c = check_cash_heavy(&[small_cash, big], None);
        assert_eq!(c.status, CheckStatus::Pass);
    }

    #[test]
    fn timing_concentration() {
        // 8 of 12 on edge days (67%) → warning.
        let mut txns: Vec<_> = (0..8).map(|_| txn("01 DEC", "debit", 10.0)).collect();
        txns.extend((0..4).map(|_| txn("15 DEC", "debit", 10.0)));
        assert_eq!(check_timing_patterns(&txns).status, CheckStatus::Warning);

        // Under 10 dated rows: not enough signal.
        let few: Vec<_> = (0..5).map(|_| txn("01 DEC", "debit", 10.0)).collect();
        assert_eq!(check_timing_patterns(&few).status, CheckStatus::Pass);
    }

    #[tokio::test]
    async fn counterparty_check_degrades_without_model() {
        let model = ModelClient::disabled(reqwest::Client::new());
        let mut t = txn("01 DEC", "debit", 100.0);
        t.counterparty = Some("GELMAX PTE LTD".to_string());
        let c = check_counterparty_risk(&model, &[t]).await;
        assert_eq!(c.status, CheckStatus::Warning);
        assert!(c.details.contains("Could not run counterparty analysis"));
    }
}
