//! Insights agent: business-intelligence analysis of extracted
//! transactions: categories, cash flow, counterparties, unusual activity,
//! health scoring, and a model-written narrative.

use super::dates::{parse_day, parse_month, MONTH_ORDER};
use super::AgentOutcome;
use crate::llm::ModelClient;
use crate::models::{AggregatedMetricsRecord, RawTransactionRecord, StatementMetricsRecord};
use crate::store::AnalysisStore;
use anyhow::Result;
use serde_json::{json, Map, Value};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use tracing::{error, info};

const CATEGORY_LABELS: &[(&str, &str)] = &[
    ("salary_payroll", "Salary & Wages"),
    ("revenue", "Business Revenue"),
    ("rent", "Rent & Lease"),
    ("utilities", "Utilities"),
    ("food_beverage", "Food & Beverage"),
    ("transport", "Transport"),
    ("supplier_payment", "Supplier Payments"),
    ("purchase", "Purchases"),
    ("transfer", "Fund Transfers"),
    ("loan", "Loan Payments"),
    ("tax_government", "Tax & Government"),
    ("insurance", "Insurance"),
    ("fees_charges", "Bank Fees & Charges"),
    ("other", "Other / Uncategorized"),
];

fn category_label(category: &str) -> String {
    CATEGORY_LABELS
        .iter()
        .find(|(c, _)| *c == category)
        .map(|(_, l)| l.to_string())
        .unwrap_or_else(|| {
            let mut chars = category.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => category.to_string(),
            }
        })
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

// ── insight sections ─────────────────────────────────────────────────────────

pub fn category_analysis(txns: &[RawTransactionRecord]) -> Value {
    let mut debit_by_cat: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
    let mut credit_by_cat: BTreeMap<&str, (usize, f64)> = BTreeMap::new();

    for t in txns {
        let cat = if t.category.is_empty() { "other" } else { t.category.as_str() };
        let slot = match t.transaction_type.as_str() {
            "debit" => debit_by_cat.entry(cat).or_insert((0, 0.0)),
            "credit" => credit_by_cat.entry(cat).or_insert((0, 0.0)),
            _ => continue,
        };
        slot.0 += 1;
        slot.1 += t.amount.unwrap_or(0.0);
    }

    let build = |by_cat: &BTreeMap<&str, (usize, f64)>| -> (Vec<Value>, f64) {
        let total: f64 = by_cat.values().map(|(_, v)| v).sum();
        let mut entries: Vec<(&&str, &(usize, f64))> = by_cat.iter().collect();
        entries.sort_by(|a, b| b.1 .1.partial_cmp(&a.1 .1).unwrap_or(std::cmp::Ordering::Equal));
        let list = entries
            .iter()
            .map(|(cat, (count, sum))| {
                let pct = if total > 0.0 { sum / total * 100.0 } else { 0.0 };
                json!({
                    "category": cat,
                    "label": category_label(cat),
                    "count": count,
                    "total": round2(*sum),
                    "percentage": (pct * 10.0).round() / 10.0,
                })
            })
            .collect();
        (list, total)
    };

    let (debit_categories, total_debits) = build(&debit_by_cat);
    let (credit_categories, total_credits) = build(&credit_by_cat);

    json!({
        "debit_categories": debit_categories,
        "credit_categories": credit_categories,
        "total_debit_amount": round2(total_debits),
        "total_credit_amount": round2(total_credits),
        "top_debit_category": debit_categories.first().map(|c| c["label"].clone()).unwrap_or(json!("N/A")),
        "top_credit_category": credit_categories.first().map(|c| c["label"].clone()).unwrap_or(json!("N/A")),
        "debit_category_count": debit_categories.len(),
        "credit_category_count": credit_categories.len(),
    })
}

pub fn cash_flow_analysis(txns: &[RawTransactionRecord]) -> Value {
    let mut inflow: BTreeMap<u32, f64> = BTreeMap::new();
    let mut outflow: BTreeMap<u32, f64> = BTreeMap::new();

    for t in txns {
        let Some(day) = parse_day(&t.date) else { continue };
        let amount = t.amount.unwrap_or(0.0);
        match t.transaction_type.as_str() {
            "credit" => *inflow.entry(day).or_default() += amount,
            "debit" => *outflow.entry(day).or_default() += amount,
            _ => {}
        }
    }

    let all_days: std::collections::BTreeSet<u32> =
        inflow.keys().chain(outflow.keys()).copied().collect();
    let daily_flow: Vec<Value> = all_days
        .iter()
        .map(|day| {
            let i = inflow.get(day).copied().unwrap_or(0.0);
            let o = outflow.get(day).copied().unwrap_or(0.0);
            json!({"day": day, "inflow": round2(i), "outflow": round2(o), "net": round2(i - o)})
        })
        .collect();

    let total_inflow: f64 = inflow.values().sum();
    let total_outflow: f64 = outflow.values().sum();
    let net_flow = total_inflow - total_outflow;

    let peak_of = |m: &BTreeMap<u32, f64>| {
        m.iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(d, _)| *d)
    };

    // Weekly buckets: 1–7, 8–14, 15–21, 22–31.
    let week_names = ["week_1 (1-7)", "week_2 (8-14)", "week_3 (15-21)", "week_4 (22-31)"];
    let mut weeks = [(0.0, 0.0); 4];
    for day in &all_days {
        let idx = match day {
            1..=7 => 0,
            8..=14 => 1,
            15..=21 => 2,
            _ => 3,
        };
        weeks[idx].0 += inflow.get(day).copied().unwrap_or(0.0);
        weeks[idx].1 += outflow.get(day).copied().unwrap_or(0.0);
    }
    let weekly_breakdown: Vec<Value> = week_names
        .iter()
        .zip(weeks.iter())
        .map(|(name, (i, o))| {
            json!({"week": name, "inflow": round2(*i), "outflow": round2(*o), "net": round2(i - o)})
        })
        .collect();

    json!({
        "total_inflow": round2(total_inflow),
        "total_outflow": round2(total_outflow),
        "net_flow": round2(net_flow),
        "net_flow_direction": if net_flow >= 0.0 { "positive" } else { "negative" },
        "burn_rate": round2(total_outflow),
        "peak_inflow_day": peak_of(&inflow),
        "peak_outflow_day": peak_of(&outflow),
        "daily_flow": daily_flow,
        "weekly_breakdown": weekly_breakdown,
    })
}

pub fn counterparty_analysis(txns: &[RawTransactionRecord]) -> Value {
    let mut vendors: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
    let mut customers: BTreeMap<&str, (usize, f64)> = BTreeMap::new();

    for t in txns {
        let Some(cp) = t.counterparty.as_deref() else { continue };
        let cp = cp.trim();
        if cp.is_empty() || cp.eq_ignore_ascii_case("unknown") || cp.eq_ignore_ascii_case("n/a") {
            continue;
        }
        let slot = match t.transaction_type.as_str() {
            "debit" => vendors.entry(cp).or_insert((0, 0.0)),
            "credit" => customers.entry(cp).or_insert((0, 0.0)),
            _ => continue,
        };
        slot.0 += 1;
        slot.1 += t.amount.unwrap_or(0.0);
    }

    let top = |m: &BTreeMap<&str, (usize, f64)>| -> Vec<Value> {
        let mut entries: Vec<(&&str, &(usize, f64))> = m.iter().collect();
        entries.sort_by(|a, b| b.1 .1.partial_cmp(&a.1 .1).unwrap_or(std::cmp::Ordering::Equal));
        entries
            .iter()
            .take(15)
            .map(|(name, (count, total))| {
                json!({"name": name, "count": count, "total": round2(*total)})
            })
            .collect()
    };

    let mut recurring: Vec<(&&str, &(usize, f64))> =
        vendors.iter().filter(|(_, (count, _))| *count >= 3).collect();
    recurring.sort_by(|a, b| b.1 .0.cmp(&a.1 .0));
    let recurring_vendors: Vec<Value> = recurring
        .iter()
        .take(10)
        .map(|(name, (count, total))| json!({"name": name, "count": count, "total": round2(*total)}))
        .collect();

    json!({
        "top_vendors": top(&vendors),
        "top_customers": top(&customers),
        "recurring_vendors": recurring_vendors,
        "unique_vendor_count": vendors.len(),
        "unique_customer_count": customers.len(),
    })
}

pub fn unusual_transaction_detection(txns: &[RawTransactionRecord]) -> Value {
    let debits: Vec<&RawTransactionRecord> = txns
        .iter()
        .filter(|t| t.transaction_type == "debit" && t.amount.is_some())
        .collect();
    let credits: Vec<&RawTransactionRecord> = txns
        .iter()
        .filter(|t| t.transaction_type == "credit" && t.amount.is_some())
        .collect();

    let mut large: Vec<Value> = Vec::new();

    if !debits.is_empty() {
        let avg: f64 =
            debits.iter().filter_map(|t| t.amount).sum::<f64>() / debits.len() as f64;
        for t in &debits {
            let amount = t.amount.unwrap_or(0.0);
            if amount >= avg * 3.0 {
                let multiple = amount / avg;
                large.push(json!({
                    "type": "large_debit",
                    "date": t.date,
                    "description": t.description,
                    "amount": amount,
                    "reason": format!("Amount ({amount:.2}) is >3x the average debit ({avg:.2})"),
                    "explanation": format!(
                        "This outgoing payment of {amount:.2} is {multiple:.1}x the average \
                         debit of {avg:.2}. Transactions significantly above the account's \
                         typical spending pattern may indicate bulk payments, one-off capital \
                         expenditures, or potentially unauthorized large withdrawals."
                    ),
                }));
            }
        }
    }

    if !credits.is_empty() {
        let avg: f64 =
            credits.iter().filter_map(|t| t.amount).sum::<f64>() / credits.len() as f64;
        for t in &credits {
            let amount = t.amount.unwrap_or(0.0);
            if amount >= avg * 3.0 {
                let multiple = amount / avg;
                large.push(json!({
                    "type": "large_credit",
                    "date": t.date,
                    "description": t.description,
                    "amount": amount,
                    "reason": format!("Amount ({amount:.2}) is >3x the average credit ({avg:.2})"),
                    "explanation": format!(
                        "This incoming payment of {amount:.2} is {multiple:.1}x the average \
                         credit of {avg:.2}. Unusually large inflows may represent one-off \
                         settlements, large client payments, loan disbursements, or irregular \
                         deposits that merit source verification."
                    ),
                }));
            }
        }
    }

    // Round numbers at or above 1,000.
    let round_txns: Vec<Value> = txns
        .iter()
        .filter(|t| {
            t.amount.map(|a| a >= 1000.0 && a == a.trunc()).unwrap_or(false)
        })
        .map(|t| {
            let amount = t.amount.unwrap_or(0.0);
            json!({
                "type": "round_number",
                "date": t.date,
                "description": t.description,
                "amount": amount,
                "transaction_type": t.transaction_type,
                "reason": format!(
                    "Exact round amount of {amount:.0} — may indicate a manual or structured \
                     transfer rather than an organic payment"
                ),
                "explanation": format!(
                    "This {} of {amount:.2} is an exact whole-number amount. Round-number \
                     transactions can signal manual transfers, loan repayments, or structured \
                     deposits that warrant closer review.",
                    t.transaction_type
                ),
            })
        })
        .collect();

    // Same-day large bi-directional movements.
    let mut day_movements: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
    for t in txns {
        if t.date.is_empty() || t.amount.is_none() {
            continue;
        }
        let slot = day_movements.entry(t.date.as_str()).or_insert((0.0, 0.0));
        if t.transaction_type == "credit" {
            slot.0 += t.amount.unwrap_or(0.0);
        } else {
            slot.1 += t.amount.unwrap_or(0.0);
        }
    }
    let same_day_flags: Vec<Value> = day_movements
        .iter()
        .filter(|(_, (c, d))| *c > 5000.0 && *d > 5000.0)
        .map(|(day, (c, d))| {
            let net = round2(c - d);
            json!({
                "type": "same_day_large_movement",
                "date": day,
                "credits": round2(*c),
                "debits": round2(*d),
                "amount": round2(c + d),
                "reason": "Both large credits and debits on the same day",
                "description": format!("Credits: {c:.2} | Debits: {d:.2} | Net: {net:.2}"),
                "explanation": format!(
                    "On {day}, the account received {c:.2} in credits and sent out {d:.2} in \
                     debits (net: {net:.2}). Same-day large bi-directional flows can indicate \
                     pass-through activity, money laundering layering, or fund restructuring."
                ),
            })
        })
        .collect();

    // Low balance events, one per day.
    let mut seen_dates: std::collections::HashSet<&str> = std::collections::HashSet::new();
    let mut low_balance_events: Vec<Value> = Vec::new();
    for t in txns {
        let Some(balance) = t.balance else { continue };
        if balance < 10_000.0 && seen_dates.insert(t.date.as_str()) {
            let desc: String = t.description.chars().take(60).collect();
            low_balance_events.push(json!({
                "type": "low_balance",
                "date": t.date,
                "balance": balance,
                "amount": balance,
                "description": t.description,
                "reason": format!("Account balance dropped to {balance:.2}"),
                "explanation": format!(
                    "After transaction '{desc}', the account balance fell to {balance:.2}. \
                     Low balances may indicate cash flow stress, over-commitment, or an \
                     impending overdraft."
                ),
            }));
        }
    }

    let total_flags = large.len() + same_day_flags.len() + low_balance_events.len();
    json!({
        "large_transactions": large.into_iter().take(20).collect::<Vec<_>>(),
        "round_number_transactions": round_txns.into_iter().take(20).collect::<Vec<_>>(),
        "same_day_large_movements": same_day_flags,
        "low_balance_events": low_balance_events.into_iter().take(10).collect::<Vec<_>>(),
        "total_flags": total_flags,
    })
}

pub fn day_of_month_patterns(txns: &[RawTransactionRecord]) -> Value {
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    let mut amounts: BTreeMap<u32, f64> = BTreeMap::new();

    for t in txns {
        let Some(day) = parse_day(&t.date) else { continue };
        *counts.entry(day).or_default() += 1;
        *amounts.entry(day).or_default() += t.amount.unwrap_or(0.0);
    }

    let pattern: Vec<Value> = counts
        .iter()
        .map(|(day, count)| {
            json!({
                "day": day,
                "transaction_count": count,
                "total_amount": round2(amounts.get(day).copied().unwrap_or(0.0)),
            })
        })
        .collect();

    json!({
        "daily_pattern": pattern,
        "busiest_day": counts.iter().max_by_key(|(_, c)| **c).map(|(d, _)| *d),
        "quietest_day": counts.iter().min_by_key(|(_, c)| **c).map(|(d, _)| *d),
        "highest_value_day": amounts
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(d, _)| *d),
        "active_days": counts.len(),
    })
}

pub fn channel_analysis(txns: &[RawTransactionRecord]) -> Value {
    let mut channels: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
    for t in txns {
        let channel = if t.channel.trim().is_empty() { "Unknown" } else { t.channel.trim() };
        let slot = channels.entry(channel).or_insert((0, 0.0));
        slot.0 += 1;
        slot.1 += t.amount.unwrap_or(0.0);
    }

    let total: f64 = channels.values().map(|(_, v)| v).sum();
    let mut entries: Vec<(&&str, &(usize, f64))> = channels.iter().collect();
    entries.sort_by(|a, b| b.1 .1.partial_cmp(&a.1 .1).unwrap_or(std::cmp::Ordering::Equal));

    json!({
        "channels": entries
            .iter()
            .map(|(name, (count, sum))| {
                let pct = if total > 0.0 { sum / total * 100.0 } else { 0.0 };
                json!({
                    "channel": name,
                    "count": count,
                    "total": round2(*sum),
                    "percentage": (pct * 10.0).round() / 10.0,
                })
            })
            .collect::<Vec<_>>(),
        "dominant_channel": entries.first().map(|(n, _)| n.to_string()).unwrap_or_else(|| "N/A".to_string()),
        "total_channels": entries.len(),
    })
}

/// Composite business-health score from statement metrics.
pub fn business_health(
    txns: &[RawTransactionRecord],
    metrics: Option<&StatementMetricsRecord>,
) -> Value {
    let Some(metrics) = metrics else {
        return json!({"score": 0, "indicators": {}, "assessment": "Insufficient data"});
    };

    let opening = metrics.opening_balance.unwrap_or(0.0);
    let closing = metrics.closing_balance.unwrap_or(0.0);
    let total_out = metrics.total_amount_of_debit_transactions;
    let total_in = metrics.total_amount_of_credit_transactions;

    let mut indicators = Map::new();

    let runway_months = if total_out > 0.0 { closing / total_out } else { 0.0 };
    indicators.insert("cash_runway_months".to_string(), json!(round2(runway_months)));

    let coverage = if total_out > 0.0 { total_in / total_out } else { 0.0 };
    indicators.insert(
        "revenue_coverage_ratio".to_string(),
        json!((coverage * 1000.0).round() / 1000.0),
    );

    let balance_change = closing - opening;
    let balance_change_pct = if opening > 0.0 { balance_change / opening * 100.0 } else { 0.0 };
    indicators.insert("balance_change".to_string(), json!(round2(balance_change)));
    indicators.insert(
        "balance_change_pct".to_string(),
        json!((balance_change_pct * 10.0).round() / 10.0),
    );
    indicators.insert(
        "balance_trend".to_string(),
        json!(if balance_change > 0.0 { "growing" } else { "declining" }),
    );

    let cash_ratio = if total_in > 0.0 {
        metrics.total_amount_of_cash_deposits / total_in * 100.0
    } else {
        0.0
    };
    indicators.insert(
        "cash_deposit_ratio_pct".to_string(),
        json!((cash_ratio * 10.0).round() / 10.0),
    );

    let fees = metrics.total_fees_charged;
    let fee_burden = if total_out > 0.0 { fees / total_out * 100.0 } else { 0.0 };
    indicators.insert(
        "fee_burden_pct".to_string(),
        json!((fee_burden * 1000.0).round() / 1000.0),
    );
    indicators.insert("total_fees".to_string(), json!(round2(fees)));

    let days_active: std::collections::BTreeSet<u32> =
        txns.iter().filter_map(|t| parse_day(&t.date)).collect();
    let velocity = if days_active.is_empty() {
        0.0
    } else {
        txns.len() as f64 / days_active.len() as f64
    };
    indicators.insert(
        "daily_transaction_velocity".to_string(),
        json!((velocity * 10.0).round() / 10.0),
    );
    indicators.insert("active_days".to_string(), json!(days_active.len()));

    let min_bal = metrics.min_eod_balance.unwrap_or(0.0);
    let avg_daily_spend = if days_active.is_empty() {
        0.0
    } else {
        total_out / days_active.len() as f64
    };
    let min_balance_cover_days = if avg_daily_spend > 0.0 { min_bal / avg_daily_spend } else { 0.0 };
    indicators.insert(
        "min_balance_cover_days".to_string(),
        json!((min_balance_cover_days * 10.0).round() / 10.0),
    );

    let mut score: i64 = 50;
    if coverage >= 1.0 {
        score += 10;
    }
    if coverage >= 0.8 {
        score += 5;
    }
    if closing >= opening {
        score += 10;
    }
    if runway_months >= 0.5 {
        score += 5;
    }
    if runway_months >= 1.0 {
        score += 5;
    }
    if min_balance_cover_days >= 3.0 {
        score += 5;
    }
    if coverage < 0.5 {
        score -= 15;
    }
    if closing < opening * 0.5 {
        score -= 10;
    }
    if min_bal < 5000.0 {
        score -= 10;
    }
    if cash_ratio > 30.0 {
        score -= 5;
    }
    if runway_months < 0.1 {
        score -= 10;
    }
    let score = score.clamp(0, 100);

    let assessment = if score >= 80 {
        "Strong — healthy cash flows with positive trajectory"
    } else if score >= 60 {
        "Moderate — stable but watch for declining balances"
    } else if score >= 40 {
        "Caution — cash flow strain detected"
    } else {
        "Concern — significant cash flow issues observed"
    };

    json!({"score": score, "assessment": assessment, "indicators": Value::Object(indicators)})
}

fn assess_risk(health: &Value, unusual: &Value) -> String {
    let score = health.get("score").and_then(Value::as_i64).unwrap_or(0);
    let flags = unusual.get("total_flags").and_then(Value::as_i64).unwrap_or(0);

    if score >= 70 && flags < 5 {
        "low"
    } else if score >= 50 && flags < 15 {
        "medium"
    } else if score >= 30 {
        "high"
    } else {
        "critical"
    }
    .to_string()
}

fn empty_narrative(group: bool) -> Value {
    let mut v = json!({
        "executive_summary": "Narrative generation failed — see structured data for insights.",
        "spending_analysis": "",
        "income_analysis": "",
        "cash_flow_assessment": "",
        "risk_observations": "",
        "recommendations": [],
    });
    if group {
        v["trend_analysis"] = json!("");
    }
    v
}

async fn generate_narrative(model: &ModelClient, data: &Value, group: bool) -> Value {
    let trend_field = if group {
        "\n  \"trend_analysis\": \"2-3 sentences on month-over-month trends and patterns\","
    } else {
        ""
    };
    let prompt = format!(
        "You are a senior financial analyst reviewing {}. \
         Generate a concise but insightful narrative analysis based on the data below.\n\n\
         {}\n\n\
         Return a JSON object with these keys:\n{{\n\
           \"executive_summary\": \"2-3 sentence high-level summary\",\n\
           \"spending_analysis\": \"3-4 sentences on spending patterns and major expense categories\",\n\
           \"income_analysis\": \"2-3 sentences on income sources and patterns\",\n\
           \"cash_flow_assessment\": \"2-3 sentences on cash flow health, burn rate, and trajectory\",{trend_field}\n\
           \"risk_observations\": \"2-3 sentences on any concerning patterns or red flags\",\n\
           \"recommendations\": [\"recommendation 1\", \"recommendation 2\", \"recommendation 3\"]\n\
         }}",
        if group {
            "MULTIPLE bank statements for the same customer"
        } else {
            "a business bank statement"
        },
        serde_json::to_string_pretty(data).unwrap_or_default(),
    );

    let messages = [
        ("system", "You are a senior financial analyst. Return ONLY valid JSON.".to_string()),
        ("user", prompt),
    ];
    match model.chat_completion(&messages, 0.3, 2500, true).await {
        Ok(response) => match serde_json::from_str::<Value>(&response) {
            Ok(narrative) => narrative,
            Err(e) => {
                error!("Narrative parse failed: {e}");
                empty_narrative(group)
            }
        },
        Err(e) => {
            error!("Narrative generation failed: {e:#}");
            empty_narrative(group)
        }
    }
}

// ── per-document analysis ────────────────────────────────────────────────────

pub async fn analyse(
    document_id: &str,
    store: &AnalysisStore,
    model: &ModelClient,
) -> Result<AgentOutcome> {
    info!("Insights agent running for document {document_id}");

    let transactions = store.all_transactions_for_document(document_id).await?;
    let metrics = store.statement_metrics(document_id).await?;

    if transactions.is_empty() {
        return Ok(AgentOutcome::low(
            json!({"error": "No transactions found — run extraction first"}),
            "No transaction data available for insights.",
        ));
    }

    info!("  📊 Analyzing {} transactions...", transactions.len());

    let category_breakdown = category_analysis(&transactions);
    let cash_flow = cash_flow_analysis(&transactions);
    let top_counterparties = counterparty_analysis(&transactions);
    let unusual = unusual_transaction_detection(&transactions);
    let day_patterns = day_of_month_patterns(&transactions);
    let channels = channel_analysis(&transactions);
    let health = business_health(&transactions, metrics.as_ref());

    let narrative_input = json!({
        "account_holder": metrics.as_ref().and_then(|m| m.account_holder.clone()),
        "bank": metrics.as_ref().and_then(|m| m.bank.clone()),
        "period": metrics.as_ref().and_then(|m| m.statement_period.clone()),
        "opening_balance": metrics.as_ref().and_then(|m| m.opening_balance),
        "closing_balance": metrics.as_ref().and_then(|m| m.closing_balance),
        "total_transactions": transactions.len(),
        "category_breakdown": category_breakdown,
        "cash_flow": cash_flow,
        "top_counterparties": top_counterparties,
        "unusual_transactions": unusual["total_flags"],
        "business_health": health,
    });

    info!("  🤖 Generating narrative...");
    let narrative = generate_narrative(model, &narrative_input, false).await;
    let risk_level = assess_risk(&health, &unusual);

    let results = json!({
        "category_breakdown": category_breakdown,
        "cash_flow": cash_flow,
        "top_counterparties": top_counterparties,
        "unusual_transactions": unusual,
        "day_of_month_patterns": day_patterns,
        "channel_analysis": channels,
        "business_health": health,
        "narrative": narrative,
    });

    let summary_parts = vec![
        metrics
            .as_ref()
            .and_then(|m| m.statement_period.clone())
            .map(|p| format!("Period: {p}"))
            .unwrap_or_default(),
        format!("Transactions: {}", transactions.len()),
        format!(
            "Net cash flow: {:.2}",
            results["cash_flow"]["net_flow"].as_f64().unwrap_or(0.0)
        ),
        format!(
            "Top category: {}",
            results["category_breakdown"]["top_debit_category"]
                .as_str()
                .unwrap_or("N/A")
        ),
        format!("Risk: {risk_level}"),
    ];
    let summary = summary_parts.into_iter().filter(|p| !p.is_empty()).collect::<Vec<_>>().join(" | ");

    info!("  ✅ Insights complete — risk: {risk_level}");
    Ok(AgentOutcome {
        results,
        summary,
        risk_level,
    })
}

// ── group analysis ───────────────────────────────────────────────────────────

/// Per-month flow totals across statements.
pub fn monthly_trends(
    transactions: &[RawTransactionRecord],
    all_metrics: &[StatementMetricsRecord],
) -> Value {
    let mut by_month: BTreeMap<usize, (f64, f64, usize, usize)> = BTreeMap::new();
    for t in transactions {
        let Some(month) = parse_month(&t.date) else { continue };
        let Some(order) = MONTH_ORDER.iter().position(|m| *m == month) else { continue };
        let slot = by_month.entry(order).or_insert((0.0, 0.0, 0, 0));
        match t.transaction_type.as_str() {
            "credit" => {
                slot.0 += t.amount.unwrap_or(0.0);
                slot.2 += 1;
            }
            "debit" => {
                slot.1 += t.amount.unwrap_or(0.0);
                slot.3 += 1;
            }
            _ => {}
        }
    }

    let monthly_flow: Vec<Value> = by_month
        .iter()
        .map(|(order, (credits, debits, ccount, dcount))| {
            json!({
                "month": MONTH_ORDER[*order],
                "total_credits": round2(*credits),
                "total_debits": round2(*debits),
                "net_flow": round2(credits - debits),
                "credit_count": ccount,
                "debit_count": dcount,
            })
        })
        .collect();

    let balance_trajectory: Vec<Value> = all_metrics
        .iter()
        .map(|m| {
            json!({
                "period": m.statement_period,
                "opening_balance": m.opening_balance,
                "closing_balance": m.closing_balance,
                "max_balance": m.max_eod_balance,
                "min_balance": m.min_eod_balance,
            })
        })
        .collect();

    json!({
        "monthly_flow": monthly_flow,
        "balance_trajectory": balance_trajectory,
        "total_months": by_month.len(),
    })
}

/// Health indicators across the whole statement series.
pub fn group_business_health(all_metrics: &[StatementMetricsRecord]) -> Value {
    if all_metrics.is_empty() {
        return json!({"score": 0, "indicators": {}, "assessment": "Insufficient data"});
    }

    let first_opening = all_metrics[0].opening_balance.unwrap_or(0.0);
    let last_closing = all_metrics[all_metrics.len() - 1].closing_balance.unwrap_or(0.0);
    let balance_change = last_closing - first_opening;

    let total_in: f64 =
        all_metrics.iter().map(|m| m.total_amount_of_credit_transactions).sum();
    let total_out: f64 =
        all_metrics.iter().map(|m| m.total_amount_of_debit_transactions).sum();
    let coverage = if total_out > 0.0 { total_in / total_out } else { 0.0 };

    let num_months = all_metrics.len().max(1) as f64;
    let avg_monthly_out = total_out / num_months;
    let runway = if avg_monthly_out > 0.0 { last_closing / avg_monthly_out } else { 0.0 };

    let closings: Vec<f64> = all_metrics.iter().map(|m| m.closing_balance.unwrap_or(0.0)).collect();
    let (balance_std_dev, balance_cv) = if closings.len() > 1 {
        let sd = closings.iter().copied().std_dev();
        let mean = closings.iter().copied().mean();
        (round2(sd), if mean > 0.0 { (sd / mean * 1000.0).round() / 10.0 } else { 0.0 })
    } else {
        (0.0, 0.0)
    };

    let indicators = json!({
        "overall_balance_change": round2(balance_change),
        "overall_balance_change_pct": if first_opening != 0.0 {
            (balance_change / first_opening * 1000.0).round() / 10.0
        } else {
            0.0
        },
        "balance_trend": if balance_change > 0.0 { "growing" } else { "declining" },
        "total_credits_all": round2(total_in),
        "total_debits_all": round2(total_out),
        "revenue_coverage_ratio": (coverage * 1000.0).round() / 1000.0,
        "avg_monthly_credits": round2(total_in / num_months),
        "avg_monthly_debits": round2(total_out / num_months),
        "avg_monthly_net": round2((total_in - total_out) / num_months),
        "cash_runway_months": round2(runway),
        "balance_std_dev": balance_std_dev,
        "balance_cv": balance_cv,
    });

    let mut score: i64 = 50;
    if coverage >= 1.0 {
        score += 10;
    }
    if coverage >= 0.8 {
        score += 5;
    }
    if balance_change > 0.0 {
        score += 10;
    }
    if runway >= 1.0 {
        score += 10;
    } else if runway >= 0.5 {
        score += 5;
    }
    if coverage < 0.5 {
        score -= 15;
    }
    if balance_change < -first_opening * 0.3 {
        score -= 10;
    }
    if runway < 0.2 {
        score -= 10;
    }
    let score = score.clamp(0, 100);

    let assessment = if score >= 80 {
        "Strong — healthy cash flows across the analysis period"
    } else if score >= 60 {
        "Moderate — stable with some areas to watch"
    } else if score >= 40 {
        "Caution — cash flow strain detected across statements"
    } else {
        "Concern — significant cash flow issues across the period"
    };

    json!({
        "score": score,
        "assessment": assessment,
        "indicators": indicators,
        "statements_analyzed": all_metrics.len(),
    })
}

pub async fn analyse_group(
    group_id: &str,
    store: &AnalysisStore,
    model: &ModelClient,
) -> Result<AgentOutcome> {
    info!("📊 Group insights agent running for group {group_id}");

    let transactions = store.all_transactions_for_group(group_id).await?;
    let all_metrics = store.statement_metrics_for_group(group_id).await?;
    let agg_metrics: Option<AggregatedMetricsRecord> = store.aggregated_metrics(group_id).await?;

    if transactions.is_empty() {
        return Ok(AgentOutcome::low(
            json!({"error": "No transactions found across group — run extraction first"}),
            "No transaction data available for group insights.",
        ));
    }

    let total_docs = all_metrics.len();
    info!(
        "  📊 Analyzing {} transactions across {total_docs} statements...",
        transactions.len()
    );

    let category_breakdown = category_analysis(&transactions);
    let cash_flow = cash_flow_analysis(&transactions);
    let top_counterparties = counterparty_analysis(&transactions);
    let unusual = unusual_transaction_detection(&transactions);
    let day_patterns = day_of_month_patterns(&transactions);
    let channels = channel_analysis(&transactions);
    let trends = monthly_trends(&transactions, &all_metrics);
    let health = group_business_health(&all_metrics);

    let per_statement: Vec<Value> = all_metrics
        .iter()
        .map(|m| {
            json!({
                "document_id": m.document_id,
                "period": m.statement_period,
                "bank": m.bank,
                "opening_balance": m.opening_balance,
                "closing_balance": m.closing_balance,
                "total_credits": m.total_amount_of_credit_transactions,
                "total_debits": m.total_amount_of_debit_transactions,
                "credit_count": m.total_no_of_credit_transactions,
                "debit_count": m.total_no_of_debit_transactions,
            })
        })
        .collect();

    let narrative_input = json!({
        "account_holder": agg_metrics.as_ref().and_then(|a| a.account_holder.clone()),
        "bank": agg_metrics.as_ref().and_then(|a| a.bank.clone()),
        "period": agg_metrics.as_ref().and_then(|a| a.period_covered.clone()),
        "total_statements": total_docs,
        "total_transactions": transactions.len(),
        "category_breakdown": category_breakdown,
        "cash_flow": cash_flow,
        "top_counterparties": top_counterparties,
        "monthly_trends": trends,
        "business_health": health,
    });

    info!("  🤖 Generating group narrative...");
    let narrative = generate_narrative(model, &narrative_input, true).await;
    let risk_level = assess_risk(&health, &unusual);

    let results = json!({
        "total_statements": total_docs,
        "total_transactions": transactions.len(),
        "per_statement_summary": per_statement,
        "category_breakdown": category_breakdown,
        "cash_flow": cash_flow,
        "top_counterparties": top_counterparties,
        "unusual_transactions": unusual,
        "day_of_month_patterns": day_patterns,
        "channel_analysis": channels,
        "business_health": health,
        "monthly_trends": trends,
        "narrative": narrative,
    });

    let summary = format!(
        "Statements: {total_docs} | Transactions: {} | Net cash flow: {:.2} | \
         Top category: {} | Risk: {risk_level}",
        transactions.len(),
        results["cash_flow"]["net_flow"].as_f64().unwrap_or(0.0),
        results["category_breakdown"]["top_debit_category"].as_str().unwrap_or("N/A"),
    );

    info!("  ✅ Group insights complete — risk: {risk_level}");
    Ok(AgentOutcome {
        results,
        summary,
        risk_level,
    })
}
