//! Extraction engine: a three-tier cascade that turns heterogeneous bank
//! statement PDFs into a canonical transaction stream, then validates,
//! scores and persists it.
//!
//! Tier A reconstructs grid tables; Tier B infers columns from word
//! positions; Tier C falls back to model-assisted parsing (with OCR for
//! scanned documents). Later tiers run only when earlier tiers decline.

pub mod account;
pub mod assist;
pub mod banks;
pub mod columns;
pub mod dedup;
pub mod metrics;
pub mod normalize;
pub mod tables;
pub mod validate;
pub mod words;

use crate::agents::AgentOutcome;
use crate::llm::ModelClient;
use crate::models::{Config, DocumentRecord, RawTransactionRecord, StatementMetricsRecord};
use crate::pdf::{engine, DocumentSnapshot};
use crate::store::{new_transaction_record, AnalysisStore};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

/// Transaction direction / boundary marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnType {
    Credit,
    Debit,
    OpeningBalance,
    ClosingBalance,
}

impl TxnType {
    pub fn as_str(&self) -> &str {
        match self {
            TxnType::Credit => "credit",
            TxnType::Debit => "debit",
            TxnType::OpeningBalance => "opening_balance",
            TxnType::ClosingBalance => "closing_balance",
        }
    }
}

/// The canonical transaction record, the only shape the tiers emit and the
/// validation / persistence layers consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Txn {
    pub transaction_date: String,
    pub value_date: String,
    pub description: String,
    pub withdrawal: Option<f64>,
    pub deposit: Option<f64>,
    pub balance: Option<f64>,
    pub txn_type: TxnType,
    pub channel: String,
    pub counterparty: Option<String>,
    pub reference: Option<String>,
    pub currency: Option<String>,
    pub account_section: u32,
    pub page_number: Option<u32>,
}

impl Default for Txn {
    fn default() -> Self {
        Self {
            transaction_date: String::new(),
            value_date: String::new(),
            description: String::new(),
            withdrawal: None,
            deposit: None,
            balance: None,
            txn_type: TxnType::Debit,
            channel: String::new(),
            counterparty: None,
            reference: None,
            currency: None,
            account_section: 0,
            page_number: None,
        }
    }
}

impl Txn {
    pub fn amount(&self) -> Option<f64> {
        self.withdrawal.or(self.deposit)
    }

    /// True for credit/debit rows (not opening/closing markers).
    pub fn is_monetary(&self) -> bool {
        matches!(self.txn_type, TxnType::Credit | TxnType::Debit)
    }
}

/// Convert a canonical transaction into its persisted form.
pub fn to_record(txn: &Txn, document_id: &str, group_id: &str) -> RawTransactionRecord {
    let mut rec = new_transaction_record(document_id, group_id);
    rec.date = if txn.value_date.is_empty() {
        txn.transaction_date.clone()
    } else {
        txn.value_date.clone()
    };
    rec.description = txn.description.clone();
    rec.transaction_type = txn.txn_type.as_str().to_string();
    rec.amount = txn.amount();
    rec.balance = txn.balance;
    rec.reference = txn.reference.clone();
    rec.category = normalize::categorize_transaction(&txn.description);
    rec.counterparty = txn.counterparty.clone();
    rec.channel = txn.channel.clone();
    rec.is_cash = normalize::is_cash_transaction(&txn.description);
    rec.is_cheque = normalize::is_cheque_transaction(&txn.description);
    rec.currency = txn.currency.clone().unwrap_or_else(|| "SGD".to_string());
    rec.page_number = txn.page_number.map(|p| p as i64);
    rec.raw_text = serde_json::to_string(txn).ok();
    rec
}

/// Run the full extraction pipeline for one document.
pub async fn analyse(
    document: &DocumentRecord,
    snapshot: &DocumentSnapshot,
    store: &AnalysisStore,
    model: &ModelClient,
    config: &Config,
    layout_context: Option<&Value>,
) -> Result<AgentOutcome> {
    info!("Extraction agent running for document {}", document.id);

    let is_scanned = snapshot.is_scanned();

    // Page text for bank detection and the model tier.
    info!("  📄 Extracting text from {} pages...", snapshot.page_count);
    let pages: Vec<(u32, String)> = if is_scanned {
        info!("  🔍 Scanned/image PDF detected — running OCR via the vision model...");
        let images =
            engine::load_page_images(document.file_path.clone(), config.pdf_to_image_dpi).await?;
        assist::ocr_pages(model, &images).await
    } else {
        snapshot.pages.iter().map(|p| (p.number, p.text.clone())).collect()
    };

    if pages.iter().all(|(_, text)| text.trim().is_empty()) {
        bail!("No text could be extracted from the PDF");
    }

    // Bank detection: the layout agent's verdict is reused when it had one;
    // otherwise logo vision with text fallback.
    let layout_bank = layout_context
        .and_then(|c| c.get("bank_detected"))
        .and_then(|b| b.as_str())
        .filter(|b| *b != "Unknown" && !b.is_empty());
    let first_pages_text = pages
        .iter()
        .take(3)
        .map(|(_, t)| t.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let bank = match layout_bank {
        Some(b) => b.to_string(),
        None => {
            banks::detect_bank(
                model,
                snapshot.render.first_page_header_png.as_deref(),
                &first_pages_text,
            )
            .await
        }
    };
    info!("  🏦 Detected bank: {bank}");

    let first_two_pages: String = pages
        .iter()
        .take(2)
        .map(|(_, t)| t.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    // ── Tier cascade ─────────────────────────────────────────────────────
    let mut account_info;
    let mut all_transactions: Vec<Txn>;
    let extraction_method;
    let pages_processed;

    let table_result = if is_scanned { None } else { tables::try_extract_tables(snapshot) };

    if let Some(result) = table_result {
        info!(
            "  ✅ Table extraction: {} transactions (zero model calls for transactions)",
            result.transactions.len()
        );
        all_transactions = result.transactions;
        extraction_method = "table";
        pages_processed = snapshot.page_count;

        info!("  🏦 Extracting account info...");
        account_info = account::extract_account_info(model, &first_two_pages).await;
        account_info.override_with(&result.account_info);
        tables::inject_boundary_balances(&mut all_transactions, &result.account_info);
    } else {
        let word_result = if is_scanned {
            None
        } else {
            info!("  📊 Table extraction not available — trying word-position extraction...");
            words::try_extract_words(snapshot)
        };

        if let Some(result) = word_result {
            info!(
                "  ✅ Word-position extraction: {} transactions (zero model calls for transactions)",
                result.transactions.len()
            );
            all_transactions = result.transactions;
            extraction_method = "words";
            pages_processed = snapshot.page_count;

            info!("  🏦 Extracting account info...");
            account_info = account::extract_account_info(model, &first_two_pages).await;
            account_info.override_with(&result.account_info);
        } else {
            extraction_method = if is_scanned { "ocr+llm" } else { "llm" };
            if is_scanned {
                info!("  📊 Scanned PDF — using OCR text + model parsing");
            } else {
                info!("  📊 Word-position extraction not available — using model text parsing");
            }

            info!("  🏦 Extracting account info...");
            account_info = account::extract_account_info(model, &first_two_pages).await;

            info!("  💳 Extracting transactions via model...");
            let cleaned: Vec<(u32, String)> = pages
                .iter()
                .map(|(n, t)| (*n, banks::clean_page_text(t, &bank)))
                .collect();
            let batches = assist::batch_pages(&cleaned, 3, 0);
            info!("  💳 Processing {} batches...", batches.len());
            all_transactions = assist::extract_transactions_via_model(model, &batches).await;
            info!("  💳 Raw transactions extracted: {}", all_transactions.len());
            pages_processed = batches.len();
        }
    }

    // The structural bank detection outranks the model's guess.
    if bank != "unknown" && account_info.bank.as_deref() != Some(bank.as_str()) {
        if let Some(model_bank) = &account_info.bank {
            info!("  🏦 Overriding model bank '{model_bank}' with detected '{bank}'");
        }
        account_info.bank = Some(bank.clone());
    }

    // ── Canonical post-processing ────────────────────────────────────────
    let all_transactions = dedup::deduplicate_transactions(all_transactions);
    info!("  💳 After dedup: {} transactions", all_transactions.len());

    info!("  🔗 Validating balance chain...");
    let balance_chain = validate::validate_balance_chain(&all_transactions);
    info!(
        "  🔗 Balance chain: {}/{} valid ({}%)",
        balance_chain.valid, balance_chain.total_checked, balance_chain.chain_accuracy_pct
    );

    // Opening/closing boundary rows are not persisted as raw transactions.
    info!("  💾 Storing transactions in database...");
    let records: Vec<RawTransactionRecord> = all_transactions
        .iter()
        .filter(|t| t.is_monetary())
        .map(|t| to_record(t, &document.id, &document.upload_group_id))
        .collect();
    let stored = store.replace_transactions(&document.id, &records).await?;
    info!("  💾 Stored {stored} transactions");

    info!("  📊 Computing metrics...");
    let mut statement_metrics: StatementMetricsRecord =
        metrics::compute_metrics(&all_transactions, &account_info);
    statement_metrics.document_id = document.id.clone();
    statement_metrics.upload_group_id = document.upload_group_id.clone();
    store.replace_statement_metrics(&statement_metrics).await?;

    info!("  🎯 Computing accuracy score...");
    let accuracy =
        validate::compute_accuracy_score(&all_transactions, &statement_metrics, balance_chain);
    info!(
        "  🎯 Extraction accuracy: {}/100 (Grade: {})",
        accuracy.overall_score, accuracy.grade
    );

    // Refresh the group aggregate with this statement's numbers.
    let group_metrics = store.statement_metrics_for_group(&document.upload_group_id).await?;
    let group_txns = store.all_transactions_for_group(&document.upload_group_id).await?;
    if let Some(agg) = metrics::compute_aggregated_metrics(
        &document.upload_group_id,
        &group_metrics,
        &group_txns,
    ) {
        store.replace_aggregated_metrics(&agg).await?;
        info!("  💾 Updated aggregated metrics for group {}", document.upload_group_id);
    }

    let mut summary_parts = vec![
        format!("Bank: {}", account_info.bank.as_deref().unwrap_or("Unknown")),
        format!("Account: {}", account_info.account_number.as_deref().unwrap_or("Unknown")),
        format!("Holder: {}", account_info.account_holder.as_deref().unwrap_or("Unknown")),
        format!("Period: {}", account_info.statement_period.as_deref().unwrap_or("Unknown")),
        format!("Transactions: {}", all_transactions.len()),
        format!(
            "Opening: {}",
            statement_metrics
                .opening_balance
                .map(|b| format!("{b:.2}"))
                .unwrap_or_else(|| "N/A".to_string())
        ),
        format!(
            "Closing: {}",
            statement_metrics
                .closing_balance
                .map(|b| format!("{b:.2}"))
                .unwrap_or_else(|| "N/A".to_string())
        ),
        format!("Total Credits: {:.2}", statement_metrics.total_amount_of_credit_transactions),
        format!("Total Debits: {:.2}", statement_metrics.total_amount_of_debit_transactions),
        format!("Method: {extraction_method}"),
        format!("Accuracy: {}/100 ({})", accuracy.overall_score, accuracy.grade),
    ];
    if let Some(breakdown) = &statement_metrics.currency_breakdown {
        if let Some(map) = breakdown.as_object() {
            let currencies: Vec<&str> = map.keys().map(String::as_str).collect();
            summary_parts.push(format!("Currencies: {}", currencies.join(", ")));
        }
    }

    let results = json!({
        "account_info": account_info,
        "metrics": serde_json::to_value(&statement_metrics)?,
        "transaction_count": all_transactions.len(),
        "pages_processed": pages_processed,
        "extraction_method": extraction_method,
        "accuracy": serde_json::to_value(&accuracy)?,
    });

    Ok(AgentOutcome::low(results, summary_parts.join(" | ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_conversion_fills_derived_fields() {
        let txn = Txn {
            transaction_date: "01 DEC".to_string(),
            value_date: "02 DEC".to_string(),
            description: "FAST PAYMENT | ATM WITHDRAWAL GELMAX".to_string(),
            withdrawal: Some(1943.69),
            balance: Some(127543.16),
            txn_type: TxnType::Debit,
            channel: "FAST".to_string(),
            counterparty: Some("GELMAX".to_string()),
            page_number: Some(2),
            ..Txn::default()
        };
        let rec = to_record(&txn, "d1", "g1");
        assert_eq!(rec.date, "02 DEC");
        assert_eq!(rec.transaction_type, "debit");
        assert_eq!(rec.amount, Some(1943.69));
        assert!(rec.is_cash); // ATM in description
        assert_eq!(rec.currency, "SGD");
        assert!(rec.raw_text.unwrap().contains("127543.16"));
    }

    #[test]
    fn amount_prefers_withdrawal_then_deposit() {
        let mut t = Txn::default();
        assert_eq!(t.amount(), None);
        t.deposit = Some(5.0);
        assert_eq!(t.amount(), Some(5.0));
        t.withdrawal = Some(7.0);
        assert_eq!(t.amount(), Some(7.0));
    }
}
