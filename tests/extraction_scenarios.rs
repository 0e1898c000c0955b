//! End-to-end extraction and analysis scenarios over fixture snapshots and a
//! temp-file store, with the model client disabled so every fallback path is
//! the one under test.

use chrono::Utc;
use ledgerlens_backend::agents::{fraud, insights};
use ledgerlens_backend::extraction::account::AccountInfo;
use ledgerlens_backend::extraction::{
    dedup::deduplicate_transactions,
    metrics::compute_metrics,
    tables::try_extract_tables,
    validate::{compute_accuracy_score, validate_balance_chain},
    words::try_extract_words,
    to_record, Txn, TxnType,
};
use ledgerlens_backend::llm::ModelClient;
use ledgerlens_backend::models::{AgentType, DocumentRecord, DocumentStatus};
use ledgerlens_backend::pdf::{DocumentSnapshot, PageSnapshot, Table, WordBox};
use ledgerlens_backend::store::AnalysisStore;
use tempfile::NamedTempFile;

// ── fixture builders ─────────────────────────────────────────────────────────

fn word(x0: f64, x1: f64, top: f64, text: &str) -> WordBox {
    WordBox {
        x0,
        x1,
        top,
        bottom: top + 10.0,
        text: text.to_string(),
    }
}

/// Borderless statement page: six-column header plus
/// `(date, value_date, description, withdrawal, deposit, balance)` rows at
/// fixed column positions.
fn borderless_page(number: u32, rows: &[(&str, &str, &str, &str, &str, &str)]) -> PageSnapshot {
    let mut words = vec![
        word(70.0, 92.0, 150.0, "Date"),
        word(130.0, 180.0, 150.0, "Value Date"),
        word(280.0, 340.0, 150.0, "Description"),
        word(360.0, 420.0, 150.0, "Withdrawal"),
        word(430.0, 475.0, 150.0, "Deposit"),
        word(500.0, 545.0, 150.0, "Balance"),
    ];
    let mut text = String::from("Date Value Date Description Withdrawal Deposit Balance\n");

    for (i, (date, value, desc, wd, dep, bal)) in rows.iter().enumerate() {
        let y = 200.0 + i as f64 * 20.0;
        for (x0, x1, cell) in [
            (70.0, 110.0, *date),
            (130.0, 170.0, *value),
            (280.0, 345.0, *desc),
            (360.0, 410.0, *wd),
            (430.0, 475.0, *dep),
            (500.0, 555.0, *bal),
        ] {
            if !cell.is_empty() {
                words.push(word(x0, x1, y, cell));
            }
        }
        text.push_str(&format!("{date} {value} {desc} {wd} {dep} {bal}\n"));
    }

    PageSnapshot {
        number,
        width: 612.0,
        height: 792.0,
        text,
        words,
        ..Default::default()
    }
}

fn snapshot_with_pages(pages: Vec<PageSnapshot>) -> DocumentSnapshot {
    DocumentSnapshot {
        page_count: pages.len(),
        pages,
        ..Default::default()
    }
}

fn test_store() -> (AnalysisStore, NamedTempFile) {
    let file = NamedTempFile::new().unwrap();
    let store = AnalysisStore::new(file.path().to_str().unwrap()).unwrap();
    (store, file)
}

fn test_document(id: &str, group: &str) -> DocumentRecord {
    DocumentRecord {
        id: id.to_string(),
        user_id: Some("u1".to_string()),
        filename: format!("{id}.pdf"),
        original_filename: format!("{id}.pdf"),
        file_path: format!("/tmp/{id}.pdf"),
        file_size: Some(1024),
        page_count: Some(2),
        status: DocumentStatus::Processing,
        upload_group_id: group.to_string(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

// ── OCBC-style borderless PDF ────────────────────────────────────────────

#[test]
fn s1_borderless_statement_goes_through_word_tier() {
    let snapshot = snapshot_with_pages(vec![
        borderless_page(1, &[]),
        borderless_page(
            2,
            &[("01 DEC", "01 DEC", "FAST PAYMENT OTHR GELMAX", "1943.69", "", "127543.16")],
        ),
    ]);

    // Tier A declines: no grid tables anywhere.
    assert!(try_extract_tables(&snapshot).is_none());

    // Tier B extracts the single debit with channel + counterparty.
    let result = try_extract_words(&snapshot).expect("word tier should accept this layout");
    assert_eq!(result.transactions.len(), 1);
    let t = &result.transactions[0];
    assert_eq!(t.transaction_date, "01 DEC");
    assert_eq!(t.txn_type, TxnType::Debit);
    assert_eq!(t.withdrawal, Some(1943.69));
    assert_eq!(t.balance, Some(127543.16));
    assert_eq!(t.channel, "FAST");
    assert_eq!(t.counterparty.as_deref(), Some("GELMAX"));
    assert_eq!(t.page_number, Some(2));
}

// ── DBS-style bordered multi-line ────────────────────────────────────────

#[test]
fn s2_bordered_multi_line_row_goes_through_table_tier() {
    let table: Table = vec![
        vec![
            "Date".into(),
            "Value Date".into(),
            "Transaction Details".into(),
            "Debit".into(),
            "Credit".into(),
            "Running Balance".into(),
        ],
        vec![
            "01-Sep-2025".into(),
            "01-Sep-2025".into(),
            "FAST PAYMENT\nEBGPP50901371025\nSUPPLIER PAYMENT".into(),
            "394.71".into(),
            "".into(),
            "84,255.32".into(),
        ],
    ];
    let mut page = PageSnapshot {
        number: 1,
        width: 612.0,
        height: 792.0,
        tables: vec![table],
        ..Default::default()
    };
    page.text = "Date Value Date Transaction Details Debit Credit Running Balance".to_string();

    let result = try_extract_tables(&snapshot_with_pages(vec![page])).unwrap();
    assert_eq!(result.transactions.len(), 1);
    let t = &result.transactions[0];
    assert_eq!(t.transaction_date, "01 SEP");
    assert_eq!(t.txn_type, TxnType::Debit);
    assert_eq!(t.withdrawal, Some(394.71));
    assert_eq!(t.balance, Some(84255.32));
    assert!(t.description.contains("FAST PAYMENT"));
    assert!(t.description.contains("EBGPP50901371025"));
    assert!(t.description.contains("SUPPLIER PAYMENT"));
}

// ── reverse-chronological statement ──────────────────────────────────────

#[test]
fn s3_reverse_chronological_statement_reverses_and_scores_a_plus() {
    // Newest-first: 20 rows, each a 100.00 debit stepping the balance down
    // in true chronological order.
    let mut rows: Vec<(String, String, String, String, String, String)> = Vec::new();
    for i in (0..20).rev() {
        let day = i + 2;
        let balance = 10_000.0 - (i as f64 + 1.0) * 100.0;
        rows.push((
            format!("{day:02} NOV"),
            format!("{day:02} NOV"),
            format!("PAYNOW PAYMENT {i}"),
            "100.00".to_string(),
            String::new(),
            format!("{balance:.2}"),
        ));
    }
    let row_refs: Vec<(&str, &str, &str, &str, &str, &str)> = rows
        .iter()
        .map(|(a, b, c, d, e, f)| {
            (a.as_str(), b.as_str(), c.as_str(), d.as_str(), e.as_str(), f.as_str())
        })
        .collect();

    let snapshot = snapshot_with_pages(vec![borderless_page(1, &row_refs)]);
    let result = try_extract_words(&snapshot).unwrap();
    assert_eq!(result.transactions.len(), 20);

    // Reversed into forward order: dates ascending.
    assert_eq!(result.transactions[0].transaction_date, "02 NOV");
    assert_eq!(result.transactions[19].transaction_date, "21 NOV");

    let chain = validate_balance_chain(&result.transactions);
    assert_eq!(chain.chain_accuracy_pct, 100.0);
    assert_eq!(chain.total_checked, 19);

    let metrics = compute_metrics(&result.transactions, &AccountInfo::default());
    let accuracy = compute_accuracy_score(&result.transactions, &metrics, chain);
    assert_eq!(accuracy.grade, "A+");
}

// ── duplicate overlap across batches ─────────────────────────────────────

#[test]
fn s4_fuzzy_dedup_removes_batch_overlap() {
    let base = Txn {
        transaction_date: "15 NOV".to_string(),
        value_date: "15 NOV".to_string(),
        description: "FAST PAYMENT GELMAX PTE LTD".to_string(),
        withdrawal: Some(250.0),
        balance: Some(12_345.67),
        txn_type: TxnType::Debit,
        ..Txn::default()
    };
    let mut overlap = base.clone();
    overlap.description = "FAST PAYMENT GELMAX".to_string(); // re-worded by the second batch

    let out = deduplicate_transactions(vec![base.clone(), overlap]);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].description, base.description);

    // De-duplication is idempotent.
    let again = deduplicate_transactions(out.clone());
    assert_eq!(again, out);
}

// ── universal properties over a realistic statement ──────────────────────────

fn realistic_statement() -> Vec<Txn> {
    let mut txns = vec![Txn {
        transaction_date: "01 DEC".to_string(),
        value_date: "01 DEC".to_string(),
        description: "BALANCE B/F".to_string(),
        balance: Some(50_000.0),
        txn_type: TxnType::OpeningBalance,
        ..Txn::default()
    }];

    let mut balance = 50_000.0;
    for day in 2..=20 {
        let (ttype, amount) = if day % 5 == 0 {
            (TxnType::Credit, 2_000.0 + day as f64)
        } else {
            (TxnType::Debit, 300.0 + day as f64)
        };
        balance = match ttype {
            TxnType::Credit => balance + amount,
            _ => balance - amount,
        };
        balance = (balance * 100.0).round() / 100.0;
        txns.push(Txn {
            transaction_date: format!("{day:02} DEC"),
            value_date: format!("{day:02} DEC"),
            description: if ttype == TxnType::Credit {
                format!("GIRO COLLECTION CUSTOMER {day}")
            } else {
                format!("FAST PAYMENT SUPPLIER {day}")
            },
            withdrawal: (ttype == TxnType::Debit).then_some(amount),
            deposit: (ttype == TxnType::Credit).then_some(amount),
            balance: Some(balance),
            txn_type: ttype,
            channel: "FAST".to_string(),
            counterparty: Some(format!("PARTY {day}")),
            ..Txn::default()
        });
    }

    txns.push(Txn {
        transaction_date: "20 DEC".to_string(),
        value_date: "20 DEC".to_string(),
        description: "BALANCE C/F".to_string(),
        balance: Some(balance),
        txn_type: TxnType::ClosingBalance,
        ..Txn::default()
    });
    txns
}

#[test]
fn chain_soundness_and_metric_identity() {
    let txns = realistic_statement();
    let chain = validate_balance_chain(&txns);

    // Property 1: accuracy percentage is valid/checked.
    let expected_pct = (chain.valid as f64 / chain.total_checked as f64 * 1000.0).round() / 10.0;
    assert_eq!(chain.chain_accuracy_pct, expected_pct);
    assert_eq!(chain.chain_accuracy_pct, 100.0);

    // Property 3: credit + debit counts match the metric totals.
    let metrics = compute_metrics(&txns, &AccountInfo::default());
    let credits = txns.iter().filter(|t| t.txn_type == TxnType::Credit).count() as i64;
    let debits = txns.iter().filter(|t| t.txn_type == TxnType::Debit).count() as i64;
    assert_eq!(metrics.total_no_of_credit_transactions, credits);
    assert_eq!(metrics.total_no_of_debit_transactions, debits);

    // Property 4: single-currency accounting equation at 100% chain.
    let opening = metrics.opening_balance.unwrap();
    let closing = metrics.closing_balance.unwrap();
    let lhs = opening + metrics.total_amount_of_credit_transactions
        - metrics.total_amount_of_debit_transactions;
    assert!((lhs - closing).abs() <= 0.02 * closing.abs().max(1.0));
}

// ── persistence + downstream agents with the model disabled ─────────────────

#[tokio::test]
async fn full_pipeline_persists_and_downstream_agents_degrade_gracefully() {
    let (store, _f) = test_store();
    let model = ModelClient::disabled(reqwest::Client::new());
    let doc = test_document("d1", "g1");
    store.insert_documents(&[doc.clone()]).await.unwrap();

    // Extraction core (tiers already unit-tested): persist a realistic set.
    let txns = realistic_statement();
    let records: Vec<_> = txns
        .iter()
        .filter(|t| t.is_monetary())
        .map(|t| to_record(t, &doc.id, &doc.upload_group_id))
        .collect();
    let stored = store.replace_transactions(&doc.id, &records).await.unwrap();
    assert_eq!(stored, 19);

    let mut metrics = compute_metrics(&txns, &AccountInfo::default());
    metrics.document_id = doc.id.clone();
    metrics.upload_group_id = doc.upload_group_id.clone();
    store.replace_statement_metrics(&metrics).await.unwrap();

    // Opening/closing markers are never persisted as raw transactions.
    let persisted = store.all_transactions_for_document(&doc.id).await.unwrap();
    assert!(persisted.iter().all(|t| t.transaction_type == "credit" || t.transaction_type == "debit"));

    // Fraud completes on rule checks; the model check degrades to warning.
    let fraud_outcome = fraud::analyse(&doc.id, &store, &model).await.unwrap();
    let checks = fraud_outcome.results["checks"].as_array().unwrap();
    assert_eq!(checks.len(), 8);
    let cp_check = checks.last().unwrap();
    assert_eq!(cp_check["status"], "warning");

    // Insights completes with the empty-narrative fallback.
    let insights_outcome = insights::analyse(&doc.id, &store, &model).await.unwrap();
    assert!(insights_outcome.results["narrative"]["executive_summary"]
        .as_str()
        .unwrap()
        .contains("Narrative generation failed"));
    assert!(insights_outcome.results["business_health"]["score"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn zero_transaction_document_still_gets_metrics_and_low_risk_insights() {
    let (store, _f) = test_store();
    let model = ModelClient::disabled(reqwest::Client::new());
    let doc = test_document("d1", "g1");
    store.insert_documents(&[doc.clone()]).await.unwrap();

    let mut metrics = compute_metrics(&[], &AccountInfo::default());
    metrics.document_id = doc.id.clone();
    metrics.upload_group_id = doc.upload_group_id.clone();
    store.replace_statement_metrics(&metrics).await.unwrap();

    let saved = store.statement_metrics(&doc.id).await.unwrap().unwrap();
    assert_eq!(saved.total_no_of_credit_transactions, 0);
    assert_eq!(saved.opening_balance, None);

    let fraud_outcome = fraud::analyse(&doc.id, &store, &model).await.unwrap();
    assert_eq!(fraud_outcome.risk_level, "low");
    assert!(fraud_outcome.summary.contains("No transactions"));

    let insights_outcome = insights::analyse(&doc.id, &store, &model).await.unwrap();
    assert_eq!(insights_outcome.risk_level, "low");
    assert!(insights_outcome.summary.contains("No transaction data"));
}

// ── property 6: at-most-once agent execution under racing triggers ──────────

#[tokio::test]
async fn concurrent_triggers_claim_each_agent_exactly_once() {
    let (store, _f) = test_store();
    store.insert_documents(&[test_document("d1", "g1")]).await.unwrap();
    store.seed_agent_results("d1", "g1").await.unwrap();

    for agent in AgentType::ALL {
        let s1 = store.clone();
        let s2 = store.clone();
        let (a, b) = tokio::join!(
            async move { s1.try_begin_agent("d1", "g1", agent).await.unwrap() },
            async move { s2.try_begin_agent("d1", "g1", agent).await.unwrap() },
        );
        assert!(a ^ b, "exactly one trigger may win the {agent:?} gate");

        store
            .complete_agent("d1", agent, &serde_json::json!({}), "done", "low")
            .await
            .unwrap();
        // Any later trigger observes Completed and declines.
        assert!(!store.try_begin_agent("d1", "g1", agent).await.unwrap());
    }

    let results = store.agent_results_for_document("d1").await.unwrap();
    assert_eq!(results.len(), 5);
}
