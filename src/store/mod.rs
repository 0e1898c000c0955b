//! SQLite-backed analysis store.
//!
//! Single shared connection behind a tokio mutex; WAL mode so API reads do
//! not block pipeline writes. Agent status transitions go through this
//! connection, which is what serialises the at-most-once gate when two
//! pipeline triggers race.

use crate::models::{
    AgentResultRecord, AgentStatus, AgentType, AggregatedMetricsRecord, DocumentRecord,
    DocumentStatus, GroupAgentResultRecord, RawTransactionRecord, StatementMetricsRecord,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Clone)]
pub struct AnalysisStore {
    conn: Arc<Mutex<Connection>>,
}

fn now_str() -> String {
    Utc::now().to_rfc3339()
}

fn parse_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn parse_json(raw: Option<String>) -> Option<Value> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

fn json_str(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

impl AnalysisStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open analysis db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                filename TEXT NOT NULL,
                original_filename TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_size INTEGER,
                page_count INTEGER,
                status TEXT NOT NULL DEFAULT 'uploaded',
                upload_group_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_group ON documents(upload_group_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_user ON documents(user_id, created_at DESC)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS raw_transactions (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                upload_group_id TEXT NOT NULL,
                date TEXT,
                description TEXT,
                transaction_type TEXT,
                amount REAL,
                balance REAL,
                reference TEXT,
                category TEXT,
                counterparty TEXT,
                channel TEXT,
                is_cash INTEGER NOT NULL DEFAULT 0,
                is_cheque INTEGER NOT NULL DEFAULT 0,
                currency TEXT NOT NULL DEFAULT 'SGD',
                page_number INTEGER,
                raw_text TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_txn_document ON raw_transactions(document_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_txn_group ON raw_transactions(upload_group_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS statement_metrics (
                document_id TEXT PRIMARY KEY,
                upload_group_id TEXT NOT NULL,
                account_holder TEXT,
                bank TEXT,
                account_number TEXT,
                currency TEXT NOT NULL DEFAULT 'SGD',
                statement_period TEXT,
                opening_balance REAL,
                closing_balance REAL,
                max_eod_balance REAL,
                min_eod_balance REAL,
                avg_eod_balance REAL,
                total_no_of_credit_transactions INTEGER NOT NULL DEFAULT 0,
                total_amount_of_credit_transactions REAL NOT NULL DEFAULT 0,
                total_no_of_debit_transactions INTEGER NOT NULL DEFAULT 0,
                total_amount_of_debit_transactions REAL NOT NULL DEFAULT 0,
                average_deposit REAL NOT NULL DEFAULT 0,
                average_withdrawal REAL NOT NULL DEFAULT 0,
                max_debit_transaction REAL NOT NULL DEFAULT 0,
                min_debit_transaction REAL NOT NULL DEFAULT 0,
                max_credit_transaction REAL NOT NULL DEFAULT 0,
                min_credit_transaction REAL NOT NULL DEFAULT 0,
                total_no_of_cash_deposits INTEGER NOT NULL DEFAULT 0,
                total_amount_of_cash_deposits REAL NOT NULL DEFAULT 0,
                total_no_of_cash_withdrawals INTEGER NOT NULL DEFAULT 0,
                total_amount_of_cash_withdrawals REAL NOT NULL DEFAULT 0,
                total_no_of_cheque_withdrawals INTEGER NOT NULL DEFAULT 0,
                total_amount_of_cheque_withdrawals REAL NOT NULL DEFAULT 0,
                total_fees_charged REAL NOT NULL DEFAULT 0,
                currency_breakdown TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_metrics_group ON statement_metrics(upload_group_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS aggregated_metrics (
                upload_group_id TEXT PRIMARY KEY,
                account_holder TEXT,
                bank TEXT,
                account_number TEXT,
                currency TEXT NOT NULL DEFAULT 'SGD',
                total_statements INTEGER NOT NULL DEFAULT 0,
                period_covered TEXT,
                overall_max_eod_balance REAL,
                overall_min_eod_balance REAL,
                overall_avg_eod_balance REAL,
                avg_opening_balance REAL,
                avg_closing_balance REAL,
                total_credit_transactions INTEGER NOT NULL DEFAULT 0,
                total_credit_amount REAL NOT NULL DEFAULT 0,
                total_debit_transactions INTEGER NOT NULL DEFAULT 0,
                total_debit_amount REAL NOT NULL DEFAULT 0,
                overall_avg_deposit REAL NOT NULL DEFAULT 0,
                overall_avg_withdrawal REAL NOT NULL DEFAULT 0,
                overall_max_debit REAL NOT NULL DEFAULT 0,
                overall_max_credit REAL NOT NULL DEFAULT 0,
                total_cash_deposits INTEGER NOT NULL DEFAULT 0,
                total_cash_deposit_amount REAL NOT NULL DEFAULT 0,
                total_cash_withdrawals INTEGER NOT NULL DEFAULT 0,
                total_cash_withdrawal_amount REAL NOT NULL DEFAULT 0,
                total_cheque_withdrawals INTEGER NOT NULL DEFAULT 0,
                total_cheque_withdrawal_amount REAL NOT NULL DEFAULT 0,
                total_fees REAL NOT NULL DEFAULT 0,
                monthly_credit_totals TEXT,
                monthly_debit_totals TEXT,
                monthly_balances TEXT,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS agent_results (
                document_id TEXT NOT NULL,
                upload_group_id TEXT NOT NULL,
                agent_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                results TEXT,
                summary TEXT,
                risk_level TEXT,
                started_at TEXT,
                completed_at TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL,
                PRIMARY KEY (document_id, agent_type)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_agent_results_group ON agent_results(upload_group_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS group_agent_results (
                upload_group_id TEXT NOT NULL,
                agent_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                results TEXT,
                summary TEXT,
                risk_level TEXT,
                started_at TEXT,
                completed_at TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL,
                PRIMARY KEY (upload_group_id, agent_type)
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ── documents ────────────────────────────────────────────────────────────

    pub async fn insert_documents(&self, docs: &[DocumentRecord]) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for doc in docs {
            tx.execute(
                "INSERT INTO documents
                 (id, user_id, filename, original_filename, file_path, file_size, page_count,
                  status, upload_group_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    doc.id,
                    doc.user_id,
                    doc.filename,
                    doc.original_filename,
                    doc.file_path,
                    doc.file_size,
                    doc.page_count,
                    doc.status.as_str(),
                    doc.upload_group_id,
                    doc.created_at.to_rfc3339(),
                    doc.updated_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn row_to_document(row: &Row<'_>) -> rusqlite::Result<DocumentRecord> {
        Ok(DocumentRecord {
            id: row.get(0)?,
            user_id: row.get(1)?,
            filename: row.get(2)?,
            original_filename: row.get(3)?,
            file_path: row.get(4)?,
            file_size: row.get(5)?,
            page_count: row.get(6)?,
            status: DocumentStatus::from_str(&row.get::<_, String>(7)?),
            upload_group_id: row.get(8)?,
            created_at: parse_ts(row.get(9)?).unwrap_or_else(Utc::now),
            updated_at: parse_ts(row.get(10)?).unwrap_or_else(Utc::now),
        })
    }

    const DOCUMENT_COLS: &'static str = "id, user_id, filename, original_filename, file_path, \
         file_size, page_count, status, upload_group_id, created_at, updated_at";

    pub async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {} FROM documents WHERE id = ?1", Self::DOCUMENT_COLS);
        let mut stmt = conn.prepare_cached(&sql)?;
        Ok(stmt.query_row(params![id], Self::row_to_document).optional()?)
    }

    pub async fn list_documents(&self, user_id: &str) -> Result<Vec<DocumentRecord>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM documents WHERE user_id = ?1 ORDER BY created_at DESC",
            Self::DOCUMENT_COLS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![user_id], Self::row_to_document)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn group_documents(&self, group_id: &str) -> Result<Vec<DocumentRecord>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM documents WHERE upload_group_id = ?1 ORDER BY created_at ASC",
            Self::DOCUMENT_COLS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![group_id], Self::row_to_document)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn list_groups(&self, user_id: &str) -> Result<Vec<(String, String, i64)>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT upload_group_id, MIN(created_at), COUNT(*)
             FROM documents WHERE user_id = ?1
             GROUP BY upload_group_id ORDER BY MIN(created_at) DESC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn set_document_status(&self, id: &str, status: DocumentStatus) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE documents SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now_str(), id],
        )?;
        Ok(())
    }

    /// Delete a document and everything derived from it atomically.
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM raw_transactions WHERE document_id = ?1", params![id])?;
        tx.execute("DELETE FROM statement_metrics WHERE document_id = ?1", params![id])?;
        tx.execute("DELETE FROM agent_results WHERE document_id = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    // ── transactions ─────────────────────────────────────────────────────────

    pub async fn replace_transactions(
        &self,
        document_id: &str,
        records: &[RawTransactionRecord],
    ) -> Result<usize> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM raw_transactions WHERE document_id = ?1",
            params![document_id],
        )?;
        let mut stored = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO raw_transactions
                 (id, document_id, upload_group_id, date, description, transaction_type,
                  amount, balance, reference, category, counterparty, channel,
                  is_cash, is_cheque, currency, page_number, raw_text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            )?;
            for rec in records {
                stmt.execute(params![
                    rec.id,
                    rec.document_id,
                    rec.upload_group_id,
                    rec.date,
                    rec.description,
                    rec.transaction_type,
                    rec.amount,
                    rec.balance,
                    rec.reference,
                    rec.category,
                    rec.counterparty,
                    rec.channel,
                    rec.is_cash as i64,
                    rec.is_cheque as i64,
                    rec.currency,
                    rec.page_number,
                    rec.raw_text,
                    now_str(),
                ])?;
                stored += 1;
            }
        }
        tx.commit()?;
        Ok(stored)
    }

    fn row_to_transaction(row: &Row<'_>) -> rusqlite::Result<RawTransactionRecord> {
        Ok(RawTransactionRecord {
            id: row.get(0)?,
            document_id: row.get(1)?,
            upload_group_id: row.get(2)?,
            date: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            description: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            transaction_type: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            amount: row.get(6)?,
            balance: row.get(7)?,
            reference: row.get(8)?,
            category: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
            counterparty: row.get(10)?,
            channel: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
            is_cash: row.get::<_, i64>(12)? != 0,
            is_cheque: row.get::<_, i64>(13)? != 0,
            currency: row.get(14)?,
            page_number: row.get(15)?,
            raw_text: row.get(16)?,
        })
    }

    const TXN_COLS: &'static str = "id, document_id, upload_group_id, date, description, \
         transaction_type, amount, balance, reference, category, counterparty, channel, \
         is_cash, is_cheque, currency, page_number, raw_text";

    pub async fn transactions_for_document(
        &self,
        document_id: &str,
        transaction_type: Option<&str>,
        category: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(i64, Vec<RawTransactionRecord>)> {
        let conn = self.conn.lock().await;

        let mut where_sql = String::from("document_id = ?1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(document_id.to_string())];
        if let Some(t) = transaction_type {
            args.push(Box::new(t.to_string()));
            where_sql.push_str(&format!(" AND transaction_type = ?{}", args.len()));
        }
        if let Some(c) = category {
            args.push(Box::new(c.to_string()));
            where_sql.push_str(&format!(" AND category = ?{}", args.len()));
        }

        let count_sql = format!("SELECT COUNT(*) FROM raw_transactions WHERE {where_sql}");
        let total: i64 = conn.query_row(
            &count_sql,
            params_from_iter(args.iter().map(|a| a.as_ref())),
            |row| row.get(0),
        )?;

        args.push(Box::new(limit));
        let limit_idx = args.len();
        args.push(Box::new(offset));
        let offset_idx = args.len();
        let sql = format!(
            "SELECT {} FROM raw_transactions WHERE {where_sql} \
             ORDER BY rowid ASC LIMIT ?{limit_idx} OFFSET ?{offset_idx}",
            Self::TXN_COLS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(args.iter().map(|a| a.as_ref())),
            Self::row_to_transaction,
        )?;
        Ok((total, rows.collect::<rusqlite::Result<Vec<_>>>()?))
    }

    pub async fn all_transactions_for_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<RawTransactionRecord>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM raw_transactions WHERE document_id = ?1 ORDER BY rowid ASC",
            Self::TXN_COLS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![document_id], Self::row_to_transaction)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn all_transactions_for_group(
        &self,
        group_id: &str,
    ) -> Result<Vec<RawTransactionRecord>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM raw_transactions WHERE upload_group_id = ?1 ORDER BY rowid ASC",
            Self::TXN_COLS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![group_id], Self::row_to_transaction)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ── statement + aggregated metrics ───────────────────────────────────────

    pub async fn replace_statement_metrics(&self, m: &StatementMetricsRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO statement_metrics
             (document_id, upload_group_id, account_holder, bank, account_number, currency,
              statement_period, opening_balance, closing_balance, max_eod_balance,
              min_eod_balance, avg_eod_balance,
              total_no_of_credit_transactions, total_amount_of_credit_transactions,
              total_no_of_debit_transactions, total_amount_of_debit_transactions,
              average_deposit, average_withdrawal,
              max_debit_transaction, min_debit_transaction,
              max_credit_transaction, min_credit_transaction,
              total_no_of_cash_deposits, total_amount_of_cash_deposits,
              total_no_of_cash_withdrawals, total_amount_of_cash_withdrawals,
              total_no_of_cheque_withdrawals, total_amount_of_cheque_withdrawals,
              total_fees_charged, currency_breakdown, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31)",
            params![
                m.document_id,
                m.upload_group_id,
                m.account_holder,
                m.bank,
                m.account_number,
                m.currency,
                m.statement_period,
                m.opening_balance,
                m.closing_balance,
                m.max_eod_balance,
                m.min_eod_balance,
                m.avg_eod_balance,
                m.total_no_of_credit_transactions,
                m.total_amount_of_credit_transactions,
                m.total_no_of_debit_transactions,
                m.total_amount_of_debit_transactions,
                m.average_deposit,
                m.average_withdrawal,
                m.max_debit_transaction,
                m.min_debit_transaction,
                m.max_credit_transaction,
                m.min_credit_transaction,
                m.total_no_of_cash_deposits,
                m.total_amount_of_cash_deposits,
                m.total_no_of_cash_withdrawals,
                m.total_amount_of_cash_withdrawals,
                m.total_no_of_cheque_withdrawals,
                m.total_amount_of_cheque_withdrawals,
                m.total_fees_charged,
                m.currency_breakdown.as_ref().map(json_str),
                now_str(),
            ],
        )?;
        Ok(())
    }

    fn row_to_metrics(row: &Row<'_>) -> rusqlite::Result<StatementMetricsRecord> {
        Ok(StatementMetricsRecord {
            document_id: row.get(0)?,
            upload_group_id: row.get(1)?,
            account_holder: row.get(2)?,
            bank: row.get(3)?,
            account_number: row.get(4)?,
            currency: row.get(5)?,
            statement_period: row.get(6)?,
            opening_balance: row.get(7)?,
            closing_balance: row.get(8)?,
            max_eod_balance: row.get(9)?,
            min_eod_balance: row.get(10)?,
            avg_eod_balance: row.get(11)?,
            total_no_of_credit_transactions: row.get(12)?,
            total_amount_of_credit_transactions: row.get(13)?,
            total_no_of_debit_transactions: row.get(14)?,
            total_amount_of_debit_transactions: row.get(15)?,
            average_deposit: row.get(16)?,
            average_withdrawal: row.get(17)?,
            max_debit_transaction: row.get(18)?,
            min_debit_transaction: row.get(19)?,
            max_credit_transaction: row.get(20)?,
            min_credit_transaction: row.get(21)?,
            total_no_of_cash_deposits: row.get(22)?,
            total_amount_of_cash_deposits: row.get(23)?,
            total_no_of_cash_withdrawals: row.get(24)?,
            total_amount_of_cash_withdrawals: row.get(25)?,
            total_no_of_cheque_withdrawals: row.get(26)?,
            total_amount_of_cheque_withdrawals: row.get(27)?,
            total_fees_charged: row.get(28)?,
            currency_breakdown: parse_json(row.get(29)?),
        })
    }

    const METRICS_COLS: &'static str = "document_id, upload_group_id, account_holder, bank, \
         account_number, currency, statement_period, opening_balance, closing_balance, \
         max_eod_balance, min_eod_balance, avg_eod_balance, \
         total_no_of_credit_transactions, total_amount_of_credit_transactions, \
         total_no_of_debit_transactions, total_amount_of_debit_transactions, \
         average_deposit, average_withdrawal, max_debit_transaction, min_debit_transaction, \
         max_credit_transaction, min_credit_transaction, \
         total_no_of_cash_deposits, total_amount_of_cash_deposits, \
         total_no_of_cash_withdrawals, total_amount_of_cash_withdrawals, \
         total_no_of_cheque_withdrawals, total_amount_of_cheque_withdrawals, \
         total_fees_charged, currency_breakdown";

    pub async fn statement_metrics(&self, document_id: &str) -> Result<Option<StatementMetricsRecord>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM statement_metrics WHERE document_id = ?1",
            Self::METRICS_COLS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        Ok(stmt.query_row(params![document_id], Self::row_to_metrics).optional()?)
    }

    pub async fn statement_metrics_for_group(
        &self,
        group_id: &str,
    ) -> Result<Vec<StatementMetricsRecord>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM statement_metrics WHERE upload_group_id = ?1 \
             ORDER BY statement_period ASC",
            Self::METRICS_COLS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![group_id], Self::row_to_metrics)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn replace_aggregated_metrics(&self, a: &AggregatedMetricsRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO aggregated_metrics
             (upload_group_id, account_holder, bank, account_number, currency,
              total_statements, period_covered,
              overall_max_eod_balance, overall_min_eod_balance, overall_avg_eod_balance,
              avg_opening_balance, avg_closing_balance,
              total_credit_transactions, total_credit_amount,
              total_debit_transactions, total_debit_amount,
              overall_avg_deposit, overall_avg_withdrawal,
              overall_max_debit, overall_max_credit,
              total_cash_deposits, total_cash_deposit_amount,
              total_cash_withdrawals, total_cash_withdrawal_amount,
              total_cheque_withdrawals, total_cheque_withdrawal_amount,
              total_fees, monthly_credit_totals, monthly_debit_totals, monthly_balances,
              updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31)",
            params![
                a.upload_group_id,
                a.account_holder,
                a.bank,
                a.account_number,
                a.currency,
                a.total_statements,
                a.period_covered,
                a.overall_max_eod_balance,
                a.overall_min_eod_balance,
                a.overall_avg_eod_balance,
                a.avg_opening_balance,
                a.avg_closing_balance,
                a.total_credit_transactions,
                a.total_credit_amount,
                a.total_debit_transactions,
                a.total_debit_amount,
                a.overall_avg_deposit,
                a.overall_avg_withdrawal,
                a.overall_max_debit,
                a.overall_max_credit,
                a.total_cash_deposits,
                a.total_cash_deposit_amount,
                a.total_cash_withdrawals,
                a.total_cash_withdrawal_amount,
                a.total_cheque_withdrawals,
                a.total_cheque_withdrawal_amount,
                a.total_fees,
                json_str(&a.monthly_credit_totals),
                json_str(&a.monthly_debit_totals),
                json_str(&a.monthly_balances),
                now_str(),
            ],
        )?;
        Ok(())
    }

    pub async fn aggregated_metrics(&self, group_id: &str) -> Result<Option<AggregatedMetricsRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT upload_group_id, account_holder, bank, account_number, currency,
                    total_statements, period_covered,
                    overall_max_eod_balance, overall_min_eod_balance, overall_avg_eod_balance,
                    avg_opening_balance, avg_closing_balance,
                    total_credit_transactions, total_credit_amount,
                    total_debit_transactions, total_debit_amount,
                    overall_avg_deposit, overall_avg_withdrawal,
                    overall_max_debit, overall_max_credit,
                    total_cash_deposits, total_cash_deposit_amount,
                    total_cash_withdrawals, total_cash_withdrawal_amount,
                    total_cheque_withdrawals, total_cheque_withdrawal_amount,
                    total_fees, monthly_credit_totals, monthly_debit_totals, monthly_balances
             FROM aggregated_metrics WHERE upload_group_id = ?1",
        )?;
        let rec = stmt
            .query_row(params![group_id], |row| {
                Ok(AggregatedMetricsRecord {
                    upload_group_id: row.get(0)?,
                    account_holder: row.get(1)?,
                    bank: row.get(2)?,
                    account_number: row.get(3)?,
                    currency: row.get(4)?,
                    total_statements: row.get(5)?,
                    period_covered: row.get(6)?,
                    overall_max_eod_balance: row.get(7)?,
                    overall_min_eod_balance: row.get(8)?,
                    overall_avg_eod_balance: row.get(9)?,
                    avg_opening_balance: row.get(10)?,
                    avg_closing_balance: row.get(11)?,
                    total_credit_transactions: row.get(12)?,
                    total_credit_amount: row.get(13)?,
                    total_debit_transactions: row.get(14)?,
                    total_debit_amount: row.get(15)?,
                    overall_avg_deposit: row.get(16)?,
                    overall_avg_withdrawal: row.get(17)?,
                    overall_max_debit: row.get(18)?,
                    overall_max_credit: row.get(19)?,
                    total_cash_deposits: row.get(20)?,
                    total_cash_deposit_amount: row.get(21)?,
                    total_cash_withdrawals: row.get(22)?,
                    total_cash_withdrawal_amount: row.get(23)?,
                    total_cheque_withdrawals: row.get(24)?,
                    total_cheque_withdrawal_amount: row.get(25)?,
                    total_fees: row.get(26)?,
                    monthly_credit_totals: parse_json(row.get(27)?).unwrap_or(Value::Null),
                    monthly_debit_totals: parse_json(row.get(28)?).unwrap_or(Value::Null),
                    monthly_balances: parse_json(row.get(29)?).unwrap_or(Value::Null),
                })
            })
            .optional()?;
        Ok(rec)
    }

    // ── agent results + at-most-once gating ──────────────────────────────────

    /// Seed Pending result rows for every agent type that has none yet.
    pub async fn seed_agent_results(&self, document_id: &str, group_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        for agent in AgentType::ALL {
            conn.execute(
                "INSERT OR IGNORE INTO agent_results
                 (document_id, upload_group_id, agent_type, status, created_at)
                 VALUES (?1, ?2, ?3, 'pending', ?4)",
                params![document_id, group_id, agent.as_str(), now_str()],
            )?;
        }
        Ok(())
    }

    /// Transition `(document, agent)` to Running iff it is Pending, Failed or
    /// absent. Returns false when another run already Completed it or holds
    /// it Running.
    pub async fn try_begin_agent(
        &self,
        document_id: &str,
        group_id: &str,
        agent: AgentType,
    ) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM agent_results WHERE document_id = ?1 AND agent_type = ?2",
                params![document_id, agent.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match status.as_deref() {
            Some("completed") | Some("running") => {
                tx.commit()?;
                return Ok(false);
            }
            _ => {}
        }

        tx.execute(
            "INSERT INTO agent_results
             (document_id, upload_group_id, agent_type, status, started_at, error_message, created_at)
             VALUES (?1, ?2, ?3, 'running', ?4, NULL, ?4)
             ON CONFLICT(document_id, agent_type) DO UPDATE SET
                 status = 'running', started_at = excluded.started_at, error_message = NULL",
            params![document_id, group_id, agent.as_str(), now_str()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    pub async fn complete_agent(
        &self,
        document_id: &str,
        agent: AgentType,
        results: &Value,
        summary: &str,
        risk_level: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE agent_results
             SET status = 'completed', results = ?1, summary = ?2, risk_level = ?3,
                 completed_at = ?4, error_message = NULL
             WHERE document_id = ?5 AND agent_type = ?6",
            params![
                json_str(results),
                summary,
                risk_level,
                now_str(),
                document_id,
                agent.as_str()
            ],
        )?;
        Ok(())
    }

    pub async fn fail_agent(&self, document_id: &str, agent: AgentType, error: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE agent_results
             SET status = 'failed', error_message = ?1, completed_at = ?2
             WHERE document_id = ?3 AND agent_type = ?4",
            params![error, now_str(), document_id, agent.as_str()],
        )?;
        Ok(())
    }

    fn row_to_agent_result(row: &Row<'_>) -> rusqlite::Result<AgentResultRecord> {
        Ok(AgentResultRecord {
            document_id: row.get(0)?,
            upload_group_id: row.get(1)?,
            agent_type: AgentType::from_str(&row.get::<_, String>(2)?).unwrap_or(AgentType::Layout),
            status: AgentStatus::from_str(&row.get::<_, String>(3)?),
            results: parse_json(row.get(4)?),
            summary: row.get(5)?,
            risk_level: row.get(6)?,
            started_at: parse_ts(row.get(7)?),
            completed_at: parse_ts(row.get(8)?),
            error_message: row.get(9)?,
        })
    }

    const AGENT_COLS: &'static str = "document_id, upload_group_id, agent_type, status, results, \
         summary, risk_level, started_at, completed_at, error_message";

    pub async fn agent_result(
        &self,
        document_id: &str,
        agent: AgentType,
    ) -> Result<Option<AgentResultRecord>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM agent_results WHERE document_id = ?1 AND agent_type = ?2",
            Self::AGENT_COLS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        Ok(stmt
            .query_row(params![document_id, agent.as_str()], Self::row_to_agent_result)
            .optional()?)
    }

    pub async fn agent_results_for_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<AgentResultRecord>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM agent_results WHERE document_id = ?1",
            Self::AGENT_COLS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![document_id], Self::row_to_agent_result)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ── group agent results ──────────────────────────────────────────────────

    pub async fn try_begin_group_agent(&self, group_id: &str, agent: AgentType) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM group_agent_results
                 WHERE upload_group_id = ?1 AND agent_type = ?2",
                params![group_id, agent.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match status.as_deref() {
            Some("completed") | Some("running") => {
                tx.commit()?;
                return Ok(false);
            }
            _ => {}
        }

        tx.execute(
            "INSERT INTO group_agent_results
             (upload_group_id, agent_type, status, started_at, error_message, created_at)
             VALUES (?1, ?2, 'running', ?3, NULL, ?3)
             ON CONFLICT(upload_group_id, agent_type) DO UPDATE SET
                 status = 'running', started_at = excluded.started_at, error_message = NULL",
            params![group_id, agent.as_str(), now_str()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    pub async fn complete_group_agent(
        &self,
        group_id: &str,
        agent: AgentType,
        results: &Value,
        summary: &str,
        risk_level: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE group_agent_results
             SET status = 'completed', results = ?1, summary = ?2, risk_level = ?3,
                 completed_at = ?4, error_message = NULL
             WHERE upload_group_id = ?5 AND agent_type = ?6",
            params![
                json_str(results),
                summary,
                risk_level,
                now_str(),
                group_id,
                agent.as_str()
            ],
        )?;
        Ok(())
    }

    pub async fn fail_group_agent(&self, group_id: &str, agent: AgentType, error: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE group_agent_results
             SET status = 'failed', error_message = ?1, completed_at = ?2
             WHERE upload_group_id = ?3 AND agent_type = ?4",
            params![error, now_str(), group_id, agent.as_str()],
        )?;
        Ok(())
    }

    pub async fn group_agent_results(&self, group_id: &str) -> Result<Vec<GroupAgentResultRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT upload_group_id, agent_type, status, results, summary, risk_level,
                    started_at, completed_at, error_message
             FROM group_agent_results WHERE upload_group_id = ?1",
        )?;
        let rows = stmt.query_map(params![group_id], |row| {
            Ok(GroupAgentResultRecord {
                upload_group_id: row.get(0)?,
                agent_type: AgentType::from_str(&row.get::<_, String>(1)?)
                    .unwrap_or(AgentType::Insights),
                status: AgentStatus::from_str(&row.get::<_, String>(2)?),
                results: parse_json(row.get(3)?),
                summary: row.get(4)?,
                risk_level: row.get(5)?,
                started_at: parse_ts(row.get(6)?),
                completed_at: parse_ts(row.get(7)?),
                error_message: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

/// Convenience constructor for a fresh transaction record.
pub fn new_transaction_record(document_id: &str, group_id: &str) -> RawTransactionRecord {
    RawTransactionRecord {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        upload_group_id: group_id.to_string(),
        date: String::new(),
        description: String::new(),
        transaction_type: String::new(),
        amount: None,
        balance: None,
        reference: None,
        category: "other".to_string(),
        counterparty: None,
        channel: String::new(),
        is_cash: false,
        is_cheque: false,
        currency: "SGD".to_string(),
        page_number: None,
        raw_text: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

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
            original_filename: "statement.pdf".to_string(),
            file_path: format!("/tmp/{id}.pdf"),
            file_size: Some(1024),
            page_count: Some(3),
            status: DocumentStatus::Uploaded,
            upload_group_id: group.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn document_round_trip_and_status() {
        let (store, _f) = test_store();
        store
            .insert_documents(&[test_document("d1", "g1")])
            .await
            .unwrap();

        let doc = store.get_document("d1").await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Uploaded);
        assert_eq!(doc.upload_group_id, "g1");

        store
            .set_document_status("d1", DocumentStatus::Processing)
            .await
            .unwrap();
        let doc = store.get_document("d1").await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Processing);
    }

    #[tokio::test]
    async fn agent_gate_is_at_most_once() {
        let (store, _f) = test_store();
        store
            .insert_documents(&[test_document("d1", "g1")])
            .await
            .unwrap();
        store.seed_agent_results("d1", "g1").await.unwrap();

        // First trigger wins the gate.
        assert!(store.try_begin_agent("d1", "g1", AgentType::Layout).await.unwrap());
        // A concurrent second trigger observes Running and declines.
        assert!(!store.try_begin_agent("d1", "g1", AgentType::Layout).await.unwrap());

        store
            .complete_agent("d1", AgentType::Layout, &serde_json::json!({"ok": true}), "done", "low")
            .await
            .unwrap();
        // Re-runs skip a Completed result.
        assert!(!store.try_begin_agent("d1", "g1", AgentType::Layout).await.unwrap());

        let rec = store.agent_result("d1", AgentType::Layout).await.unwrap().unwrap();
        assert_eq!(rec.status, AgentStatus::Completed);
        assert_eq!(rec.risk_level.as_deref(), Some("low"));
    }

    #[tokio::test]
    async fn failed_agent_can_retry() {
        let (store, _f) = test_store();
        store
            .insert_documents(&[test_document("d1", "g1")])
            .await
            .unwrap();

        assert!(store.try_begin_agent("d1", "g1", AgentType::Fraud).await.unwrap());
        store.fail_agent("d1", AgentType::Fraud, "model timeout").await.unwrap();

        let rec = store.agent_result("d1", AgentType::Fraud).await.unwrap().unwrap();
        assert_eq!(rec.status, AgentStatus::Failed);
        assert_eq!(rec.error_message.as_deref(), Some("model timeout"));

        // Failed → Running is allowed on retry.
        assert!(store.try_begin_agent("d1", "g1", AgentType::Fraud).await.unwrap());
    }

    #[tokio::test]
    async fn delete_document_cascades() {
        let (store, _f) = test_store();
        store
            .insert_documents(&[test_document("d1", "g1")])
            .await
            .unwrap();

        let mut txn = new_transaction_record("d1", "g1");
        txn.date = "01 DEC".to_string();
        txn.transaction_type = "debit".to_string();
        txn.amount = Some(100.0);
        store.replace_transactions("d1", &[txn]).await.unwrap();

        let metrics = StatementMetricsRecord {
            document_id: "d1".to_string(),
            upload_group_id: "g1".to_string(),
            currency: "SGD".to_string(),
            ..Default::default()
        };
        store.replace_statement_metrics(&metrics).await.unwrap();
        store.seed_agent_results("d1", "g1").await.unwrap();

        assert!(store.delete_document("d1").await.unwrap());
        assert!(store.get_document("d1").await.unwrap().is_none());
        assert!(store.all_transactions_for_document("d1").await.unwrap().is_empty());
        assert!(store.statement_metrics("d1").await.unwrap().is_none());
        assert!(store.agent_results_for_document("d1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transaction_filters_and_pagination() {
        let (store, _f) = test_store();
        store
            .insert_documents(&[test_document("d1", "g1")])
            .await
            .unwrap();

        let mut records = Vec::new();
        for i in 0..10 {
            let mut t = new_transaction_record("d1", "g1");
            t.date = "01 DEC".to_string();
            t.transaction_type = if i % 2 == 0 { "debit" } else { "credit" }.to_string();
            t.category = if i < 5 { "rent" } else { "other" }.to_string();
            t.amount = Some(100.0 + i as f64);
            records.push(t);
        }
        store.replace_transactions("d1", &records).await.unwrap();

        let (total, page) = store
            .transactions_for_document("d1", Some("debit"), None, 3, 0)
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 3);

        let (total, _) = store
            .transactions_for_document("d1", Some("debit"), Some("rent"), 100, 0)
            .await
            .unwrap();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn group_agent_gate() {
        let (store, _f) = test_store();
        assert!(store.try_begin_group_agent("g1", AgentType::Insights).await.unwrap());
        assert!(!store.try_begin_group_agent("g1", AgentType::Insights).await.unwrap());
        store
            .complete_group_agent("g1", AgentType::Insights, &serde_json::json!({}), "s", "low")
            .await
            .unwrap();
        assert!(!store.try_begin_group_agent("g1", AgentType::Insights).await.unwrap());

        let all = store.group_agent_results("g1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, AgentStatus::Completed);
    }
}
