use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Document lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "processing" => DocumentStatus::Processing,
            "completed" => DocumentStatus::Completed,
            "failed" => DocumentStatus::Failed,
            _ => DocumentStatus::Uploaded,
        }
    }
}

/// Analysis agent kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Layout,
    Extraction,
    Insights,
    Tampering,
    Fraud,
}

impl AgentType {
    pub const ALL: [AgentType; 5] = [
        AgentType::Layout,
        AgentType::Extraction,
        AgentType::Insights,
        AgentType::Tampering,
        AgentType::Fraud,
    ];

    /// Agents that also run at upload-group level.
    pub const GROUP: [AgentType; 3] = [AgentType::Tampering, AgentType::Fraud, AgentType::Insights];

    pub fn as_str(&self) -> &str {
        match self {
            AgentType::Layout => "layout",
            AgentType::Extraction => "extraction",
            AgentType::Insights => "insights",
            AgentType::Tampering => "tampering",
            AgentType::Fraud => "fraud",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "layout" => Some(AgentType::Layout),
            "extraction" => Some(AgentType::Extraction),
            "insights" => Some(AgentType::Insights),
            "tampering" => Some(AgentType::Tampering),
            "fraud" => Some(AgentType::Fraud),
            _ => None,
        }
    }
}

/// Agent execution states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            AgentStatus::Pending => "pending",
            AgentStatus::Running => "running",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => AgentStatus::Running,
            "completed" => AgentStatus::Completed,
            "failed" => AgentStatus::Failed,
            _ => AgentStatus::Pending,
        }
    }
}

/// Uploaded PDF document metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub user_id: Option<String>,
    pub filename: String,
    pub original_filename: String,
    pub file_path: String,
    pub file_size: Option<i64>,
    pub page_count: Option<i64>,
    pub status: DocumentStatus,
    pub upload_group_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single extracted transaction as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransactionRecord {
    pub id: String,
    pub document_id: String,
    pub upload_group_id: String,
    pub date: String,
    pub description: String,
    pub transaction_type: String,
    pub amount: Option<f64>,
    pub balance: Option<f64>,
    pub reference: Option<String>,
    pub category: String,
    pub counterparty: Option<String>,
    pub channel: String,
    pub is_cash: bool,
    pub is_cheque: bool,
    pub currency: String,
    pub page_number: Option<i64>,
    pub raw_text: Option<String>,
}

/// Per-statement computed metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatementMetricsRecord {
    pub document_id: String,
    pub upload_group_id: String,
    pub account_holder: Option<String>,
    pub bank: Option<String>,
    pub account_number: Option<String>,
    pub currency: String,
    pub statement_period: Option<String>,
    pub opening_balance: Option<f64>,
    pub closing_balance: Option<f64>,
    pub max_eod_balance: Option<f64>,
    pub min_eod_balance: Option<f64>,
    pub avg_eod_balance: Option<f64>,
    pub total_no_of_credit_transactions: i64,
    pub total_amount_of_credit_transactions: f64,
    pub total_no_of_debit_transactions: i64,
    pub total_amount_of_debit_transactions: f64,
    pub average_deposit: f64,
    pub average_withdrawal: f64,
    pub max_debit_transaction: f64,
    pub min_debit_transaction: f64,
    pub max_credit_transaction: f64,
    pub min_credit_transaction: f64,
    pub total_no_of_cash_deposits: i64,
    pub total_amount_of_cash_deposits: f64,
    pub total_no_of_cash_withdrawals: i64,
    pub total_amount_of_cash_withdrawals: f64,
    pub total_no_of_cheque_withdrawals: i64,
    pub total_amount_of_cheque_withdrawals: f64,
    pub total_fees_charged: f64,
    /// Present only for multi-currency statements.
    pub currency_breakdown: Option<Value>,
}

/// Cross-statement aggregated metrics for an upload group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedMetricsRecord {
    pub upload_group_id: String,
    pub account_holder: Option<String>,
    pub bank: Option<String>,
    pub account_number: Option<String>,
    pub currency: String,
    pub total_statements: i64,
    pub period_covered: Option<String>,
    pub overall_max_eod_balance: Option<f64>,
    pub overall_min_eod_balance: Option<f64>,
    pub overall_avg_eod_balance: Option<f64>,
    pub avg_opening_balance: Option<f64>,
    pub avg_closing_balance: Option<f64>,
    pub total_credit_transactions: i64,
    pub total_credit_amount: f64,
    pub total_debit_transactions: i64,
    pub total_debit_amount: f64,
    pub overall_avg_deposit: f64,
    pub overall_avg_withdrawal: f64,
    pub overall_max_debit: f64,
    pub overall_max_credit: f64,
    pub total_cash_deposits: i64,
    pub total_cash_deposit_amount: f64,
    pub total_cash_withdrawals: i64,
    pub total_cash_withdrawal_amount: f64,
    pub total_cheque_withdrawals: i64,
    pub total_cheque_withdrawal_amount: f64,
    pub total_fees: f64,
    pub monthly_credit_totals: Value,
    pub monthly_debit_totals: Value,
    pub monthly_balances: Value,
}

/// Result row of one agent run on one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResultRecord {
    pub document_id: String,
    pub upload_group_id: String,
    pub agent_type: AgentType,
    pub status: AgentStatus,
    pub results: Option<Value>,
    pub summary: Option<String>,
    pub risk_level: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Group-level agent result (tampering / fraud / insights only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupAgentResultRecord {
    pub upload_group_id: String,
    pub agent_type: AgentType,
    pub status: AgentStatus,
    pub results: Option<Value>,
    pub summary: Option<String>,
    pub risk_level: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Raster DPI used by each tampering check.
#[derive(Debug, Clone)]
pub struct CheckDpiConfig {
    pub document_dimension: u32,
    pub page_clarity: u32,
    pub sharpness_spread: u32,
    pub visual_tampering: u32,
    pub page_count_discrepancy: u32,
}

impl Default for CheckDpiConfig {
    fn default() -> Self {
        Self {
            document_dimension: 300,
            page_clarity: 300,
            sharpness_spread: 300,
            visual_tampering: 150,
            page_count_discrepancy: 100,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub upload_dir: String,
    pub max_file_size_mb: u64,
    pub port: u16,

    pub model_endpoint: Option<String>,
    pub model_api_key: Option<String>,
    pub model_api_version: String,
    pub model_deployment: String,
    pub vision_deployment: String,

    pub pdf_to_image_dpi: u32,
    pub check_dpi: CheckDpiConfig,

    pub dimension_min_height: u32,
    pub dimension_min_width: u32,
    pub sharpness_threshold: f64,
    pub sharpness_spread_ratio: f64,
    pub sharpness_max_std_dev: f64,

    pub allowed_origins: Vec<String>,
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./ledgerlens.db".to_string());

        let upload_dir = std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "./uploads".to_string());

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            database_path,
            upload_dir,
            max_file_size_mb: env_parse("MAX_FILE_SIZE_MB", 50),
            port: env_parse("PORT", 8080),
            model_endpoint: std::env::var("MODEL_ENDPOINT").ok().filter(|s| !s.is_empty()),
            model_api_key: std::env::var("MODEL_API_KEY").ok().filter(|s| !s.is_empty()),
            model_api_version: std::env::var("MODEL_API_VERSION")
                .unwrap_or_else(|_| "2024-12-01-preview".to_string()),
            model_deployment: std::env::var("MODEL_DEPLOYMENT")
                .unwrap_or_else(|_| "gpt-4o".to_string()),
            vision_deployment: std::env::var("VISION_DEPLOYMENT")
                .unwrap_or_else(|_| "gpt-4o".to_string()),
            pdf_to_image_dpi: env_parse("PDF_TO_IMAGE_DPI", 200),
            check_dpi: CheckDpiConfig {
                document_dimension: env_parse("DIMENSION_DPI", 300),
                page_clarity: env_parse("CLARITY_DPI", 300),
                sharpness_spread: env_parse("SPREAD_DPI", 300),
                visual_tampering: env_parse("VISUAL_DPI", 150),
                page_count_discrepancy: env_parse("PAGE_COUNT_DPI", 100),
            },
            dimension_min_height: env_parse("DIMENSION_MIN_HEIGHT", 800),
            dimension_min_width: env_parse("DIMENSION_MIN_WIDTH", 1000),
            sharpness_threshold: env_parse("SHARPNESS_THRESHOLD", 500.0),
            sharpness_spread_ratio: env_parse("SHARPNESS_SPREAD_RATIO", 0.5),
            sharpness_max_std_dev: env_parse("SHARPNESS_MAX_STD_DEV", 100.0),
            allowed_origins,
            jwt_secret: std::env::var("JWT_SECRET")
                .unwrap_or_else(|_| "ledgerlens-dev-secret-change-in-production".to_string()),
            jwt_expiry_hours: env_parse("JWT_EXPIRY_HOURS", 72),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_status_round_trips() {
        for s in [
            DocumentStatus::Uploaded,
            DocumentStatus::Processing,
            DocumentStatus::Completed,
            DocumentStatus::Failed,
        ] {
            assert_eq!(DocumentStatus::from_str(s.as_str()), s);
        }
    }

    #[test]
    fn agent_type_serialization() {
        let json = serde_json::to_string(&AgentType::Tampering).unwrap();
        assert_eq!(json, r#""tampering""#);
        assert_eq!(AgentType::from_str("fraud"), Some(AgentType::Fraud));
        assert_eq!(AgentType::from_str("nope"), None);
    }

    #[test]
    fn group_agents_are_a_subset() {
        for a in AgentType::GROUP {
            assert!(AgentType::ALL.contains(&a));
        }
        assert!(!AgentType::GROUP.contains(&AgentType::Layout));
        assert!(!AgentType::GROUP.contains(&AgentType::Extraction));
    }
}
