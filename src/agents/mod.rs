//! Analytical agents and their shared result types.
//!
//! Every agent exposes `analyse(...) → AgentOutcome`; tampering, fraud and
//! insights additionally expose `analyse_group(...)`. The orchestrator
//! dispatches statically and persists outcomes through the store's status
//! gate.

pub mod dates;
pub mod fraud;
pub mod insights;
pub mod layout;
pub mod tampering;

use serde::Serialize;
use serde_json::Value;

/// What one agent run produced.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub results: Value,
    pub summary: String,
    pub risk_level: String,
}

impl AgentOutcome {
    pub fn low(results: Value, summary: impl Into<String>) -> Self {
        Self {
            results,
            summary: summary.into(),
            risk_level: "low".to_string(),
        }
    }
}

/// Verdict of a single tampering / fraud check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    Warning,
}

impl CheckStatus {
    pub fn as_str(&self) -> &str {
        match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Fail => "fail",
            CheckStatus::Warning => "warning",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "fail" => CheckStatus::Fail,
            "warning" => CheckStatus::Warning,
            _ => CheckStatus::Pass,
        }
    }
}

/// One named check result.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub check: String,
    pub status: CheckStatus,
    pub details: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flagged_items: Vec<Value>,
}

impl CheckResult {
    pub fn new(check: &str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self {
            check: check.to_string(),
            status,
            details: details.into(),
            flagged_items: Vec::new(),
        }
    }

    pub fn with_items(mut self, items: Vec<Value>) -> Self {
        self.flagged_items = items;
        self
    }
}

/// Roll up check verdicts into a risk level.
///
/// Score is 3 per fail plus 1 per warning; critical at ≥4 fails, high at
/// ≥2, medium at ≥1 fail or ≥3 warnings.
pub fn compute_risk(checks: &[CheckResult]) -> (String, u32, String) {
    let fail_count = checks.iter().filter(|c| c.status == CheckStatus::Fail).count();
    let warn_count = checks.iter().filter(|c| c.status == CheckStatus::Warning).count();
    let pass_count = checks.iter().filter(|c| c.status == CheckStatus::Pass).count();
    let total = checks.len();

    let score = (fail_count * 3 + warn_count) as u32;

    let risk = if fail_count >= 4 {
        "critical"
    } else if fail_count >= 2 {
        "high"
    } else if fail_count >= 1 || warn_count >= 3 {
        "medium"
    } else {
        "low"
    };

    let mut summary_parts = vec![format!("{pass_count}/{total} checks passed")];
    if fail_count > 0 {
        let failed: Vec<&str> = checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .map(|c| c.check.as_str())
            .collect();
        summary_parts.push(format!("{fail_count} failed: {}", failed.join(", ")));
    }
    if warn_count > 0 {
        let warned: Vec<&str> = checks
            .iter()
            .filter(|c| c.status == CheckStatus::Warning)
            .map(|c| c.check.as_str())
            .collect();
        summary_parts.push(format!("{warn_count} warnings: {}", warned.join(", ")));
    }

    (risk.to_string(), score, format!("{}.", summary_parts.join(". ")))
}

/// Check list + counters serialised the way every check agent reports them.
pub fn checks_to_results(checks: &[CheckResult], score: u32) -> Value {
    serde_json::json!({
        "checks": checks,
        "risk_score": score,
        "pass_count": checks.iter().filter(|c| c.status == CheckStatus::Pass).count(),
        "fail_count": checks.iter().filter(|c| c.status == CheckStatus::Fail).count(),
        "warning_count": checks.iter().filter(|c| c.status == CheckStatus::Warning).count(),
        "total_checks": checks.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(status: CheckStatus) -> CheckResult {
        CheckResult::new("Some Check", status, "details")
    }

    #[test]
    fn risk_rollup_thresholds() {
        let (risk, score, _) = compute_risk(&[check(CheckStatus::Pass)]);
        assert_eq!(risk, "low");
        assert_eq!(score, 0);

        let (risk, score, _) = compute_risk(&[check(CheckStatus::Fail)]);
        assert_eq!(risk, "medium");
        assert_eq!(score, 3);

        let (risk, _, _) = compute_risk(&[check(CheckStatus::Fail), check(CheckStatus::Fail)]);
        assert_eq!(risk, "high");

        let four_fails = vec![
            check(CheckStatus::Fail),
            check(CheckStatus::Fail),
            check(CheckStatus::Fail),
            check(CheckStatus::Fail),
        ];
        let (risk, score, _) = compute_risk(&four_fails);
        assert_eq!(risk, "critical");
        assert_eq!(score, 12);

        let three_warnings = vec![
            check(CheckStatus::Warning),
            check(CheckStatus::Warning),
            check(CheckStatus::Warning),
        ];
        let (risk, score, _) = compute_risk(&three_warnings);
        assert_eq!(risk, "medium");
        assert_eq!(score, 3);
    }

    #[test]
    fn summary_names_failed_checks() {
        let mut failing = check(CheckStatus::Fail);
        failing.check = "Metadata Date Check".to_string();
        let (_, _, summary) = compute_risk(&[failing, check(CheckStatus::Pass)]);
        assert!(summary.contains("1/2 checks passed"));
        assert!(summary.contains("Metadata Date Check"));
    }

    #[test]
    fn results_counters_match() {
        let checks = vec![check(CheckStatus::Pass), check(CheckStatus::Warning)];
        let results = checks_to_results(&checks, 1);
        assert_eq!(results["pass_count"], 1);
        assert_eq!(results["warning_count"], 1);
        assert_eq!(results["total_checks"], 2);
    }
}
