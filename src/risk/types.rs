//! Risk assessment types

use chrono::{DateTime, Utc};
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;

/// Warning severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// What a warning is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    Honeypot,
    Tax,
    MintAuthority,
    FreezeAuthority,
    HolderCount,
    HolderConcentration,
    LowCirculation,
    AnalysisDegraded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskWarning {
    pub kind: WarningKind,
    pub severity: Severity,
    pub message: String,
}

impl RiskWarning {
    pub fn new(kind: WarningKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
        }
    }
}

/// Supply distribution across holders
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HolderDistribution {
    /// Distinct wallet owners with a non-zero balance
    pub holder_count: usize,
    pub total_supply: u128,
    pub top10_pct: f64,
    pub top50_pct: f64,
    pub top100_pct: f64,
    /// Share held by wallets (not program-owned accounts)
    pub circulating_pct: f64,
}

/// Which sub-check produced a partial result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Honeypot,
    Tax,
    Ownership,
    HolderConcentration,
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CheckKind::Honeypot => "honeypot",
            CheckKind::Tax => "tax",
            CheckKind::Ownership => "ownership",
            CheckKind::HolderConcentration => "holder concentration",
        };
        write!(f, "{}", name)
    }
}

/// Check-specific findings
#[derive(Debug, Clone, PartialEq)]
pub enum Findings {
    Honeypot { is_honeypot: bool },
    Tax { buy_tax_pct: f64, sell_tax_pct: f64 },
    Ownership { is_renounced: bool, freeze_authority: bool },
    Holders(HolderDistribution),
    /// The check could not complete
    Degraded,
}

/// Output of one sub-check
#[derive(Debug, Clone, PartialEq)]
pub struct PartialRisk {
    pub check: CheckKind,
    /// 0-100
    pub risk: u8,
    pub warnings: Vec<RiskWarning>,
    pub findings: Findings,
}

impl PartialRisk {
    /// Conservative stand-in for a check that failed or timed out
    pub fn degraded(check: CheckKind, risk: u8, reason: &str) -> Self {
        Self {
            check,
            risk,
            warnings: vec![RiskWarning::new(
                WarningKind::AnalysisDegraded,
                Severity::Medium,
                format!("{} analysis degraded: {}", check, reason),
            )],
            findings: Findings::Degraded,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.findings == Findings::Degraded
    }
}

/// Combined risk verdict for a token
#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    #[serde(with = "crate::serde_util::pubkey")]
    pub token: Pubkey,
    #[serde(with = "crate::serde_util::option_pubkey")]
    pub pool: Option<Pubkey>,
    pub honeypot_risk: u8,
    pub tax_risk: u8,
    pub ownership_risk: u8,
    pub holder_risk: u8,
    /// `None` when the tax could not be measured
    pub buy_tax_pct: Option<f64>,
    pub sell_tax_pct: Option<f64>,
    pub is_honeypot: bool,
    pub is_renounced: bool,
    pub holder_distribution: Option<HolderDistribution>,
    pub warnings: Vec<RiskWarning>,
    /// At least one sub-check fell back to its conservative default
    pub degraded: bool,
    /// 0-100
    pub score: u8,
    pub computed_at: DateTime<Utc>,
}

impl RiskAssessment {
    pub fn has_warning(&self, kind: WarningKind) -> bool {
        self.warnings.iter().any(|w| w.kind == kind)
    }
}
