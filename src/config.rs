//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use std::path::Path;
use std::str::FromStr;

use crate::position::sizing::SizingMethod;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub mev: MevConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub sniper: SniperConfig,
    #[serde(default)]
    pub sizing: SizingConfig,
    #[serde(default)]
    pub position: PositionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_commitment")]
    pub commitment: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_rpc_endpoint(),
            timeout_ms: default_timeout_ms(),
            commitment: default_commitment(),
        }
    }
}

/// Exchange (AMM program) settings
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_amm_program_id")]
    pub amm_program_id: String,
    /// Venue swap fee applied to every pool
    #[serde(default = "default_fee_bps")]
    pub fee_bps: u16,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            amm_program_id: default_amm_program_id(),
            fee_bps: default_fee_bps(),
        }
    }
}

impl PoolConfig {
    pub fn program_id(&self) -> Result<Pubkey> {
        Pubkey::from_str(&self.amm_program_id)
            .with_context(|| format!("Invalid amm_program_id: {}", self.amm_program_id))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    // Score weights, must sum to 1.0
    #[serde(default = "default_honeypot_weight")]
    pub honeypot_weight: f64,
    #[serde(default = "default_component_weight")]
    pub tax_weight: f64,
    #[serde(default = "default_component_weight")]
    pub ownership_weight: f64,
    #[serde(default = "default_component_weight")]
    pub holder_weight: f64,

    /// Upper bound of the honeypot probe, in quote base units
    #[serde(default = "default_probe_lamports")]
    pub honeypot_probe_lamports: u64,
    /// Realized tax above this marks a honeypot
    #[serde(default = "default_honeypot_tax_ceiling")]
    pub honeypot_tax_ceiling_pct: f64,

    /// Tax at which tax risk saturates at 100
    #[serde(default = "default_tax_full_scale")]
    pub tax_full_scale_pct: f64,
    #[serde(default = "default_max_acceptable_tax")]
    pub max_acceptable_tax_pct: f64,

    #[serde(default = "default_ownership_penalty")]
    pub ownership_penalty: u8,
    #[serde(default = "default_freeze_penalty")]
    pub freeze_authority_penalty: u8,

    #[serde(default = "default_min_holders")]
    pub min_holders: usize,
    #[serde(default = "default_max_top_holders")]
    pub max_top_holders_pct: f64,
    #[serde(default = "default_min_circulating")]
    pub min_circulating_pct: f64,
    #[serde(default = "default_holder_warning_penalty")]
    pub holder_warning_penalty: u8,

    /// Risk assigned to a check that could not complete
    #[serde(default = "default_degraded_risk")]
    pub degraded_risk: u8,
    #[serde(default = "default_check_timeout_ms")]
    pub check_timeout_ms: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            honeypot_weight: default_honeypot_weight(),
            tax_weight: default_component_weight(),
            ownership_weight: default_component_weight(),
            holder_weight: default_component_weight(),
            honeypot_probe_lamports: default_probe_lamports(),
            honeypot_tax_ceiling_pct: default_honeypot_tax_ceiling(),
            tax_full_scale_pct: default_tax_full_scale(),
            max_acceptable_tax_pct: default_max_acceptable_tax(),
            ownership_penalty: default_ownership_penalty(),
            freeze_authority_penalty: default_freeze_penalty(),
            min_holders: default_min_holders(),
            max_top_holders_pct: default_max_top_holders(),
            min_circulating_pct: default_min_circulating(),
            holder_warning_penalty: default_holder_warning_penalty(),
            degraded_risk: default_degraded_risk(),
            check_timeout_ms: default_check_timeout_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MevConfig {
    /// Number of recent swaps inspected
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Max slot distance between the legs of a pattern
    #[serde(default = "default_max_block_distance")]
    pub max_block_distance: u64,
    /// Victim impact that qualifies a sandwich
    #[serde(default = "default_impact_threshold_bps")]
    pub impact_threshold_bps: u64,
    /// Front/back token amounts within this tolerance count as matching
    #[serde(default = "default_value_match_tolerance_bps")]
    pub value_match_tolerance_bps: u64,
    /// Sandwiches needed for a High classification
    #[serde(default = "default_high_pattern_count")]
    pub high_pattern_count: usize,
}

impl Default for MevConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            max_block_distance: default_max_block_distance(),
            impact_threshold_bps: default_impact_threshold_bps(),
            value_match_tolerance_bps: default_value_match_tolerance_bps(),
            high_pattern_count: default_high_pattern_count(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Max gap between two observations for an increase to count
    #[serde(default = "default_liquidity_window_ms")]
    pub liquidity_window_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            liquidity_window_ms: default_liquidity_window_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

/// Defaults for every snipe attempt
#[derive(Debug, Clone, Deserialize)]
pub struct SniperConfig {
    /// Quote amount spent per snipe, in base units
    #[serde(default = "default_amount_lamports")]
    pub amount_lamports: u64,
    #[serde(default = "default_max_slippage_bps")]
    pub max_slippage_bps: u16,
    /// Minimum quote reserve, in base units
    #[serde(default = "default_min_liquidity")]
    pub min_liquidity_lamports: u64,
    #[serde(default = "default_max_risk_score")]
    pub max_risk_score: u8,
    /// Network priority fee ceiling, micro-lamports per CU
    #[serde(default = "default_max_gas_price")]
    pub max_gas_price: u64,
    /// Priority fee floor, micro-lamports per CU
    #[serde(default = "default_priority_fee")]
    pub priority_fee: u64,
    #[serde(default = "default_true")]
    pub sandwich_protection: bool,
    /// MEV look-back, in slots
    #[serde(default = "default_max_block_age")]
    pub max_block_age: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_max_execution_time_ms")]
    pub max_execution_time_ms: u64,
    #[serde(default = "default_true")]
    pub wait_for_liquidity: bool,
    #[serde(default = "default_max_wait_time_ms")]
    pub max_wait_time_ms: u64,
    #[serde(default = "default_min_confirmations")]
    pub min_confirmations: usize,
    #[serde(default = "default_compute_unit_limit")]
    pub compute_unit_limit: u32,
    #[serde(default = "default_true")]
    pub simulate_before_send: bool,
    #[serde(default = "default_confirm_poll_interval_ms")]
    pub confirm_poll_interval_ms: u64,
}

impl Default for SniperConfig {
    fn default() -> Self {
        Self {
            amount_lamports: default_amount_lamports(),
            max_slippage_bps: default_max_slippage_bps(),
            min_liquidity_lamports: default_min_liquidity(),
            max_risk_score: default_max_risk_score(),
            max_gas_price: default_max_gas_price(),
            priority_fee: default_priority_fee(),
            sandwich_protection: true,
            max_block_age: default_max_block_age(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            max_execution_time_ms: default_max_execution_time_ms(),
            wait_for_liquidity: true,
            max_wait_time_ms: default_max_wait_time_ms(),
            min_confirmations: default_min_confirmations(),
            compute_unit_limit: default_compute_unit_limit(),
            simulate_before_send: true,
            confirm_poll_interval_ms: default_confirm_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SizingConfig {
    #[serde(default = "default_sizing_method")]
    pub method: SizingMethod,
    /// Fixed: share of balance per trade
    #[serde(default = "default_fixed_pct")]
    pub fixed_pct: f64,
    /// RiskBased: share of balance put at risk before the risk discount
    #[serde(default = "default_risk_budget_pct")]
    pub risk_budget_pct: f64,
    /// Kelly: assumed win/loss payoff ratio (b)
    #[serde(default = "default_kelly_win_loss_ratio")]
    pub kelly_win_loss_ratio: f64,
    /// Kelly: fractional multiplier applied to f
    #[serde(default = "default_kelly_fraction")]
    pub kelly_fraction: f64,
    /// Kelly: win probability used when the caller supplies none
    #[serde(default = "default_win_probability")]
    pub default_win_probability: f64,
    /// Dynamic: share of 24h volume
    #[serde(default = "default_volume_fraction")]
    pub volume_fraction: f64,
    /// Token units
    #[serde(default = "default_min_position_size")]
    pub min_position_size: f64,
    /// Token units
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,
    /// Quote units (SOL)
    #[serde(default = "default_max_position_value")]
    pub max_position_value: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            method: default_sizing_method(),
            fixed_pct: default_fixed_pct(),
            risk_budget_pct: default_risk_budget_pct(),
            kelly_win_loss_ratio: default_kelly_win_loss_ratio(),
            kelly_fraction: default_kelly_fraction(),
            default_win_probability: default_win_probability(),
            volume_fraction: default_volume_fraction(),
            min_position_size: default_min_position_size(),
            max_position_size: default_max_position_size(),
            max_position_value: default_max_position_value(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionConfig {
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    /// Trailing stop distance from the high-water mark; unset disables it
    #[serde(default = "default_trailing_stop_pct")]
    pub trailing_stop_pct: Option<f64>,
    #[serde(default = "default_price_poll_interval_ms")]
    pub price_poll_interval_ms: u64,
    #[serde(default = "default_exit_channel_capacity")]
    pub exit_channel_capacity: usize,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            take_profit_pct: default_take_profit_pct(),
            stop_loss_pct: default_stop_loss_pct(),
            trailing_stop_pct: default_trailing_stop_pct(),
            price_poll_interval_ms: default_price_poll_interval_ms(),
            exit_channel_capacity: default_exit_channel_capacity(),
        }
    }
}

// Default value functions
fn default_rpc_endpoint() -> String {
    std::env::var("RPC_ENDPOINT").unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".into())
}

fn default_timeout_ms() -> u64 {
    30000
}

fn default_commitment() -> String {
    "confirmed".into()
}

fn default_amm_program_id() -> String {
    "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8".into()
}

fn default_fee_bps() -> u16 {
    25
}

fn default_honeypot_weight() -> f64 {
    0.4
}

fn default_component_weight() -> f64 {
    0.2
}

fn default_probe_lamports() -> u64 {
    10_000_000 // 0.01 SOL
}

fn default_honeypot_tax_ceiling() -> f64 {
    90.0
}

fn default_tax_full_scale() -> f64 {
    25.0
}

fn default_max_acceptable_tax() -> f64 {
    10.0
}

fn default_ownership_penalty() -> u8 {
    50
}

fn default_freeze_penalty() -> u8 {
    25
}

fn default_min_holders() -> usize {
    100
}

fn default_max_top_holders() -> f64 {
    80.0
}

fn default_min_circulating() -> f64 {
    20.0
}

fn default_holder_warning_penalty() -> u8 {
    20
}

fn default_degraded_risk() -> u8 {
    75
}

fn default_check_timeout_ms() -> u64 {
    5000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_window_size() -> usize {
    50
}

fn default_max_block_distance() -> u64 {
    2
}

fn default_impact_threshold_bps() -> u64 {
    200
}

fn default_value_match_tolerance_bps() -> u64 {
    500
}

fn default_high_pattern_count() -> usize {
    3
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_liquidity_window_ms() -> u64 {
    5000
}

fn default_read_timeout_ms() -> u64 {
    2000
}

fn default_amount_lamports() -> u64 {
    50_000_000 // 0.05 SOL
}

fn default_max_slippage_bps() -> u16 {
    500
}

fn default_min_liquidity() -> u64 {
    10_000_000_000 // 10 SOL
}

fn default_max_risk_score() -> u8 {
    70
}

fn default_max_gas_price() -> u64 {
    5_000_000
}

fn default_priority_fee() -> u64 {
    100_000
}

fn default_max_block_age() -> u64 {
    150
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    50
}

fn default_max_execution_time_ms() -> u64 {
    30_000
}

fn default_max_wait_time_ms() -> u64 {
    300_000
}

fn default_min_confirmations() -> usize {
    1
}

fn default_compute_unit_limit() -> u32 {
    200_000
}

fn default_confirm_poll_interval_ms() -> u64 {
    400
}

fn default_sizing_method() -> SizingMethod {
    SizingMethod::Fixed
}

fn default_fixed_pct() -> f64 {
    5.0
}

fn default_risk_budget_pct() -> f64 {
    10.0
}

fn default_kelly_win_loss_ratio() -> f64 {
    2.0
}

fn default_kelly_fraction() -> f64 {
    0.25
}

fn default_win_probability() -> f64 {
    0.45
}

fn default_volume_fraction() -> f64 {
    0.01
}

fn default_min_position_size() -> f64 {
    1.0
}

fn default_max_position_size() -> f64 {
    1_000_000_000.0
}

fn default_max_position_value() -> f64 {
    0.5
}

fn default_take_profit_pct() -> f64 {
    50.0
}

fn default_stop_loss_pct() -> f64 {
    30.0
}

fn default_trailing_stop_pct() -> Option<f64> {
    Some(15.0)
}

fn default_price_poll_interval_ms() -> u64 {
    1000
}

fn default_exit_channel_capacity() -> usize {
    256
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("rpc.endpoint", default_rpc_endpoint())?
            .set_default("rpc.timeout_ms", default_timeout_ms() as i64)?
            .set_default("rpc.commitment", default_commitment())?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix SNIPER_)
            .add_source(
                config::Environment::with_prefix("SNIPER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.pool.program_id()?;

        if self.pool.fee_bps > 10000 {
            anyhow::bail!("fee_bps cannot exceed 10000 (100%)");
        }

        // Score weights
        let weights = [
            self.risk.honeypot_weight,
            self.risk.tax_weight,
            self.risk.ownership_weight,
            self.risk.holder_weight,
        ];
        if weights.iter().any(|w| *w < 0.0) {
            anyhow::bail!("risk weights must be non-negative");
        }
        let total: f64 = weights.iter().sum();
        if (total - 1.0).abs() > 1e-6 {
            anyhow::bail!("risk weights must sum to 1.0, got {}", total);
        }

        if self.risk.tax_full_scale_pct <= 0.0 {
            anyhow::bail!("tax_full_scale_pct must be positive");
        }

        if self.risk.degraded_risk > 100 {
            anyhow::bail!("degraded_risk cannot exceed 100");
        }

        // Trading limits
        if self.sniper.amount_lamports == 0 {
            anyhow::bail!("amount_lamports must be positive");
        }

        if self.sniper.max_slippage_bps > 10000 {
            anyhow::bail!("max_slippage_bps cannot exceed 10000 (100%)");
        }

        if self.sniper.max_risk_score > 100 {
            anyhow::bail!("max_risk_score cannot exceed 100");
        }

        if self.sniper.priority_fee > self.sniper.max_gas_price {
            anyhow::bail!(
                "priority_fee {} exceeds max_gas_price {}",
                self.sniper.priority_fee,
                self.sniper.max_gas_price
            );
        }

        if self.monitor.poll_interval_ms == 0 || self.position.price_poll_interval_ms == 0 {
            anyhow::bail!("poll intervals must be positive");
        }

        // Sizing bounds
        if self.sizing.min_position_size > self.sizing.max_position_size {
            anyhow::bail!("min_position_size cannot exceed max_position_size");
        }

        if self.sizing.max_position_value <= 0.0 {
            anyhow::bail!("max_position_value must be positive");
        }

        // Exit percentages
        if self.position.take_profit_pct <= 0.0 {
            anyhow::bail!("take_profit_pct must be positive");
        }
        if self.position.stop_loss_pct <= 0.0 || self.position.stop_loss_pct >= 100.0 {
            anyhow::bail!("stop_loss_pct must be between 0 and 100");
        }

        if !self.sniper.sandwich_protection {
            tracing::warn!("Sandwich protection is disabled - swaps will be submitted without MEV checks");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  RPC:
    endpoint: {}
    timeout: {}ms
    commitment: {}
  Pool:
    program: {}
    fee: {}bps
  Risk:
    weights: honeypot={} tax={} ownership={} holders={}
    cache_ttl: {}s
  MEV:
    window: {} swaps
    impact_threshold: {}bps
  Sniper:
    amount: {} lamports
    max_slippage: {}bps
    min_liquidity: {} lamports
    max_risk_score: {}
    priority_fee: {} (max {}) micro-lamports/CU
    sandwich_protection: {}
  Position:
    take_profit: {}%
    stop_loss: {}%
    trailing_stop: {}
"#,
            mask_url(&self.rpc.endpoint),
            self.rpc.timeout_ms,
            self.rpc.commitment,
            self.pool.amm_program_id,
            self.pool.fee_bps,
            self.risk.honeypot_weight,
            self.risk.tax_weight,
            self.risk.ownership_weight,
            self.risk.holder_weight,
            self.risk.cache_ttl_secs,
            self.mev.window_size,
            self.mev.impact_threshold_bps,
            self.sniper.amount_lamports,
            self.sniper.max_slippage_bps,
            self.sniper.min_liquidity_lamports,
            self.sniper.max_risk_score,
            self.sniper.priority_fee,
            self.sniper.max_gas_price,
            self.sniper.sandwich_protection,
            self.position.take_profit_pct,
            self.position.stop_loss_pct,
            self.position
                .trailing_stop_pct
                .map(|p| format!("{}%", p))
                .unwrap_or_else(|| "(disabled)".to_string()),
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            pool: PoolConfig::default(),
            risk: RiskConfig::default(),
            mev: MevConfig::default(),
            monitor: MonitorConfig::default(),
            sniper: SniperConfig::default(),
            sizing: SizingConfig::default(),
            position: PositionConfig::default(),
        }
    }
}
