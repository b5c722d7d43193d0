//! CLI command implementations

use anyhow::{Context, Result};
use base64::Engine as _;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::chain::{KeypairSigner, RpcChainClient, TransactionSigner};
use crate::config::Config;
use crate::engine::SniperEngine;
use crate::pool::PoolStateCodec;
use crate::position::{ExitSignal, SizingMethod, SizingParams};
use crate::risk::RiskAssessment;
use crate::sniper::{SnipeConfig, SnipeResult};

/// Per-run overrides of the `[sniper]` defaults
#[derive(Debug, Clone, Default)]
pub struct SnipeOverrides {
    pub amount_lamports: Option<u64>,
    pub max_slippage_bps: Option<u16>,
    pub max_risk_score: Option<u8>,
    pub no_wait: bool,
}

/// Inputs for the `size` command
#[derive(Debug, Clone)]
pub struct SizeArgs {
    pub method: Option<SizingMethod>,
    pub balance: f64,
    pub win_probability: Option<f64>,
    pub volume_24h: f64,
    pub volatility: f64,
}

/// Analyze token risk
pub async fn analyze(config: &Config, token: &str, pool: Option<&str>, json: bool) -> Result<()> {
    let token = parse_pubkey("token", token)?;
    let pool = pool.map(|p| parse_pubkey("pool", p)).transpose()?;

    let engine = build_engine(config)?;
    let assessment = engine.analyze_token(&token, pool.as_ref()).await;

    if json {
        print_json(assessment.as_ref())?;
    } else {
        print_assessment(&assessment);
    }
    Ok(())
}

/// Snipe a token now, or once liquidity arrives
pub async fn snipe(
    config: &Config,
    token: &str,
    pool: &str,
    overrides: SnipeOverrides,
    open_position: bool,
    json: bool,
) -> Result<()> {
    let token = parse_pubkey("token", token)?;
    let pool = parse_pubkey("pool", pool)?;

    let engine = build_engine(config)?;
    let snipe_config = apply_overrides(engine.snipe_config(token, pool), &overrides);

    let result = tokio::select! {
        result = engine.snipe(snipe_config) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling snipe for {}", token);
            engine.stop_monitoring(&token);
            anyhow::bail!("snipe interrupted");
        }
    };

    report_result(&result, json)?;

    if result.is_success() && open_position {
        let position = engine.open_position_from(&result).await?;
        info!(
            "Opened position {}: {} tokens @ {} SOL",
            position.id, position.entry_amount, position.entry_price
        );
    }

    if !result.is_success() {
        anyhow::bail!(
            "snipe failed: {}",
            result
                .error
                .as_ref()
                .map(|e| e.message.as_str())
                .unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Watch a token, snipe when liquidity lands, then manage the position
/// until it exits or Ctrl+C
pub async fn monitor(
    config: &Config,
    token: &str,
    pool: &str,
    overrides: SnipeOverrides,
    json: bool,
) -> Result<()> {
    let token = parse_pubkey("token", token)?;
    let pool = parse_pubkey("pool", pool)?;

    let engine = build_engine(config)?;
    let mut results = engine
        .snipe_results()
        .await
        .context("snipe result channel already taken")?;

    let snipe_config = apply_overrides(engine.snipe_config(token, pool), &overrides);
    engine.start_monitoring(snipe_config)?;
    info!("Waiting for liquidity on {} (Ctrl+C to stop)", token);

    let result = tokio::select! {
        result = results.recv() => result.context("engine dropped the result channel")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Stopping monitor for {}", token);
            engine.stop_monitoring(&token);
            engine.shutdown().await;
            return Ok(());
        }
    };

    report_result(&result, json)?;
    if !result.is_success() {
        engine.shutdown().await;
        return Ok(());
    }

    let position = engine.open_position_from(&result).await?;
    info!(
        "Opened position {}: {} tokens @ {} SOL (TP {:?}, SL {:?})",
        position.id,
        position.entry_amount,
        position.entry_price,
        position.take_profit,
        position.stop_loss
    );

    let mut exits = engine.start_position_monitor()?;
    loop {
        tokio::select! {
            signal = exits.recv() => {
                let Some(signal) = signal else { break };
                report_exit(&signal, json)?;
                if engine.positions().open_count().await == 0 {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down; open positions are left as they are");
                break;
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

/// Compute a position size for a token
pub async fn size(config: &Config, token: &str, pool: &str, args: SizeArgs, json: bool) -> Result<()> {
    let token = parse_pubkey("token", token)?;
    let pool = parse_pubkey("pool", pool)?;

    let engine = build_engine(config)?;
    let method = args.method.unwrap_or(config.sizing.method);
    let params = SizingParams {
        balance: args.balance,
        win_probability: args.win_probability,
        volume_24h: args.volume_24h,
        volatility: args.volatility,
        ..SizingParams::default()
    };

    let sized = engine.size_position(&token, &pool, method, params).await?;

    if json {
        print_json(&sized)?;
    } else {
        println!("\n=== POSITION SIZE ===\n");
        println!("Token:      {}", sized.token);
        println!("Method:     {}", sized.method);
        println!("Price:      {} SOL", sized.price);
        println!("Risk score: {}", sized.risk_score);
        println!("Size:       {} tokens", sized.size);
        println!("Value:      {} SOL", sized.value);
    }
    Ok(())
}

/// Decode base64 pool account bytes
pub fn decode_pool(config: &Config, data: &str, address: Option<&str>, json: bool) -> Result<()> {
    let address = address
        .map(|a| parse_pubkey("address", a))
        .transpose()?
        .unwrap_or_default();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .context("account data is not valid base64")?;

    let state = PoolStateCodec::new(config.pool.fee_bps).decode(address, &bytes)?;

    if json {
        print_json(&state)?;
    } else {
        println!("\n=== POOL ===\n");
        println!("Status:        {:?}", state.status);
        println!("Base mint:     {} ({} decimals)", state.base_mint, state.base_decimals);
        println!("Quote mint:    {} ({} decimals)", state.quote_mint, state.quote_decimals);
        println!("LP mint:       {}", state.lp_mint);
        println!("Base reserve:  {}", state.base_reserve);
        println!("Quote reserve: {}", state.quote_reserve);
        println!("LP supply:     {}", state.lp_supply);
        println!("Open time:     {}", state.open_time);
        if let Some(price) = state.ui_price_of(&state.base_mint) {
            println!("Base price:    {} (quote per base)", price);
        }
    }
    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

fn build_engine(config: &Config) -> Result<SniperEngine> {
    let signer = Arc::new(KeypairSigner::from_env()?);
    let program_id = config.pool.program_id()?;
    let chain = Arc::new(RpcChainClient::new(&config.rpc, program_id, signer.pubkey())?);
    info!("Wallet: {}", signer.pubkey());
    Ok(SniperEngine::new(config.clone(), chain, signer)?)
}

fn apply_overrides(mut config: SnipeConfig, overrides: &SnipeOverrides) -> SnipeConfig {
    if let Some(amount) = overrides.amount_lamports {
        config.amount = amount;
    }
    if let Some(bps) = overrides.max_slippage_bps {
        config.max_slippage_bps = bps;
    }
    if let Some(score) = overrides.max_risk_score {
        config.max_risk_score = score;
    }
    if overrides.no_wait {
        config.wait_for_liquidity = false;
    }
    config
}

fn parse_pubkey(what: &str, value: &str) -> Result<Pubkey> {
    Pubkey::from_str(value.trim()).with_context(|| format!("Invalid {} address: {}", what, value))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_assessment(assessment: &RiskAssessment) {
    println!("\n=== RISK ASSESSMENT ===\n");
    println!("Token:      {}", assessment.token);
    println!("Score:      {}/100{}", assessment.score, if assessment.degraded { " (degraded)" } else { "" });
    println!("Honeypot:   {}", assessment.is_honeypot);
    println!("Renounced:  {}", assessment.is_renounced);
    println!(
        "Components: honeypot={} tax={} ownership={} holders={}",
        assessment.honeypot_risk, assessment.tax_risk, assessment.ownership_risk, assessment.holder_risk
    );
    println!(
        "Taxes:      buy={} sell={}",
        format_pct(assessment.buy_tax_pct),
        format_pct(assessment.sell_tax_pct)
    );
    if let Some(dist) = &assessment.holder_distribution {
        println!(
            "Holders:    {} (top 10 hold {:.2}%)",
            dist.holder_count, dist.top10_pct
        );
    }

    if !assessment.warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &assessment.warnings {
            println!("  [{:?}] {}", warning.severity, warning.message);
        }
    }
}

fn report_result(result: &SnipeResult, json: bool) -> Result<()> {
    if json {
        return print_json(result);
    }

    println!("\n=== SNIPE RESULT ===\n");
    println!("Token:        {}", result.token);
    println!("Status:       {:?} ({})", result.status, result.final_state);
    if let Some(sig) = &result.signature {
        println!("Signature:    {}", sig);
    }
    println!("Amount in:    {}", result.amount_in);
    println!("Expected out: {} (min {})", result.amount_out, result.min_amount_out);
    println!("Impact:       {}bps", result.price_impact_bps);
    println!("Priority fee: {} micro-lamports/CU", result.priority_fee_paid);
    if let Some(risk) = &result.risk_assessment {
        println!("Risk score:   {}", risk.score);
    }
    if let Some(mev) = &result.mev_assessment {
        println!("MEV risk:     {}", mev.risk_level);
    }
    println!("Elapsed:      {}ms", result.elapsed_ms);

    if let Some(failure) = &result.error {
        error!("Snipe failed ({:?}): {}", failure.kind, failure.message);
    }
    Ok(())
}

fn report_exit(signal: &ExitSignal, json: bool) -> Result<()> {
    if json {
        return print_json(signal);
    }
    println!(
        "Exit {} on {} @ {} SOL, P&L: {} SOL",
        signal.reason,
        signal.position.token,
        signal.price,
        signal.position.realized_pnl.unwrap_or_default()
    );
    Ok(())
}

fn format_pct(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}%", v))
        .unwrap_or_else(|| "unknown".to_string())
}
