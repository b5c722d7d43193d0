//! AMM Sniper - risk-gated liquidity sniper for constant-product pools
//!
//! # WARNING
//! - This tool trades with real money. Only use funds you can afford to lose.
//! - Risk scores and MEV checks reduce, not remove, the chance of a bad fill.
//! - Take-profit and stop-loss are best-effort; prices can gap between polls.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use amm_sniper::cli::commands::{self, SizeArgs, SnipeOverrides};
use amm_sniper::config::Config;
use amm_sniper::position::SizingMethod;

/// AMM Sniper - risk-gated liquidity sniper
#[derive(Parser)]
#[command(name = "snipe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone, Default)]
struct SnipeArgs {
    /// Quote amount to spend, in lamports
    #[arg(long)]
    amount: Option<u64>,

    /// Max slippage in basis points
    #[arg(long)]
    max_slippage_bps: Option<u16>,

    /// Max acceptable risk score (0-100)
    #[arg(long)]
    max_risk_score: Option<u8>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze token risk
    Analyze {
        /// Token mint address
        token: String,

        /// Pool address, enables honeypot and tax dry-runs
        #[arg(long)]
        pool: Option<String>,
    },

    /// Snipe a token on a pool
    Snipe {
        /// Token mint address
        token: String,

        /// Pool address
        pool: String,

        #[command(flatten)]
        args: SnipeArgs,

        /// Fail instead of waiting when liquidity is below the minimum
        #[arg(long)]
        no_wait: bool,

        /// Track the bought tokens as a position
        #[arg(long)]
        open_position: bool,
    },

    /// Wait for liquidity, snipe, then manage the position until it exits
    Monitor {
        /// Token mint address
        token: String,

        /// Pool address
        pool: String,

        #[command(flatten)]
        args: SnipeArgs,
    },

    /// Compute a position size
    Size {
        /// Token mint address
        token: String,

        /// Pool address
        pool: String,

        /// Available balance in SOL
        #[arg(long)]
        balance: f64,

        /// Sizing method (default from config)
        #[arg(long, value_enum)]
        method: Option<SizingMethod>,

        /// Win probability for Kelly sizing
        #[arg(long)]
        win_probability: Option<f64>,

        /// 24h volume in SOL for dynamic sizing
        #[arg(long, default_value_t = 0.0)]
        volume: f64,

        /// Relative volatility for dynamic sizing
        #[arg(long, default_value_t = 0.0)]
        volatility: f64,
    },

    /// Decode base64-encoded pool account data
    DecodePool {
        /// Account data, base64
        data: String,

        /// Pool address the data was read from
        #[arg(long)]
        address: Option<String>,
    },

    /// Show current configuration (secrets masked)
    Config,
}

impl SnipeArgs {
    fn overrides(&self, no_wait: bool) -> SnipeOverrides {
        SnipeOverrides {
            amount_lamports: self.amount,
            max_slippage_bps: self.max_slippage_bps,
            max_risk_score: self.max_risk_score,
            no_wait,
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("amm_sniper=info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    init_tracing(cli.json_logs);

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    let json = cli.json;

    // Execute command
    let result = match cli.command {
        Commands::Analyze { token, pool } => {
            commands::analyze(&config, &token, pool.as_deref(), json).await
        }
        Commands::Snipe {
            token,
            pool,
            args,
            no_wait,
            open_position,
        } => {
            commands::snipe(&config, &token, &pool, args.overrides(no_wait), open_position, json).await
        }
        Commands::Monitor { token, pool, args } => {
            commands::monitor(&config, &token, &pool, args.overrides(false), json).await
        }
        Commands::Size {
            token,
            pool,
            balance,
            method,
            win_probability,
            volume,
            volatility,
        } => {
            let args = SizeArgs {
                method,
                balance,
                win_probability,
                volume_24h: volume,
                volatility,
            };
            commands::size(&config, &token, &pool, args, json).await
        }
        Commands::DecodePool { data, address } => {
            commands::decode_pool(&config, &data, address.as_deref(), json)
        }
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
