//! Risk scenario CLI
//!
//! Forks a market into the in-memory ledger, runs named stress scenarios
//! against it and prints a text or JSON report.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use risk_model::Wad;
use risk_scenario::{exit_codes, run_all, run_named, Config, Overrides, ScenarioKind, ScenarioResult};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "risk-scenario",
    version,
    about = "Drive lending-market positions to liquidation on a forked ledger"
)]
struct Cli {
    /// Config file (defaults to $RISK_SCENARIO_CONFIG, then risk-scenario.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Network from the config file
    #[arg(long, global = true)]
    network: Option<String>,

    /// Print JSON instead of the text report
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List named scenarios.
    List,
    /// Run one scenario.
    Run {
        /// Scenario name, see `list`
        scenario: String,

        #[command(flatten)]
        overrides: OverrideArgs,
    },
    /// Run every scenario concurrently, each on its own fork.
    RunAll {
        #[command(flatten)]
        overrides: OverrideArgs,
    },
    /// Write the default config to a file.
    InitConfig {
        path: String,
    },
}

#[derive(Args, Clone, Default)]
struct OverrideArgs {
    /// Fork target recorded in the report
    #[arg(long)]
    rpc_url: Option<String>,

    /// Fork block height
    #[arg(long)]
    block: Option<u64>,

    /// Tokens to fund the account with, in whole units
    #[arg(long)]
    fund_amount: Option<String>,

    /// Fraction of max debt to borrow, e.g. 0.95
    #[arg(long)]
    borrow_fraction: Option<Wad>,

    /// Per-step price multiplier, e.g. 0.98
    #[arg(long)]
    decay: Option<Wad>,

    #[arg(long)]
    max_steps: Option<u32>,

    /// Extra steps that must agree after the account first becomes liquidatable
    #[arg(long)]
    confirm_steps: Option<u32>,

    /// Collateral price in USD for price-shock
    #[arg(long)]
    shock_price: Option<String>,

    /// Seconds of ledger time per step for interest-rate-spike
    #[arg(long)]
    interval_secs: Option<u64>,
}

impl From<OverrideArgs> for Overrides {
    fn from(args: OverrideArgs) -> Self {
        Overrides {
            rpc_url: args.rpc_url,
            block: args.block,
            fund_amount: args.fund_amount,
            borrow_fraction: args.borrow_fraction,
            decay: args.decay,
            max_steps: args.max_steps,
            confirm_steps: args.confirm_steps,
            shock_price: args.shock_price,
            interval_secs: args.interval_secs,
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let code = match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();

    match cli.command {
        Command::List => cmd_list(cli.json),
        Command::InitConfig { path } => {
            Config::write_default(&path)?;
            Ok(exit_codes::OK)
        }
        Command::Run { scenario, overrides } => {
            let kind: ScenarioKind = scenario.parse()?;
            let config = Config::load(cli.config.as_deref())?;
            let network = cli.network.unwrap_or_else(|| config.default_network.clone());
            let overrides = Overrides::from(overrides);

            let result = tokio::task::spawn_blocking(move || run_named(&config, &network, kind, &overrides))
                .await
                .context("scenario worker panicked")??;

            print_result(&result, cli.json)?;
            Ok(result.exit_code())
        }
        Command::RunAll { overrides } => {
            let config = Config::load(cli.config.as_deref())?;
            let network = cli.network.unwrap_or_else(|| config.default_network.clone());
            let results = run_all(Arc::new(config), network, Overrides::from(overrides)).await;

            let mut code = exit_codes::OK;
            let mut completed = Vec::new();
            for (kind, result) in results {
                match result {
                    Ok(result) => {
                        code = code.max(result.exit_code());
                        completed.push(result);
                    }
                    Err(err) => {
                        log::error!("Scenario {} could not start: {}", kind, err);
                        code = code.max(exit_codes::INVALID);
                    }
                }
            }

            let finished = completed.iter().filter(|result| result.is_completed()).count();
            log::info!("{} of {} scenarios completed", finished, ScenarioKind::ALL.len());

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&completed).context("serialize results")?);
            } else {
                for result in &completed {
                    println!("{}", result);
                }
            }
            Ok(code)
        }
    }
}

fn cmd_list(json: bool) -> Result<i32> {
    if json {
        let entries: Vec<serde_json::Value> = ScenarioKind::ALL
            .iter()
            .map(|kind| serde_json::json!({ "name": kind.name(), "description": kind.description() }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries).context("serialize scenario list")?);
    } else {
        for kind in ScenarioKind::ALL {
            println!("{:<22} {}", kind.name(), kind.description());
        }
    }
    Ok(exit_codes::OK)
}

fn print_result(result: &ScenarioResult, json: bool) -> Result<()> {
    if json {
        println!("{}", result.to_json().context("serialize result")?);
    } else {
        print!("{}", result);
    }
    Ok(())
}
