//! End-to-end scenarios on the memory ledger

use risk_ledger::{CometMarket, LedgerClient, PriceFeed};
use risk_model::scale::parse_units;
use risk_model::Wad;
use risk_scenario::report::{ActionKind, Phase, ScenarioOutcome};
use risk_scenario::{exit_codes, run_named, BorrowTarget, Overrides, ScenarioKind, ScenarioRunner};
use risk_scenario_integration_tests::*;

#[test]
fn test_decay_from_3000_trips_at_step_fifteen() {
    let config = mainnet();
    let mut network = network(&config);
    set_feed(&mut network, "WETH", "3000", 6);
    let ledger = fork(&network.snapshot);

    let overrides = Overrides {
        borrow_fraction: Some(wad("0.745")),
        ..Overrides::default()
    };
    let plan = plan(ScenarioKind::PriceDecay, &network, &overrides);
    let result = ScenarioRunner::new(&ledger, plan).unwrap().run();

    assert_eq!(result.outcome, ScenarioOutcome::LiquidationTriggered { search_step: 15 });

    let perturbs: Vec<_> = result
        .steps
        .iter()
        .filter(|step| step.action == ActionKind::Perturb)
        .collect();
    assert_eq!(perturbs.len(), 15);
    assert!(!perturbs[13].snapshot.liquidatable);
    assert!(perturbs[14].snapshot.liquidatable);

    // 3000e6 * 0.98^15 = 2215707307.9...
    let price_15 = parse_units(&perturbs[14].params["price"], 6).unwrap();
    let expected = parse_units("2215.707307", 6).unwrap();
    let diff = if price_15 > expected { price_15 - expected } else { expected - price_15 };
    assert!(diff <= alloy_primitives::U256::from(1u64), "price_15 = {price_15}");
}

#[test]
fn test_max_debt_and_borrow_target() {
    let config = mainnet();
    let mut network = network(&config);
    set_collateral_factors(&mut network, "USDT", "0.8");
    let ledger = fork(&network.snapshot);

    // 1000 USDT at $1 with CF 0.80
    let plan = plan(ScenarioKind::StablecoinDepeg, &network, &Overrides::default());
    let result = ScenarioRunner::new(&ledger, plan).unwrap().run();

    let borrow = result
        .steps
        .iter()
        .find(|step| step.action == ActionKind::Borrow)
        .unwrap();
    assert_eq!(borrow.params["max_debt_usd"], "800.0");
    assert_eq!(borrow.params["borrow_capacity_usd"], "800.0");
    assert_eq!(borrow.params["value_usd"], "760.0");
    assert_eq!(borrow.params["amount"], "760.0");
    // Borrow principal rounds up by at most one base unit
    let debt = result.before.unwrap().debt_value_usd;
    assert!(debt >= Wad::from_units(760) && debt <= wad("760.000001"), "debt {debt}");
}

#[test]
fn test_borrow_over_capacity_leaves_supply_only() {
    let config = mainnet();
    let network = network(&config);
    let ledger = fork(&network.snapshot);
    let usdt = network.asset("USDT").unwrap().token;

    let mut plan = plan(ScenarioKind::StablecoinDepeg, &network, &Overrides::default());
    plan.position.as_mut().unwrap().borrow = Some(BorrowTarget::Amount(parse_units("900", 6).unwrap()));
    let runner = ScenarioRunner::new(&ledger, plan).unwrap();
    let account = runner.account();
    let result = runner.run();

    assert_eq!(result.outcome, ScenarioOutcome::Aborted);
    assert_eq!(result.exit_code(), exit_codes::ABORTED);
    let abort = result.abort.as_ref().unwrap();
    assert_eq!(abort.phase, Phase::Positioned);
    assert!(abort.reason.starts_with("insufficient capacity"), "{}", abort.reason);

    let supplied_at = result.steps.last().unwrap();
    assert_eq!(supplied_at.action, ActionKind::Supply);
    assert_eq!(ledger.block_number().unwrap(), supplied_at.block_number);

    let market = CometMarket::new(&ledger, network.market);
    assert_eq!(market.borrow_balance_of(account).unwrap(), alloy_primitives::U256::ZERO);
    assert_eq!(
        market.collateral_balance_of(account, usdt).unwrap(),
        parse_units("1000", 6).unwrap()
    );
}

#[test]
fn test_budget_five_exhausts() {
    let config = mainnet();
    let network = network(&config);
    let ledger = fork(&network.snapshot);

    let overrides = Overrides {
        decay: Some(wad("0.999")),
        max_steps: Some(5),
        ..Overrides::default()
    };
    let result = ScenarioRunner::new(&ledger, plan(ScenarioKind::PriceDecay, &network, &overrides))
        .unwrap()
        .run();

    assert_eq!(result.outcome, ScenarioOutcome::Exhausted { steps: 5 });
    assert_eq!(result.search_steps, 5);
    assert_eq!(result.phase, Phase::Aborted);
    assert_eq!(result.exit_code(), exit_codes::EXHAUSTED);
    let abort = result.abort.unwrap();
    assert_eq!(abort.phase, Phase::Searching);
    assert!(abort.snapshot.is_some());
}

#[test]
fn test_each_price_step_mines_one_block() {
    let config = mainnet();
    let network = network(&config);
    let ledger = fork(&network.snapshot);

    let result = ScenarioRunner::new(&ledger, plan(ScenarioKind::PriceDecay, &network, &Overrides::default()))
        .unwrap()
        .run();

    let blocks: Vec<u64> = result
        .steps
        .iter()
        .filter(|step| step.action == ActionKind::Perturb)
        .map(|step| step.block_number)
        .collect();
    assert!(!blocks.is_empty());
    for pair in blocks.windows(2) {
        assert_eq!(pair[1], pair[0] + 1);
    }
}

#[test]
fn test_feed_restored_after_completed_and_aborted_runs() {
    let config = mainnet();
    let network = network(&config);
    let feed = feed_of(&network, "WETH");

    for max_steps in [120, 1] {
        let ledger = fork(&network.snapshot);
        let code = ledger.get_code(feed).unwrap();
        let answer = PriceFeed::new(&ledger, feed).latest_answer().unwrap();

        let overrides = Overrides {
            max_steps: Some(max_steps),
            ..Overrides::default()
        };
        let result = ScenarioRunner::new(&ledger, plan(ScenarioKind::PriceDecay, &network, &overrides))
            .unwrap()
            .run();
        let expected_phase = if max_steps == 1 { Phase::Aborted } else { Phase::Completed };
        assert_eq!(result.phase, expected_phase);

        assert_eq!(ledger.get_code(feed).unwrap(), code);
        assert_eq!(PriceFeed::new(&ledger, feed).latest_answer().unwrap(), answer);
    }
}

#[test]
fn test_impersonation_released_on_success_and_failure() {
    let config = mainnet();
    let network = network(&config);

    let ledger = fork(&network.snapshot);
    let result = ScenarioRunner::new(&ledger, plan(ScenarioKind::FundAccount, &network, &Overrides::default()))
        .unwrap()
        .run();
    assert_eq!(result.phase, Phase::Completed);
    assert!(ledger.impersonating().unwrap().is_empty());

    // More than the whale holds
    let ledger = fork(&network.snapshot);
    let overrides = Overrides {
        fund_amount: Some("900000000".to_string()),
        ..Overrides::default()
    };
    let result = ScenarioRunner::new(&ledger, plan(ScenarioKind::FundAccount, &network, &overrides))
        .unwrap()
        .run();
    assert_eq!(result.phase, Phase::Aborted);
    assert_eq!(result.abort.unwrap().phase, Phase::Funding);
    assert!(result.steps.is_empty());
    assert!(ledger.impersonating().unwrap().is_empty());
}

#[test]
fn test_price_shock_liquidates_in_one_step() {
    let result = run_named(&mainnet(), NETWORK, ScenarioKind::PriceShock, &Overrides::default()).unwrap();
    assert_eq!(result.outcome, ScenarioOutcome::LiquidationTriggered { search_step: 1 });
    let shock = result
        .steps
        .iter()
        .find(|step| step.action == ActionKind::Perturb)
        .unwrap();
    assert_eq!(shock.params["price"], "500.0");
}

#[test]
fn test_shock_above_threshold_exhausts() {
    let overrides = Overrides {
        shock_price: Some("2400".to_string()),
        ..Overrides::default()
    };
    let result = run_named(&mainnet(), NETWORK, ScenarioKind::PriceShock, &overrides).unwrap();
    assert_eq!(result.outcome, ScenarioOutcome::Exhausted { steps: 1 });
}

#[test]
fn test_supply_simulation_reports_rates() {
    let result = run_named(&mainnet(), NETWORK, ScenarioKind::SupplySimulation, &Overrides::default()).unwrap();
    assert_eq!(result.outcome, ScenarioOutcome::Unstressed);
    let labels: Vec<&str> = result.rates.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["before supply", "after supply"]);
    // More supply, lower utilization
    assert!(result.rates[1].utilization < result.rates[0].utilization);
    // Supply principal rounds down by at most one base unit
    let supplied = parse_units(&result.after.unwrap().base_balance, 6).unwrap();
    let expected = parse_units("1000", 6).unwrap();
    assert!(supplied <= expected && expected - supplied <= alloy_primitives::U256::from(1u64));
}

#[test]
fn test_every_named_scenario_completes() {
    let config = mainnet();
    for kind in ScenarioKind::ALL {
        let result = run_named(&config, NETWORK, kind, &Overrides::default()).unwrap();
        assert_eq!(result.exit_code(), exit_codes::OK, "{kind}: {:?}", result.abort);
        assert_eq!(result.scenario, kind.name());
    }
}

#[test]
fn test_unknown_network_is_rejected() {
    let err = run_named(&mainnet(), "goerli", ScenarioKind::PriceDecay, &Overrides::default()).unwrap_err();
    assert!(matches!(err, risk_scenario::ScenarioError::Configuration(_)));
}

#[test]
fn test_json_report() {
    let result = run_named(&mainnet(), NETWORK, ScenarioKind::PriceDecay, &Overrides::default()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
    assert_eq!(json["scenario"], "price-decay");
    assert_eq!(json["outcome"]["kind"], "liquidation_triggered");
    assert_eq!(json["phase"], "completed");
    assert!(json["steps"].as_array().unwrap().len() >= 5);
}
