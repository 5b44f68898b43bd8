//! Clearing core simulation.
//!
//! Walks one market through deposits, a signed trade, index prices and
//! funding, an in-maintenance deleverage, a withdrawal and a wallet exit.
//! Set `RUST_LOG=debug` to see every emitted event.

use perps_clearing::*;
use rust_decimal_macros::dec;
use std::error::Error;
use tracing_subscriber::EnvFilter;

type SimResult<T = ()> = Result<T, Box<dyn Error>>;

const NODE: [u8; 6] = [0x5e, 0x11, 0, 0, 0, 1];
const START_MS: i64 = 1_700_000_000_000;

const DISPATCHER: Wallet = Wallet([0xd1; 20]);
const FEE_WALLET: Wallet = Wallet([0xfe; 20]);
const INSURANCE_FUND: Wallet = Wallet([0x1f; 20]);
const EXIT_FUND: Wallet = Wallet([0xef; 20]);
const GOVERNANCE: Wallet = Wallet([0x90; 20]);

struct Sim {
    engine: Engine,
    oracle: WalletKey,
    alice: WalletKey,
    bob: WalletKey,
    carol: WalletKey,
    dave: WalletKey,
}

fn main() -> SimResult {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    println!("Perpetual Futures Clearing Simulation");
    println!("One ETH market, cross margin, USDC collateral\n");

    let mut sim = setup()?;
    scenario_1_deposits(&mut sim)?;
    scenario_2_signed_trade(&mut sim)?;
    scenario_3_prices_and_funding(&mut sim)?;
    scenario_4_maintenance_deleverage(&mut sim)?;
    scenario_5_withdrawal(&mut sim)?;
    scenario_6_wallet_exit(&mut sim)?;

    println!("\nAll scenarios completed. {} events emitted.", sim.engine.events().len());
    Ok(())
}

fn setup() -> SimResult<Sim> {
    let oracle = WalletKey::from_seed("oracle")?;
    let wallets = PrivilegedWallets {
        dispatcher: DISPATCHER,
        fee_wallet: FEE_WALLET,
        insurance_fund: INSURANCE_FUND,
        exit_fund: EXIT_FUND,
        governance: GOVERNANCE,
    };
    let config = ExchangeConfig::testnet("USDC", 6, wallets).with_index_price_signer(oracle.wallet());

    let mut engine = Engine::new(config, EngineConfig::default())?;
    engine.set_time(Timestamp::from_millis(START_MS));
    engine.add_market(&GOVERNANCE, "ETH", OverridableMarketFields::standard(), Pip::from_whole(2_000)?)?;
    engine.activate_market(&DISPATCHER, "ETH")?;

    Ok(Sim {
        engine,
        oracle,
        alice: WalletKey::from_seed("alice")?,
        bob: WalletKey::from_seed("bob")?,
        carol: WalletKey::from_seed("carol")?,
        dave: WalletKey::from_seed("dave")?,
    })
}

/// Deposits land in pending until the dispatcher applies them.
fn scenario_1_deposits(sim: &mut Sim) -> SimResult {
    println!("Scenario 1: Deposits\n");

    for (name, key, usdc) in [
        ("Alice", &sim.alice, 50_000u128),
        ("Bob", &sim.bob, 50_000),
        ("Carol", &sim.carol, 1_000),
        ("Dave", &sim.dave, 50_000),
    ] {
        let wallet = key.wallet();
        let pending = sim.engine.deposit(&wallet, usdc * 1_000_000)?;
        let balance = sim.engine.apply_pending_deposit(&DISPATCHER, &wallet, pending)?;
        println!("  {name} deposits {usdc} USDC, quote balance {balance}");
    }
    println!();
    Ok(())
}

/// Alice buys 10 ETH from Bob. Bob rests on the book and earns a rebate.
fn scenario_2_signed_trade(sim: &mut Sim) -> SimResult {
    println!("Scenario 2: Signed Trade\n");

    let price = Pip::from_whole(2_000)?;
    let quantity = Pip::from_whole(10)?;
    let trade = Trade {
        base_symbol: "ETH".to_string(),
        base_quantity: quantity,
        quote_quantity: quantity.multiply(price)?,
        price,
        maker_fee: Pip::from_whole(-2)?,
        taker_fee: Pip::from_whole(10)?,
        maker_side: OrderSide::Sell,
    };
    let buy = sign_order(&sim.engine, &sim.alice, OrderSide::Buy, quantity, Some(price))?;
    let sell = sign_order(&sim.engine, &sim.bob, OrderSide::Sell, quantity, Some(price))?;
    let result = sim.engine.execute_trade(&DISPATCHER, &buy, &sell, &trade)?;

    println!("  Alice BUY 10 ETH @ {price} (taker fee {})", trade.taker_fee);
    println!("  Bob SELL 10 ETH @ {price} (maker rebate {})", trade.maker_fee.abs()?);
    println!("  Fee wallet income: {}", result.fee_income);
    print_balances(sim, &[("Alice", sim.alice.wallet()), ("Bob", sim.bob.wallet()), ("Fees", FEE_WALLET)]);
    Ok(())
}

fn scenario_3_prices_and_funding(sim: &mut Sim) -> SimResult {
    println!("Scenario 3: Index Prices and Funding\n");

    publish_price(sim, 2_050)?;
    let rate = Pip::from_decimal(dec!(0.0001))?;
    let period = sim.engine.publish_funding_rate(&DISPATCHER, "ETH", rate)?;
    println!("  Funding period {period} published at rate {rate}");

    let alice_paid = sim.engine.apply_wallet_funding(&sim.alice.wallet())?;
    let bob_paid = sim.engine.apply_wallet_funding(&sim.bob.wallet())?;
    println!("  Alice funding {alice_paid}, Bob funding {bob_paid}");

    let summary = sim.engine.margin_summary(&sim.alice.wallet(), PriceSource::Index)?;
    println!(
        "  Alice account value {}, initial requirement {}, maintenance requirement {}\n",
        summary.total_account_value, summary.initial_requirement, summary.maintenance_requirement
    );
    Ok(())
}

/// Carol opens 10 ETH on 1000 USDC. A drop to 1950 puts her in maintenance
/// and Bob's short absorbs the position at her bankruptcy price of 1900.
fn scenario_4_maintenance_deleverage(sim: &mut Sim) -> SimResult {
    println!("Scenario 4: In-Maintenance Deleverage\n");

    let price = Pip::from_whole(2_000)?;
    let quantity = Pip::from_whole(10)?;
    let trade = Trade {
        base_symbol: "ETH".to_string(),
        base_quantity: quantity,
        quote_quantity: quantity.multiply(price)?,
        price,
        maker_fee: Pip::ZERO,
        taker_fee: Pip::ZERO,
        maker_side: OrderSide::Sell,
    };
    let buy = sign_order(&sim.engine, &sim.carol, OrderSide::Buy, quantity, None)?;
    let sell = sign_order(&sim.engine, &sim.dave, OrderSide::Sell, quantity, Some(price))?;
    sim.engine.execute_trade(&DISPATCHER, &buy, &sell, &trade)?;
    println!("  Carol BUY 10 ETH @ {price} against Dave");

    publish_price(sim, 1_950)?;
    let carol = sim.carol.wallet();
    let summary = sim.engine.margin_summary(&carol, PriceSource::Index)?;
    println!(
        "  Carol account value {} vs maintenance {}",
        summary.total_account_value, summary.maintenance_requirement
    );

    let request = DeleverageRequest {
        base_symbol: "ETH".to_string(),
        liquidating_wallet: carol,
        counterparty: sim.bob.wallet(),
        liquidation_base_quantity: quantity,
        liquidation_quote_quantity: Pip::from_whole(19_000)?,
    };
    let result = sim
        .engine
        .deleverage(&DISPATCHER, DeleverageMode::InMaintenanceAcquisition, &request)?;
    println!(
        "  Deleveraged {} ETH for {} ({:?} basis)",
        result.base_quantity.abs()?,
        result.quote_quantity,
        result.basis
    );
    print_balances(sim, &[("Carol", carol), ("Bob", sim.bob.wallet())]);
    Ok(())
}

fn scenario_5_withdrawal(sim: &mut Sim) -> SimResult {
    println!("Scenario 5: Withdrawal\n");

    let withdrawal = Withdrawal {
        wallet: sim.bob.wallet(),
        nonce: next_nonce(&sim.engine),
        quantity: Pip::from_whole(1_000)?,
        gas_fee: Pip::from_whole(1)?,
    };
    let signed = SignedWithdrawal {
        signature: sim.bob.sign(&withdrawal.hash())?,
        withdrawal,
    };
    let result = sim.engine.withdraw(&DISPATCHER, &signed)?;
    println!(
        "  Bob withdraws {} (gas fee {}), {} asset units leave custody",
        result.quantity, result.gas_fee, result.asset_units
    );

    match sim.engine.withdraw(&DISPATCHER, &signed) {
        Ok(_) => println!("  Replay unexpectedly accepted"),
        Err(err) => println!("  Replay rejected: {err}"),
    }
    println!();
    Ok(())
}

/// Alice exits. After the propagation window her position moves to the exit
/// fund and the remaining quote is paid out once.
fn scenario_6_wallet_exit(sim: &mut Sim) -> SimResult {
    println!("Scenario 6: Wallet Exit\n");

    let alice = sim.alice.wallet();
    let exit = sim.engine.exit_wallet(&alice)?;
    println!("  Alice exits, effective at block {}", exit.effective_block);

    let blocks = sim.engine.config().chain_propagation_period_blocks;
    sim.engine.advance_blocks(blocks);
    let first = sim.engine.withdraw_exit(&alice)?;
    println!(
        "  Exit withdrawal: {} paid, {} positions closed at {:?} basis",
        first.quantity, first.positions_closed, first.basis
    );
    let second = sim.engine.withdraw_exit(&alice)?;
    println!("  Second exit withdrawal pays {}", second.quantity);

    println!(
        "  Exit fund holds positions since block {:?}, system recovery: {}",
        sim.engine.exit_fund_position_opened_at(),
        sim.engine.is_system_recovery()?
    );
    print_balances(sim, &[("Alice", alice), ("Exit fund", EXIT_FUND)]);
    Ok(())
}

fn next_nonce(engine: &Engine) -> Nonce {
    Nonce::from_timestamp_ms(engine.time().as_millis().max(0) as u64, &NODE)
}

fn sign_order(
    engine: &Engine,
    key: &WalletKey,
    side: OrderSide,
    quantity: Pip,
    limit_price: Option<Pip>,
) -> SimResult<SignedOrder> {
    let nonce = next_nonce(engine);
    let order = match limit_price {
        Some(price) => Order::limit(key.wallet(), "ETH", side, quantity, price, nonce),
        None => Order::market(key.wallet(), "ETH", side, quantity, nonce),
    };
    let signature = key.sign(&order.hash())?;
    Ok(SignedOrder {
        order,
        authorization: Authorization::Direct { signature },
    })
}

fn publish_price(sim: &mut Sim, whole: i64) -> SimResult {
    sim.engine.advance_time(60 * 60 * 1000);
    let price = Pip::from_whole(whole)?;
    let signed = IndexPrice::sign(&sim.oracle, "ETH", sim.engine.time(), price)?;
    sim.engine.publish_index_prices(&DISPATCHER, &[signed])?;
    println!("  Index price ETH = {price}");
    Ok(())
}

fn print_balances(sim: &Sim, wallets: &[(&str, Wallet)]) {
    println!();
    for (name, wallet) in wallets {
        let position = sim.engine.position(wallet, "ETH");
        println!(
            "  {:<10} quote {:>12}  ETH {:>6}  cost basis {:>10}",
            name,
            sim.engine.quote_balance(wallet),
            position.balance,
            position.cost_basis
        );
    }
    println!();
}
