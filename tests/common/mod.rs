//! Shared harness for integration tests.

#![allow(dead_code)]

use perps_clearing::*;

pub const DISPATCHER: Wallet = Wallet([0xd1; 20]);
pub const FEE_WALLET: Wallet = Wallet([0xfe; 20]);
pub const INSURANCE_FUND: Wallet = Wallet([0x1f; 20]);
pub const EXIT_FUND: Wallet = Wallet([0xef; 20]);
pub const GOVERNANCE: Wallet = Wallet([0x90; 20]);

pub const NOW_MS: i64 = 1_700_000_000_000;
const NODE: [u8; 6] = [7, 7, 7, 7, 7, 7];

pub fn pips(whole: i64) -> Pip {
    Pip::from_whole(whole).unwrap()
}

pub fn wallets() -> PrivilegedWallets {
    PrivilegedWallets {
        dispatcher: DISPATCHER,
        fee_wallet: FEE_WALLET,
        insurance_fund: INSURANCE_FUND,
        exit_fund: EXIT_FUND,
        governance: GOVERNANCE,
    }
}

pub fn oracle() -> WalletKey {
    WalletKey::from_seed("oracle").unwrap()
}

pub fn key(name: &str) -> WalletKey {
    WalletKey::from_seed(name).unwrap()
}

/// 8-decimal "USD" quote, one active ETH market at 2000.
pub fn engine() -> Engine {
    let config = ExchangeConfig::testnet("USD", 8, wallets()).with_index_price_signer(oracle().wallet());
    let mut engine = Engine::new(config, EngineConfig::default()).unwrap();
    engine.set_time(Timestamp::from_millis(NOW_MS));
    engine
        .add_market(&GOVERNANCE, "ETH", OverridableMarketFields::standard(), pips(2_000))
        .unwrap();
    engine.activate_market(&DISPATCHER, "ETH").unwrap();
    engine
}

/// Deposits and applies `whole` quote units.
pub fn fund(engine: &mut Engine, wallet: &Wallet, whole: u128) {
    let pending = engine.deposit(wallet, whole * 100_000_000).unwrap();
    engine.apply_pending_deposit(&DISPATCHER, wallet, pending).unwrap();
}

pub fn nonce(engine: &Engine) -> Nonce {
    Nonce::from_timestamp_ms(engine.time().as_millis() as u64, &NODE)
}

pub fn signed_order(engine: &Engine, key: &WalletKey, side: OrderSide, quantity: Pip, price: Pip) -> SignedOrder {
    let order = Order::limit(key.wallet(), "ETH", side, quantity, price, nonce(engine));
    let signature = key.sign(&order.hash()).unwrap();
    SignedOrder {
        order,
        authorization: Authorization::Direct { signature },
    }
}

pub fn trade(quantity: Pip, price: Pip, maker_fee: Pip, taker_fee: Pip, maker_side: OrderSide) -> Trade {
    Trade {
        base_symbol: "ETH".to_string(),
        base_quantity: quantity,
        quote_quantity: quantity.multiply(price).unwrap(),
        price,
        maker_fee,
        taker_fee,
        maker_side,
    }
}

/// `buyer` lifts `seller`'s resting offer with no fees.
pub fn execute(
    engine: &mut Engine,
    buyer: &WalletKey,
    seller: &WalletKey,
    quantity: Pip,
    price: Pip,
) -> Result<TradeResult, EngineError> {
    let buy = signed_order(engine, buyer, OrderSide::Buy, quantity, price);
    let sell = signed_order(engine, seller, OrderSide::Sell, quantity, price);
    let trade = trade(quantity, price, Pip::ZERO, Pip::ZERO, OrderSide::Sell);
    engine.execute_trade(&DISPATCHER, &buy, &sell, &trade)
}

/// Advances the clock and publishes a signed ETH index price.
pub fn publish_price(engine: &mut Engine, price: Pip) {
    engine.advance_time(60_000);
    let signed = IndexPrice::sign(&oracle(), "ETH", engine.time(), price).unwrap();
    engine.publish_index_prices(&DISPATCHER, &[signed]).unwrap();
}

/// Sum of every quote balance plus pending deposits.
pub fn total_quote(engine: &Engine) -> i128 {
    engine
        .ledger()
        .entries()
        .filter(|(_, asset, _)| *asset == "USD")
        .map(|(_, _, balance)| balance.balance.raw() as i128)
        .sum()
}

/// Net open interest across all wallets. Zero when every long has a short.
pub fn net_position(engine: &Engine) -> i128 {
    engine
        .ledger()
        .entries()
        .filter(|(_, asset, _)| *asset == "ETH")
        .map(|(_, _, balance)| balance.balance.raw() as i128)
        .sum()
}
