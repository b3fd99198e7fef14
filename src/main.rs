//! Demo driver - runs the engine against the paper wallet and market.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tradebatch::book::FileBook;
use tradebatch::core::{shared_book, Config, Schedule, TradeRequest, Wallet};
use tradebatch::paper::{PaperMarket, PaperWallet};
use tradebatch::{Broker, Trader};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load_default();
    let book = shared_book(FileBook::open(&config.ledger.path)?);

    let wallet = Arc::new(PaperWallet::new("paper-wallet"));
    wallet.credit("main", Decimal::from(100));
    let market = Arc::new(PaperMarket::new("paper"));
    market.set_price("RTC", "USD", Decimal::new(185, 1));

    let mut broker = Broker::new(book.clone(), wallet.clone(), &config);
    broker.add_market("paper", market.clone());
    broker.recover()?;
    let broker = Arc::new(RwLock::new(broker));

    let trader = Trader::new(book, broker.clone(), config);
    trader.write().recover()?;
    trader.write().subscribe(|ev| {
        info!("trade {} -> {}", ev.trade.id, ev.trade.status);
    });

    let trade_id = trader.write().place_trade(TradeRequest {
        market: None,
        amount: Decimal::from(3),
        sell_currency: "RTC".into(),
        target_currency: "USD".into(),
        price: None,
        deposit_address: None,
        withdraw_address: Some("savings".into()),
        schedule: Schedule::Now,
    })?;
    info!("placed demo trade {}", trade_id);

    for _ in 0..600 {
        trader.write().process_trades()?;
        broker.write().process_orders()?;
        market.step(&wallet);

        let trade = trader.read().get_trade(trade_id)?;
        if trade.status.is_terminal() {
            info!(
                "demo trade settled as {} ({} at savings)",
                trade.status,
                wallet.get_address_balance("savings")?
            );
            break;
        }
        thread::sleep(Duration::from_millis(250));
    }
    Ok(())
}
