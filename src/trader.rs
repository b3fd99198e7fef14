//! Trade scheduler - accepts, bundles and submits user trades
//!
//! `Trader` records incoming trade requests in the ledger, groups
//! compatible pending trades into in-memory bundles and hands each due
//! bundle to the broker as one order. Order updates flow back through
//! the broker's event bus and are folded into the per-trade status.
//!
//! Bundles are deliberately not persisted: after a restart they are
//! recomputed from the `Recorded` trades in the ledger, so there is no
//! second source of truth to keep consistent.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::Broker;
use crate::core::{
    BrokerOrder, Config, DepositLeg, Error, ExchangeLeg, Leg, OpStatus, OrderStage, Record, Result,
    Schedule, SharedBook, TradeInfo, TradeOrder, TradeRequest, TradeStatus, WithdrawLeg,
};
use crate::events::{EventBus, OrderEvent, TradeEvent};

/// The user-facing scheduler.
pub struct Trader {
    book: SharedBook,
    broker: Arc<RwLock<Broker>>,
    config: Config,
    /// Pending bundles, awaiting their execution time
    pending: Vec<TradeOrder>,
    /// Ledger sequence id per known trade
    trade_seqs: HashMap<Uuid, u64>,
    events: EventBus<TradeEvent>,
    next_wake: Option<DateTime<Utc>>,
}

impl Trader {
    /// Build a trader wired to the broker's event bus.
    pub fn new(book: SharedBook, broker: Arc<RwLock<Broker>>, config: Config) -> Arc<RwLock<Self>> {
        let trader = Arc::new(RwLock::new(Self {
            book,
            broker: broker.clone(),
            config,
            pending: Vec::new(),
            trade_seqs: HashMap::new(),
            events: EventBus::new(),
            next_wake: None,
        }));

        let handle = Arc::downgrade(&trader);
        broker.write().subscribe(move |ev: &OrderEvent| {
            if let Some(trader) = handle.upgrade() {
                if let Err(e) = trader.write().on_order_update(&ev.order) {
                    warn!("trade update for order {} failed: {}", ev.order.id, e);
                }
            }
        });
        trader
    }

    /// Subscribe to trade-update events.
    pub fn subscribe(&mut self, listener: impl Fn(&TradeEvent) + Send + Sync + 'static) {
        self.events.subscribe(listener);
    }

    /// Rebuild trade bookkeeping from the ledger. `Recorded` trades are
    /// rebundled; placed ones are already owned by a broker order.
    pub fn recover(&mut self) -> Result<usize> {
        let mut trades: Vec<(u64, TradeInfo)> = Vec::new();
        self.book.read().each_entry(&mut |seq, record| {
            if let Record::Trade(trade) = record {
                trades.push((seq, trade.clone()));
            }
            true
        })?;

        let now = Utc::now();
        let mut rebundled = 0;
        for (seq, trade) in trades {
            self.trade_seqs.insert(trade.id, seq);
            if trade.status == TradeStatus::Recorded {
                let exec_time = self.resolve_schedule(&trade, now);
                self.bundle_trade(&trade, exec_time);
                rebundled += 1;
            }
        }
        info!("recovered {} pending trades from ledger", rebundled);
        Ok(rebundled)
    }

    /// Accept a trade request: validate, persist as `Recorded`, bundle.
    pub fn place_trade(&mut self, req: TradeRequest) -> Result<Uuid> {
        if !self.config.trading.enabled {
            return Err(Error::Refused("trading is disabled".into()));
        }
        if req.amount <= Decimal::ZERO {
            return Err(Error::BadArgs(format!(
                "trade amount must be positive, got {}",
                req.amount
            )));
        }
        if req.sell_currency.trim().is_empty() || req.target_currency.trim().is_empty() {
            return Err(Error::BadArgs("trade currencies must be set".into()));
        }

        let now = Utc::now();
        let trade = TradeInfo::from_request(req, now);
        let seq = self.book.write().add_entry(&Record::Trade(trade.clone()))?;
        self.trade_seqs.insert(trade.id, seq);

        let exec_time = self.resolve_schedule(&trade, now);
        self.bundle_trade(&trade, exec_time);
        info!(
            "recorded trade {}: {} {} -> {} due {}",
            trade.id, trade.amount, trade.sell_currency, trade.target_currency, exec_time
        );

        let id = trade.id;
        self.events.post(&TradeEvent { trade });
        Ok(id)
    }

    /// One scheduling pass: submit every due bundle that clears its
    /// minimum-value floor.
    pub fn process_trades(&mut self) -> Result<()> {
        let now = Utc::now();
        let mut wake: Option<DateTime<Utc>> = None;
        let mut submitted: Vec<usize> = Vec::new();

        for (i, bundle) in self.pending.iter().enumerate() {
            if bundle.exec_time > now {
                bump_wake(&mut wake, bundle.exec_time);
                continue;
            }
            let floor = self.config.trading.min_value(&bundle.sell_currency);
            if bundle.amount < floor {
                // Held until more trades arrive; not an error.
                debug!(
                    "bundle of {} {} below minimum {}, holding",
                    bundle.amount, bundle.sell_currency, floor
                );
                continue;
            }
            match self.submit_bundle(bundle, now) {
                Ok(order_id) => {
                    info!(
                        "submitted bundle of {} trades as order {}",
                        bundle.trades.len(),
                        order_id
                    );
                    submitted.push(i);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("bundle submission failed, will retry: {}", e);
                    bump_wake(&mut wake, now);
                }
            }
        }

        let mut idx = 0;
        self.pending.retain(|_| {
            let keep = !submitted.contains(&idx);
            idx += 1;
            keep
        });
        self.next_wake = wake;
        Ok(())
    }

    /// Cancel a trade. A still-`Recorded` trade is taken out of its
    /// bundle directly; a placed one forwards to the broker.
    pub fn cancel_trade(&mut self, id: Uuid) -> Result<()> {
        let (seq, mut trade) = self.load_trade(id)?;
        match trade.status {
            TradeStatus::Recorded => {
                self.unbundle(id, trade.amount);
                trade.status = TradeStatus::Cancelled;
                trade.time_completed = Some(Utc::now());
                self.store_trade(seq, &trade)?;
                info!("trade {} cancelled before placement", id);
                self.events.post(&TradeEvent { trade });
                Ok(())
            }
            TradeStatus::Placed | TradeStatus::Executing => {
                let order_id = trade.order_id.ok_or_else(|| {
                    Error::Fatal(format!("trade {} placed without an order", id))
                })?;
                self.broker.write().cancel_order(order_id)
            }
            status => Err(Error::Refused(format!("trade {} already {}", id, status))),
        }
    }

    /// Fold a broker order update into the status of its trades.
    pub fn on_order_update(&mut self, order: &BrokerOrder) -> Result<()> {
        let Some(target) = derive_trade_status(order) else {
            return Ok(());
        };

        let mut affected: Vec<(u64, TradeInfo)> = Vec::new();
        self.book.read().each_entry(&mut |seq, record| {
            if let Record::Trade(trade) = record {
                if trade.order_id == Some(order.id) {
                    affected.push((seq, trade.clone()));
                }
            }
            true
        })?;

        let now = Utc::now();
        for (seq, mut trade) in affected {
            // A terminal trade never changes again; repeated updates for
            // the same status are dropped.
            if trade.status == target || trade.status.is_terminal() {
                continue;
            }
            trade.status = target;
            if target == TradeStatus::Executing && trade.time_executed.is_none() {
                trade.time_executed = Some(now);
            }
            if target.is_terminal() {
                trade.time_completed = Some(now);
            }
            self.store_trade(seq, &trade)?;
            info!("trade {} is now {}", trade.id, trade.status);
            self.events.post(&TradeEvent { trade });
        }
        Ok(())
    }

    pub fn get_trade(&self, id: Uuid) -> Result<TradeInfo> {
        Ok(self.load_trade(id)?.1)
    }

    /// Iterate every trade in the ledger, in sequence order.
    pub fn each_trade(&self, f: &mut dyn FnMut(&TradeInfo) -> bool) -> Result<()> {
        self.book.read().each_entry(&mut |_, record| {
            if let Record::Trade(trade) = record {
                return f(trade);
            }
            true
        })
    }

    pub fn pending_bundles(&self) -> &[TradeOrder] {
        &self.pending
    }

    /// Earliest time the next pass has something to do, if known.
    pub fn next_wake(&self) -> Option<DateTime<Utc>> {
        self.next_wake
    }

    fn resolve_schedule(&self, trade: &TradeInfo, now: DateTime<Utc>) -> DateTime<Utc> {
        match trade.schedule {
            Schedule::Now => now,
            Schedule::Later { at } => at,
            Schedule::OnSchedule => self
                .config
                .schedule_for(trade.market.as_deref())
                .next_after(now),
        }
    }

    /// Add a trade to a compatible pending bundle, or open a new one.
    ///
    /// A trade may join a bundle due no later than its own execution
    /// time; joining never pushes a bundle's due time back, so no trade
    /// is ever delayed by bundling.
    fn bundle_trade(&mut self, trade: &TradeInfo, trade_time: DateTime<Utc>) {
        for bundle in &mut self.pending {
            if bundle_matches(bundle, trade) && bundle.exec_time <= trade_time {
                bundle.amount += trade.amount;
                bundle.trades.push(trade.id);
                debug!("trade {} joined bundle due {}", trade.id, bundle.exec_time);
                return;
            }
        }
        self.pending.push(TradeOrder::from_trade(trade, trade_time));
    }

    fn unbundle(&mut self, id: Uuid, amount: Decimal) {
        for bundle in &mut self.pending {
            if let Some(pos) = bundle.trades.iter().position(|t| *t == id) {
                bundle.trades.remove(pos);
                bundle.amount -= amount;
                break;
            }
        }
        self.pending.retain(|b| !b.trades.is_empty());
    }

    /// Submit one bundle to the broker and mark its trades `Placed`.
    fn submit_bundle(&self, bundle: &TradeOrder, now: DateTime<Utc>) -> Result<Uuid> {
        let market = bundle
            .market
            .clone()
            .unwrap_or_else(|| self.config.trading.default_market.clone());
        let order = BrokerOrder::new(
            market,
            DepositLeg {
                from_address: bundle.deposit_address.clone(),
                amount: bundle.amount,
                ..Default::default()
            },
            ExchangeLeg {
                amount: bundle.amount,
                sell_currency: bundle.sell_currency.clone(),
                target_currency: bundle.target_currency.clone(),
                price: bundle.price,
                ..Default::default()
            },
            WithdrawLeg {
                to_address: bundle.withdraw_address.clone(),
                fraction: if bundle.withdraw_address.is_some() {
                    Decimal::ONE
                } else {
                    Decimal::ZERO
                },
                ..Default::default()
            },
        );
        let order_id = self.broker.write().place_order(order)?;

        for trade_id in &bundle.trades {
            let (seq, mut trade) = match self.load_trade(*trade_id) {
                Ok(found) => found,
                // The order is already placed; a bundled trade missing
                // from the ledger is unrecoverable bookkeeping damage.
                Err(Error::NoData(m)) => return Err(Error::Fatal(format!("bundled {}", m))),
                Err(e) => return Err(e),
            };
            trade.status = TradeStatus::Placed;
            trade.order_id = Some(order_id);
            trade.time_placed = Some(now);
            self.store_trade(seq, &trade)?;
            self.events.post(&TradeEvent { trade });
        }
        Ok(order_id)
    }

    fn load_trade(&self, id: Uuid) -> Result<(u64, TradeInfo)> {
        let seq = *self
            .trade_seqs
            .get(&id)
            .ok_or_else(|| Error::NoData(format!("no trade {}", id)))?;
        match self.book.read().get_entry(seq)? {
            Some(Record::Trade(trade)) => Ok((seq, trade)),
            _ => Err(Error::Fatal(format!(
                "trade {} missing from ledger at seq {}",
                id, seq
            ))),
        }
    }

    fn store_trade(&self, seq: u64, trade: &TradeInfo) -> Result<()> {
        let known = self
            .book
            .write()
            .update_entry(seq, &Record::Trade(trade.clone()), false)?;
        if !known {
            return Err(Error::Fatal(format!(
                "trade {} vanished from ledger at seq {}",
                trade.id, seq
            )));
        }
        Ok(())
    }
}

fn bundle_matches(bundle: &TradeOrder, trade: &TradeInfo) -> bool {
    bundle.market == trade.market
        && bundle.sell_currency == trade.sell_currency
        && bundle.target_currency == trade.target_currency
        && bundle.price == trade.price
        && bundle.deposit_address == trade.deposit_address
        && bundle.withdraw_address == trade.withdraw_address
}

/// Map an order's state to the status its trades should carry, if any.
fn derive_trade_status(order: &BrokerOrder) -> Option<TradeStatus> {
    if order.stage == OrderStage::Completed {
        // The final non-skipped leg decides the outcome.
        for leg in [Leg::Withdraw, Leg::Exchange, Leg::Deposit] {
            match order.ops[leg].status {
                OpStatus::Completed => return Some(TradeStatus::Completed),
                OpStatus::Abandoned => return Some(TradeStatus::Abandoned),
                OpStatus::Cancelled => return Some(TradeStatus::Cancelled),
                _ => continue,
            }
        }
        return Some(TradeStatus::Completed);
    }
    let active = Leg::ALL
        .iter()
        .any(|&leg| !matches!(order.ops[leg].status, OpStatus::NoStatus | OpStatus::Recorded));
    if active {
        Some(TradeStatus::Executing)
    } else {
        None
    }
}

fn bump_wake(wake: &mut Option<DateTime<Utc>>, at: DateTime<Utc>) {
    match wake {
        Some(current) if *current <= at => {}
        _ => *wake = Some(at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::{FileBook, MemBook};
    use crate::core::{shared_book, Wallet};
    use crate::paper::{PaperMarket, PaperWallet};
    use chrono::Duration;
    use parking_lot::Mutex;

    struct Rig {
        trader: Arc<RwLock<Trader>>,
        broker: Arc<RwLock<Broker>>,
        wallet: Arc<PaperWallet>,
        market: Arc<PaperMarket>,
    }

    impl Rig {
        fn tick(&self) {
            self.trader.write().process_trades().unwrap();
            self.broker.write().process_orders().unwrap();
            self.market.step(&self.wallet);
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.broker.poll_interval_secs = 0;
        config.broker.min_confirmations = 1;
        config
    }

    fn setup_with(book: SharedBook, config: Config) -> Rig {
        let wallet = Arc::new(PaperWallet::new("paper-wallet"));
        wallet.credit("w1", Decimal::from(100));
        let market = Arc::new(PaperMarket::new("paper"));
        market.set_price("RTC", "USD", Decimal::from(2));

        let mut broker = Broker::new(book.clone(), wallet.clone(), &config);
        broker.add_market("paper", market.clone());
        let broker = Arc::new(RwLock::new(broker));
        let trader = Trader::new(book, broker.clone(), config);
        Rig {
            trader,
            broker,
            wallet,
            market,
        }
    }

    fn setup() -> Rig {
        setup_with(shared_book(MemBook::new()), test_config())
    }

    fn request(amount: Decimal, schedule: Schedule) -> TradeRequest {
        TradeRequest {
            market: None,
            amount,
            sell_currency: "RTC".into(),
            target_currency: "USD".into(),
            price: None,
            deposit_address: None,
            withdraw_address: None,
            schedule,
        }
    }

    #[test]
    fn test_place_trade_validation() {
        let rig = setup();
        let mut trader = rig.trader.write();

        assert!(matches!(
            trader.place_trade(request(Decimal::ZERO, Schedule::Now)),
            Err(Error::BadArgs(_))
        ));

        let mut blank = request(Decimal::ONE, Schedule::Now);
        blank.sell_currency = "  ".into();
        assert!(matches!(
            trader.place_trade(blank),
            Err(Error::BadArgs(_))
        ));
    }

    #[test]
    fn test_place_trade_refused_when_disabled() {
        let mut config = test_config();
        config.trading.enabled = false;
        let rig = setup_with(shared_book(MemBook::new()), config);
        assert!(matches!(
            rig.trader.write().place_trade(request(Decimal::ONE, Schedule::Now)),
            Err(Error::Refused(_))
        ));
    }

    #[test]
    fn test_recorded_trade_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.jsonl");
        let later = Schedule::Later {
            at: Utc::now() + Duration::hours(1),
        };

        let id = {
            let rig = setup_with(shared_book(FileBook::open(&path).unwrap()), test_config());
            let id = rig.trader.write().place_trade(request(Decimal::from(2), later)).unwrap();
            rig.tick();
            id
        };

        let rig = setup_with(shared_book(FileBook::open(&path).unwrap()), test_config());
        assert_eq!(rig.trader.write().recover().unwrap(), 1);

        let trader = rig.trader.read();
        let trade = trader.get_trade(id).unwrap();
        assert_eq!(trade.status, TradeStatus::Recorded);
        assert_eq!(trader.pending_bundles().len(), 1);
        assert_eq!(trader.pending_bundles()[0].trades, vec![id]);
    }

    #[test]
    fn test_compatible_trades_share_a_bundle() {
        let rig = setup();
        let mut trader = rig.trader.write();
        trader.place_trade(request(Decimal::from(1), Schedule::Now)).unwrap();
        trader.place_trade(request(Decimal::from(2), Schedule::Now)).unwrap();

        let bundles = trader.pending_bundles();
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].amount, Decimal::from(3));
        assert_eq!(bundles[0].trades.len(), 2);
    }

    #[test]
    fn test_incompatible_trades_bundle_apart() {
        let rig = setup();
        let mut trader = rig.trader.write();
        trader.place_trade(request(Decimal::from(1), Schedule::Now)).unwrap();
        let mut limit = request(Decimal::from(1), Schedule::Now);
        limit.price = Some(Decimal::from(3));
        trader.place_trade(limit).unwrap();

        assert_eq!(trader.pending_bundles().len(), 2);
    }

    #[test]
    fn test_trade_never_joins_later_bundle() {
        let rig = setup();
        let mut trader = rig.trader.write();
        let later = Schedule::Later {
            at: Utc::now() + Duration::hours(1),
        };
        trader.place_trade(request(Decimal::from(1), later)).unwrap();
        trader.place_trade(request(Decimal::from(1), Schedule::Now)).unwrap();

        // Joining the deferred bundle would delay the immediate trade.
        assert_eq!(trader.pending_bundles().len(), 2);
    }

    #[test]
    fn test_min_value_holds_bundle_until_topped_up() {
        let mut config = test_config();
        config
            .trading
            .min_values
            .insert("RTC".to_string(), Decimal::from(5));
        let rig = setup_with(shared_book(MemBook::new()), config);

        let first = rig
            .trader
            .write()
            .place_trade(request(Decimal::ONE, Schedule::Now))
            .unwrap();
        rig.trader.write().process_trades().unwrap();
        assert_eq!(rig.broker.read().open_count(), 0);
        assert_eq!(rig.trader.read().pending_bundles().len(), 1);

        let second = rig
            .trader
            .write()
            .place_trade(request(Decimal::new(45, 1), Schedule::Now))
            .unwrap();
        rig.trader.write().process_trades().unwrap();
        assert_eq!(rig.broker.read().open_count(), 1);
        assert!(rig.trader.read().pending_bundles().is_empty());

        // Both trades ride the same order.
        let trader = rig.trader.read();
        let a = trader.get_trade(first).unwrap();
        let b = trader.get_trade(second).unwrap();
        assert_eq!(a.status, TradeStatus::Placed);
        assert_eq!(b.status, TradeStatus::Placed);
        assert!(a.order_id.is_some());
        assert_eq!(a.order_id, b.order_id);
    }

    #[test]
    fn test_trade_completes_end_to_end() {
        let rig = setup();

        let terminal_events = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&terminal_events);
        rig.trader.write().subscribe(move |ev: &TradeEvent| {
            if ev.trade.status.is_terminal() {
                log.lock().push(ev.trade.id);
            }
        });

        let mut req = request(Decimal::from(3), Schedule::Now);
        req.withdraw_address = Some("savings".into());
        let id = rig.trader.write().place_trade(req).unwrap();

        for _ in 0..20 {
            rig.tick();
            if rig.trader.read().get_trade(id).unwrap().status.is_terminal() {
                break;
            }
        }

        let trade = rig.trader.read().get_trade(id).unwrap();
        assert_eq!(trade.status, TradeStatus::Completed);
        assert!(trade.time_placed.is_some());
        assert!(trade.time_executed.is_some());
        assert!(trade.time_completed.is_some());

        // Proceeds landed at the requested address.
        assert_eq!(
            rig.wallet.get_address_balance("savings").unwrap(),
            Decimal::from(6)
        );

        // Extra passes must not produce further terminal transitions.
        rig.tick();
        rig.tick();
        assert_eq!(*terminal_events.lock(), vec![id]);
    }

    #[test]
    fn test_cancel_recorded_trade() {
        let rig = setup();
        let later = Schedule::Later {
            at: Utc::now() + Duration::hours(1),
        };
        let id = rig.trader.write().place_trade(request(Decimal::from(2), later)).unwrap();

        rig.trader.write().cancel_trade(id).unwrap();
        let trade = rig.trader.read().get_trade(id).unwrap();
        assert_eq!(trade.status, TradeStatus::Cancelled);
        assert!(trade.time_completed.is_some());
        assert!(rig.trader.read().pending_bundles().is_empty());

        // Already terminal; a second cancel is refused.
        assert!(matches!(
            rig.trader.write().cancel_trade(id),
            Err(Error::Refused(_))
        ));
    }

    #[test]
    fn test_cancel_placed_trade_through_broker() {
        let rig = setup();
        // Starve the wallet so the deposit leg stays at its precondition.
        let wallet = Arc::new(PaperWallet::new("empty"));
        let book = shared_book(MemBook::new());
        let mut broker = Broker::new(book.clone(), wallet.clone(), &test_config());
        broker.add_market("paper", rig.market.clone());
        let broker = Arc::new(RwLock::new(broker));
        let trader = Trader::new(book, broker.clone(), test_config());

        let id = trader.write().place_trade(request(Decimal::from(2), Schedule::Now)).unwrap();
        trader.write().process_trades().unwrap();
        assert_eq!(trader.read().get_trade(id).unwrap().status, TradeStatus::Placed);

        trader.write().cancel_trade(id).unwrap();
        broker.write().process_orders().unwrap();

        let trade = trader.read().get_trade(id).unwrap();
        assert_eq!(trade.status, TradeStatus::Cancelled);
        assert_eq!(wallet.sent_count(), 0);
    }

    #[test]
    fn test_abandoned_order_marks_trades() {
        let rig = setup();
        let id = rig.trader.write().place_trade(request(Decimal::from(2), Schedule::Now)).unwrap();
        rig.trader.write().process_trades().unwrap();

        let order_id = rig.trader.read().get_trade(id).unwrap().order_id.unwrap();
        rig.broker.write().abandon_order(order_id).unwrap();
        rig.broker.write().process_orders().unwrap();

        let trade = rig.trader.read().get_trade(id).unwrap();
        assert_eq!(trade.status, TradeStatus::Abandoned);
        assert!(trade.time_completed.is_some());
    }

    #[test]
    fn test_cancel_unknown_trade() {
        let rig = setup();
        assert!(matches!(
            rig.trader.write().cancel_trade(Uuid::new_v4()),
            Err(Error::NoData(_))
        ));
    }
}
