//! Order engine - drives broker orders through the three-leg pipeline
//!
//! Each open order advances through deposit, exchange and withdraw, one
//! leg at a time; each leg runs the five-step skip/check/execute/verify/
//! confirm machine. Waiting is modeled as `Error::Again` plus a later
//! tick, never as blocking or callbacks: every tick recomputes what to do
//! next from durable state, which is what makes the pipeline safe to
//! resume after a crash.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::core::{
    BrokerOrder, Config, Error, Leg, Market, MarketOrder, MarketOrderStatus, OpStage, OpStatus,
    OrderStage, Record, Result, SharedBook, Wallet, WithdrawStatus,
};
use crate::events::{EventBus, OrderEvent};

/// An order in the active working set, paired with its ledger key.
#[derive(Clone)]
struct OpenOrder {
    seq: u64,
    order: BrokerOrder,
}

/// The orchestrator owning the `BrokerOrder` life cycle.
pub struct Broker {
    book: SharedBook,
    wallet: Arc<dyn Wallet>,
    markets: HashMap<String, Arc<dyn Market>>,
    open_orders: Vec<OpenOrder>,
    events: EventBus<OrderEvent>,
    next_process: DateTime<Utc>,
    poll_interval: Duration,
    min_confirmations: u32,
}

impl Broker {
    pub fn new(book: SharedBook, wallet: Arc<dyn Wallet>, config: &Config) -> Self {
        Self {
            book,
            wallet,
            markets: HashMap::new(),
            open_orders: Vec::new(),
            events: EventBus::new(),
            next_process: Utc::now(),
            poll_interval: Duration::seconds(config.broker.poll_interval_secs as i64),
            min_confirmations: config.broker.min_confirmations,
        }
    }

    /// Connect a market under the name orders refer to it by.
    pub fn add_market(&mut self, name: impl Into<String>, market: Arc<dyn Market>) {
        self.markets.insert(name.into(), market);
    }

    /// Subscribe to order-update events. Events are posted only after the
    /// mutation they describe has been written to the ledger.
    pub fn subscribe(&mut self, listener: impl Fn(&OrderEvent) + Send + Sync + 'static) {
        self.events.subscribe(listener);
    }

    /// Rebuild the open-order working set from the ledger.
    pub fn recover(&mut self) -> Result<usize> {
        let mut found: Vec<(u64, BrokerOrder)> = Vec::new();
        self.book.read().each_entry(&mut |seq, record| {
            if let Record::Order(order) = record {
                if !order.is_completed() {
                    found.push((seq, order.clone()));
                }
            }
            true
        })?;

        for (seq, mut order) in found {
            for leg in Leg::ALL {
                // An execute whose outcome never reached the ledger is
                // reconciled through verify, never re-executed.
                if order.ops[leg].stage == OpStage::Execute {
                    warn!("order {} recovered mid-execute at {} leg", order.id, leg);
                    order.ops[leg].stage = OpStage::Verify;
                }
            }
            self.open_orders.push(OpenOrder { seq, order });
        }

        info!("recovered {} open orders from ledger", self.open_orders.len());
        Ok(self.open_orders.len())
    }

    pub fn open_count(&self) -> usize {
        self.open_orders.len()
    }

    /// Look up an order, open set first, then ledger history.
    pub fn order(&self, id: Uuid) -> Result<Option<BrokerOrder>> {
        if let Some(entry) = self.open_orders.iter().find(|e| e.order.id == id) {
            return Ok(Some(entry.order.clone()));
        }
        let mut found = None;
        self.book.read().each_entry(&mut |_, record| {
            if let Record::Order(order) = record {
                if order.id == id {
                    found = Some(order.clone());
                    return false;
                }
            }
            true
        })?;
        Ok(found)
    }

    /// Accept an order into the pipeline.
    ///
    /// Computes each leg's initial stage from its amount, stamps the
    /// placement time, persists the order and adds it to the open set.
    pub fn place_order(&mut self, mut order: BrokerOrder) -> Result<Uuid> {
        if !self.markets.contains_key(&order.market) {
            return Err(Error::InsufficientEnvironment(format!(
                "market {} is not connected",
                order.market
            )));
        }

        order.ops[Leg::Deposit].stage = if order.deposit.amount > Decimal::ZERO {
            OpStage::Check
        } else {
            OpStage::Skip
        };
        order.ops[Leg::Exchange].stage = if order.exchange.amount > Decimal::ZERO {
            OpStage::Check
        } else {
            OpStage::Skip
        };
        let withdraw_wanted =
            order.withdraw.to_address.is_some() && order.withdraw.fraction > Decimal::ZERO;
        order.ops[Leg::Withdraw].stage = if withdraw_wanted {
            OpStage::Check
        } else {
            OpStage::Skip
        };
        for leg in Leg::ALL {
            order.ops[leg].status = OpStatus::Recorded;
        }
        order.stage = OrderStage::MakingDeposit;
        order.time_placed = Utc::now();

        let seq = self.book.write().add_entry(&Record::Order(order.clone()))?;
        info!(
            "placed order {} on {}: {} {} -> {}",
            order.id,
            order.market,
            order.exchange.amount,
            order.exchange.sell_currency,
            order.exchange.target_currency
        );

        let id = order.id;
        self.open_orders.push(OpenOrder { seq, order });
        Ok(id)
    }

    /// One non-blocking pass over the open set, rate-limited to avoid
    /// busy-polling the external services.
    pub fn process_orders(&mut self) -> Result<()> {
        let now = Utc::now();
        if now < self.next_process {
            return Ok(());
        }
        self.next_process = now + self.poll_interval;

        for i in 0..self.open_orders.len() {
            let mut entry = self.open_orders[i].clone();
            match self.advance_order(entry.seq, &mut entry.order) {
                Ok(()) => {}
                Err(Error::Again) => {
                    trace!("order {} waiting at {:?}", entry.order.id, entry.order.stage);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("order {} processing failed, will retry: {}", entry.order.id, e);
                }
            }
            self.open_orders[i] = entry;
        }

        // Completed orders leave the working set; their ledger records remain.
        self.open_orders.retain(|entry| {
            if entry.order.is_completed() {
                info!("order {} settled", entry.order.id);
                false
            } else {
                true
            }
        });
        Ok(())
    }

    /// Request cancellation of an open order.
    ///
    /// Sets the current leg to `Cancelling`; the next tick resolves it.
    /// A leg whose irreversible action already executed is only marked
    /// cancelled - no compensating transaction is attempted.
    pub fn cancel_order(&mut self, id: Uuid) -> Result<()> {
        let idx = self
            .open_orders
            .iter()
            .position(|e| e.order.id == id)
            .ok_or_else(|| Error::NoData(format!("no open order {}", id)))?;
        let mut entry = self.open_orders[idx].clone();

        if !entry.order.cancellable {
            return Err(Error::Refused(format!("order {} is not cancellable", id)));
        }
        let Some(leg) = entry.order.stage.current_leg() else {
            return Err(Error::Refused(format!("order {} already completed", id)));
        };
        if entry.order.ops[leg].status.is_terminal() {
            return Err(Error::Refused(format!(
                "order {} {} leg already settled",
                id, leg
            )));
        }

        entry.order.ops[leg].status = OpStatus::Cancelling;
        self.persist(entry.seq, &entry.order)?;
        info!("order {} cancel requested at {} leg", id, leg);
        self.open_orders[idx] = entry;
        Ok(())
    }

    /// Give up on an open order: the current leg concludes `Abandoned`
    /// and the next tick settles the remaining legs the same way.
    pub fn abandon_order(&mut self, id: Uuid) -> Result<()> {
        let idx = self
            .open_orders
            .iter()
            .position(|e| e.order.id == id)
            .ok_or_else(|| Error::NoData(format!("no open order {}", id)))?;
        let mut entry = self.open_orders[idx].clone();

        let Some(leg) = entry.order.stage.current_leg() else {
            return Err(Error::Refused(format!("order {} already completed", id)));
        };
        if entry.order.ops[leg].status.is_terminal() {
            return Err(Error::Refused(format!(
                "order {} {} leg already settled",
                id, leg
            )));
        }

        entry.order.ops[leg].conclude(OpStatus::Abandoned);
        self.persist(entry.seq, &entry.order)?;
        warn!("order {} abandoned at {} leg", id, leg);
        self.open_orders[idx] = entry;
        Ok(())
    }

    fn market_for(&self, name: &str) -> Result<Arc<dyn Market>> {
        self.markets
            .get(name)
            .cloned()
            .ok_or_else(|| Error::InsufficientEnvironment(format!("market {} is not connected", name)))
    }

    fn persist(&self, seq: u64, order: &BrokerOrder) -> Result<()> {
        let known = self
            .book
            .write()
            .update_entry(seq, &Record::Order(order.clone()), false)?;
        if !known {
            return Err(Error::Fatal(format!(
                "order {} vanished from ledger at seq {}",
                order.id, seq
            )));
        }
        Ok(())
    }

    fn persist_and_publish(&self, seq: u64, order: &BrokerOrder) -> Result<()> {
        self.persist(seq, order)?;
        self.events.post(&OrderEvent {
            order: order.clone(),
        });
        Ok(())
    }

    /// Drive one order: step its current leg, then advance the order
    /// cursor once the leg has settled.
    fn advance_order(&self, seq: u64, order: &mut BrokerOrder) -> Result<()> {
        let Some(leg) = order.stage.current_leg() else {
            return Ok(());
        };

        if !order.ops[leg].status.is_terminal() {
            self.step_leg(seq, order, leg)?;
        }

        let status = order.ops[leg].status;
        if !status.is_terminal() {
            return Ok(());
        }

        match status {
            OpStatus::Completed | OpStatus::Skipped => {
                order.stage = match leg {
                    Leg::Deposit => OrderStage::Exchanging,
                    Leg::Exchange => OrderStage::Withdrawing,
                    Leg::Withdraw => OrderStage::Completed,
                };
            }
            OpStatus::Abandoned | OpStatus::Cancelled => {
                // The remaining legs can never run; settle them the same
                // way so the order reaches a terminal stage.
                let mut next = leg.next();
                while let Some(l) = next {
                    if !order.ops[l].status.is_terminal() {
                        order.ops[l].conclude(status);
                    }
                    next = l.next();
                }
                order.stage = OrderStage::Completed;
            }
            _ => {}
        }
        self.persist_and_publish(seq, order)
    }

    fn step_leg(&self, seq: u64, order: &mut BrokerOrder, leg: Leg) -> Result<()> {
        if order.ops[leg].status == OpStatus::Cancelling {
            return self.resolve_cancel(seq, order, leg);
        }
        match leg {
            Leg::Deposit => self.process_deposit(seq, order),
            Leg::Exchange => self.process_exchange(seq, order),
            Leg::Withdraw => self.process_withdraw(seq, order),
        }
    }

    fn resolve_cancel(&self, seq: u64, order: &mut BrokerOrder, leg: Leg) -> Result<()> {
        match order.ops[leg].stage {
            OpStage::Skip | OpStage::Check | OpStage::Execute => {
                info!("order {} {} leg cancelled before execution", order.id, leg);
            }
            OpStage::Verify | OpStage::Confirm => {
                warn!(
                    "order {} {} leg cancelled after execution; funds already moved, \
                     no compensation is attempted",
                    order.id, leg
                );
            }
            OpStage::Done => return Ok(()),
        }
        order.ops[leg].conclude(OpStatus::Cancelled);
        self.persist_and_publish(seq, order)
    }

    fn process_deposit(&self, seq: u64, order: &mut BrokerOrder) -> Result<()> {
        let market = self.market_for(&order.market)?;
        match order.ops[Leg::Deposit].stage {
            OpStage::Skip => {
                debug!("order {} needs no deposit", order.id);
                order.ops[Leg::Deposit].conclude(OpStatus::Skipped);
                self.persist_and_publish(seq, order)
            }
            OpStage::Check => {
                let from = match order.deposit.from_address.clone() {
                    Some(addr) => addr,
                    None => self
                        .wallet
                        .list_addresses()?
                        .into_iter()
                        .next()
                        .ok_or_else(|| {
                            Error::InsufficientEnvironment("wallet has no addresses".into())
                        })?,
                };
                let balance = self.wallet.get_address_balance(&from)?;
                if balance < order.deposit.amount {
                    trace!(
                        "order {} deposit waiting for funds at {}: {} < {}",
                        order.id, from, balance, order.deposit.amount
                    );
                    return Err(Error::Again);
                }
                let target = market.get_deposit_address(&order.exchange.sell_currency)?;
                order.deposit.from_address = Some(from.clone());
                order.deposit.deposit_address = Some(target.clone());
                order.ops[Leg::Deposit].status = OpStatus::Processing;
                order.ops[Leg::Deposit].stage = OpStage::Execute;
                // Write-ahead: the execute decision reaches the ledger
                // before the irreversible send, so a crash in between
                // recovers to verify instead of sending again.
                self.persist_and_publish(seq, order)?;
                self.execute_deposit(seq, order, &from, &target)
            }
            OpStage::Execute => Err(Error::Fatal(format!(
                "order {} deposit leg ticked at execute",
                order.id
            ))),
            OpStage::Verify => {
                let txid = deposit_txid(order)?;
                let from = order.deposit.from_address.clone().ok_or_else(|| {
                    Error::Fatal(format!("order {} deposit executed without source", order.id))
                })?;
                match self.wallet.get_transaction(&from, &txid) {
                    Ok(_) => {
                        order.ops[Leg::Deposit].time_verified = Some(Utc::now());
                        order.ops[Leg::Deposit].stage = OpStage::Confirm;
                        self.persist_and_publish(seq, order)
                    }
                    Err(Error::NoData(_)) => Err(Error::Again),
                    Err(e) => Err(e),
                }
            }
            OpStage::Confirm => {
                let txid = deposit_txid(order)?;
                match market.get_deposit(&order.exchange.sell_currency, &txid) {
                    Ok(deposit) => {
                        order.deposit.confirmations = deposit.confirmations;
                        if deposit.confirmations >= self.min_confirmations {
                            info!(
                                "order {} deposit credited after {} confirmations",
                                order.id, deposit.confirmations
                            );
                            order.ops[Leg::Deposit].conclude(OpStatus::Completed);
                            self.persist_and_publish(seq, order)
                        } else {
                            trace!(
                                "order {} deposit at {}/{} confirmations",
                                order.id, deposit.confirmations, self.min_confirmations
                            );
                            Err(Error::Again)
                        }
                    }
                    Err(Error::NoData(_)) => Err(Error::Again),
                    Err(e) => Err(e),
                }
            }
            OpStage::Done => Ok(()),
        }
    }

    fn execute_deposit(
        &self,
        seq: u64,
        order: &mut BrokerOrder,
        from: &str,
        target: &str,
    ) -> Result<()> {
        match self.wallet.send_to_address(from, target, order.deposit.amount) {
            Ok(txid) => {
                info!(
                    "order {} sent {} {} to {} (tx {})",
                    order.id, order.deposit.amount, order.exchange.sell_currency, target, txid
                );
                order.deposit.txid = Some(txid);
                order.ops[Leg::Deposit].time_executed = Some(Utc::now());
                order.ops[Leg::Deposit].stage = OpStage::Verify;
                self.persist_and_publish(seq, order)
            }
            Err(e) => {
                // The wallet reported failure; nothing left it. Step back
                // to check durably so recovery does not read this as an
                // executed send.
                order.ops[Leg::Deposit].stage = OpStage::Check;
                self.persist(seq, order)?;
                Err(e)
            }
        }
    }

    fn process_exchange(&self, seq: u64, order: &mut BrokerOrder) -> Result<()> {
        let market = self.market_for(&order.market)?;
        match order.ops[Leg::Exchange].stage {
            OpStage::Skip => {
                debug!("order {} needs no exchange", order.id);
                order.ops[Leg::Exchange].conclude(OpStatus::Skipped);
                self.persist_and_publish(seq, order)
            }
            OpStage::Check => {
                let balance = market.get_balance(&order.exchange.sell_currency)?;
                if balance < order.exchange.amount {
                    trace!(
                        "order {} exchange waiting for {} balance: {} < {}",
                        order.id, order.exchange.sell_currency, balance, order.exchange.amount
                    );
                    return Err(Error::Again);
                }
                order.ops[Leg::Exchange].status = OpStatus::Processing;
                order.ops[Leg::Exchange].stage = OpStage::Execute;
                self.persist_and_publish(seq, order)?;
                self.execute_exchange(seq, order, market.as_ref())
            }
            OpStage::Execute => Err(Error::Fatal(format!(
                "order {} exchange leg ticked at execute",
                order.id
            ))),
            OpStage::Verify => {
                let id = exchange_order_id(order)?;
                let placed = match market.get_order(&id) {
                    Ok(placed) => placed,
                    Err(Error::NoData(_)) => return Err(Error::Again),
                    Err(e) => return Err(e),
                };
                let filled = placed.status == MarketOrderStatus::Filled
                    || placed.quantity_filled >= order.exchange.amount;
                if filled {
                    order.exchange.quantity_filled = placed.quantity_filled;
                    order.exchange.proceeds = placed.proceeds;
                    if order.exchange.price.is_none() {
                        order.exchange.price = placed.price;
                    }
                    info!(
                        "order {} exchanged {} {} for {} {}",
                        order.id,
                        order.exchange.quantity_filled,
                        order.exchange.sell_currency,
                        order.exchange.proceeds,
                        order.exchange.target_currency
                    );
                    order.ops[Leg::Exchange].time_verified = Some(Utc::now());
                    order.ops[Leg::Exchange].stage = OpStage::Confirm;
                    self.persist_and_publish(seq, order)
                } else if placed.status == MarketOrderStatus::Cancelled {
                    warn!("order {} market order {} cancelled by exchange", order.id, id);
                    order.ops[Leg::Exchange].conclude(OpStatus::Abandoned);
                    self.persist_and_publish(seq, order)
                } else {
                    trace!(
                        "order {} market order {} filled {}/{}",
                        order.id, id, placed.quantity_filled, order.exchange.amount
                    );
                    Err(Error::Again)
                }
            }
            OpStage::Confirm => {
                let balance = market.get_balance(&order.exchange.target_currency)?;
                if balance >= order.exchange.proceeds {
                    order.ops[Leg::Exchange].conclude(OpStatus::Completed);
                    self.persist_and_publish(seq, order)
                } else {
                    trace!(
                        "order {} proceeds not yet credited: {} < {}",
                        order.id, balance, order.exchange.proceeds
                    );
                    Err(Error::Again)
                }
            }
            OpStage::Done => Ok(()),
        }
    }

    fn execute_exchange(
        &self,
        seq: u64,
        order: &mut BrokerOrder,
        market: &dyn Market,
    ) -> Result<()> {
        let mut placed = MarketOrder::sell(
            order.exchange.sell_currency.clone(),
            order.exchange.target_currency.clone(),
            order.exchange.amount,
            order.exchange.price,
        );
        match market.create_order(&mut placed) {
            Ok(()) => {
                let id = placed.id.ok_or_else(|| {
                    Error::Fatal(format!(
                        "market {} created an order without an id",
                        order.market
                    ))
                })?;
                info!("order {} placed market order {}", order.id, id);
                order.exchange.order_id = Some(id);
                order.ops[Leg::Exchange].time_executed = Some(Utc::now());
                order.ops[Leg::Exchange].stage = OpStage::Verify;
                self.persist_and_publish(seq, order)
            }
            Err(e) => {
                order.ops[Leg::Exchange].stage = OpStage::Check;
                self.persist(seq, order)?;
                Err(e)
            }
        }
    }

    fn process_withdraw(&self, seq: u64, order: &mut BrokerOrder) -> Result<()> {
        let market = self.market_for(&order.market)?;
        match order.ops[Leg::Withdraw].stage {
            OpStage::Skip => {
                debug!("order {} needs no withdraw", order.id);
                order.ops[Leg::Withdraw].conclude(OpStatus::Skipped);
                self.persist_and_publish(seq, order)
            }
            OpStage::Check => {
                let to = withdraw_destination(order)?;
                let currency = order.exchange.target_currency.clone();
                let base = if order.exchange.proceeds > Decimal::ZERO {
                    order.exchange.proceeds
                } else {
                    market.get_balance(&currency)?
                };
                let amount = base * order.withdraw.fraction;
                if amount <= Decimal::ZERO {
                    return Err(Error::Again);
                }
                let balance = market.get_balance(&currency)?;
                if balance < amount {
                    trace!(
                        "order {} withdraw waiting for {} balance: {} < {}",
                        order.id, currency, balance, amount
                    );
                    return Err(Error::Again);
                }
                order.withdraw.amount = amount;
                order.ops[Leg::Withdraw].status = OpStatus::Processing;
                order.ops[Leg::Withdraw].stage = OpStage::Execute;
                self.persist_and_publish(seq, order)?;
                self.execute_withdraw(seq, order, market.as_ref(), &to)
            }
            OpStage::Execute => Err(Error::Fatal(format!(
                "order {} withdraw leg ticked at execute",
                order.id
            ))),
            OpStage::Verify => {
                let id = withdraw_id(order)?;
                let withdraw = match market.get_withdraw(&order.exchange.target_currency, &id) {
                    Ok(withdraw) => withdraw,
                    Err(Error::NoData(_)) => return Err(Error::Again),
                    Err(e) => return Err(e),
                };
                match withdraw.status {
                    WithdrawStatus::Sent | WithdrawStatus::Completed => {
                        order.withdraw.txid = withdraw.txid;
                        order.ops[Leg::Withdraw].time_verified = Some(Utc::now());
                        order.ops[Leg::Withdraw].stage = OpStage::Confirm;
                        self.persist_and_publish(seq, order)
                    }
                    WithdrawStatus::Failed => {
                        warn!("order {} withdraw {} failed on market", order.id, id);
                        order.ops[Leg::Withdraw].conclude(OpStatus::Abandoned);
                        self.persist_and_publish(seq, order)
                    }
                    WithdrawStatus::Pending => Err(Error::Again),
                }
            }
            OpStage::Confirm => {
                let to = withdraw_destination(order)?;
                match order.withdraw.txid.clone() {
                    Some(txid) => match self.wallet.get_transaction(&to, &txid) {
                        Ok(tx) if tx.confirmations >= 1 => {
                            info!(
                                "order {} withdrew {} {} to {}",
                                order.id,
                                order.withdraw.amount,
                                order.exchange.target_currency,
                                to
                            );
                            order.ops[Leg::Withdraw].conclude(OpStatus::Completed);
                            self.persist_and_publish(seq, order)
                        }
                        Ok(_) => Err(Error::Again),
                        Err(Error::NoData(_)) => Err(Error::Again),
                        Err(e) => Err(e),
                    },
                    None => {
                        // The market never reported a txid; settle on its
                        // own view of the withdrawal instead.
                        let id = withdraw_id(order)?;
                        match market.get_withdraw(&order.exchange.target_currency, &id) {
                            Ok(withdraw) if withdraw.status == WithdrawStatus::Completed => {
                                order.withdraw.txid = withdraw.txid;
                                order.ops[Leg::Withdraw].conclude(OpStatus::Completed);
                                self.persist_and_publish(seq, order)
                            }
                            Ok(_) => Err(Error::Again),
                            Err(Error::NoData(_)) => Err(Error::Again),
                            Err(e) => Err(e),
                        }
                    }
                }
            }
            OpStage::Done => Ok(()),
        }
    }

    fn execute_withdraw(
        &self,
        seq: u64,
        order: &mut BrokerOrder,
        market: &dyn Market,
        to: &str,
    ) -> Result<()> {
        let mut withdraw = crate::core::MarketWithdraw::new(
            order.exchange.target_currency.clone(),
            to,
            order.withdraw.amount,
        );
        match market.create_withdraw(&mut withdraw) {
            Ok(()) => {
                let id = withdraw.id.ok_or_else(|| {
                    Error::Fatal(format!(
                        "market {} created a withdrawal without an id",
                        order.market
                    ))
                })?;
                info!(
                    "order {} requested withdrawal {} of {} {}",
                    order.id, id, order.withdraw.amount, order.exchange.target_currency
                );
                order.withdraw.withdraw_id = Some(id);
                order.ops[Leg::Withdraw].time_executed = Some(Utc::now());
                order.ops[Leg::Withdraw].stage = OpStage::Verify;
                self.persist_and_publish(seq, order)
            }
            Err(e) => {
                order.ops[Leg::Withdraw].stage = OpStage::Check;
                self.persist(seq, order)?;
                Err(e)
            }
        }
    }
}

fn deposit_txid(order: &BrokerOrder) -> Result<String> {
    order
        .deposit
        .txid
        .clone()
        .ok_or_else(|| Error::Fatal(format!("order {} deposit executed without txid", order.id)))
}

fn exchange_order_id(order: &BrokerOrder) -> Result<String> {
    order.exchange.order_id.clone().ok_or_else(|| {
        Error::Fatal(format!(
            "order {} exchange executed without market order id",
            order.id
        ))
    })
}

fn withdraw_id(order: &BrokerOrder) -> Result<String> {
    order.withdraw.withdraw_id.clone().ok_or_else(|| {
        Error::Fatal(format!(
            "order {} withdraw executed without withdrawal id",
            order.id
        ))
    })
}

fn withdraw_destination(order: &BrokerOrder) -> Result<String> {
    order.withdraw.to_address.clone().ok_or_else(|| {
        Error::Fatal(format!(
            "order {} withdraw leg active without destination",
            order.id
        ))
    })
}
