//! Paper wallet and market - in-process simulators
//!
//! Deterministic stand-ins for the external services, used by the demo
//! driver and the test suite. `step` plays the role of the outside
//! world: it notices wallet transactions sent to deposit addresses,
//! fills open orders at the configured price and moves withdrawals
//! through their life cycle.

use std::collections::HashMap;

use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::core::{
    Error, Market, MarketDeposit, MarketOrder, MarketOrderStatus, MarketWithdraw, Result, Wallet,
    WalletTx, WithdrawStatus,
};

#[derive(Default)]
struct WalletInner {
    balances: HashMap<String, Decimal>,
    txs: HashMap<String, WalletTx>,
    sent_count: u64,
    next_txid: u64,
}

/// Simulated on-chain wallet.
pub struct PaperWallet {
    name: String,
    inner: RwLock<WalletInner>,
}

impl PaperWallet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(WalletInner::default()),
        }
    }

    /// Credit an address out of thin air.
    pub fn credit(&self, address: impl Into<String>, amount: Decimal) {
        *self
            .inner
            .write()
            .balances
            .entry(address.into())
            .or_default() += amount;
    }

    /// Number of sends performed so far.
    pub fn sent_count(&self) -> u64 {
        self.inner.read().sent_count
    }

    pub fn transactions(&self) -> Vec<WalletTx> {
        self.inner.read().txs.values().cloned().collect()
    }

    /// Record an externally-originated incoming transaction.
    pub fn observe_transaction(
        &self,
        txid: &str,
        address: &str,
        amount: Decimal,
        confirmations: u32,
    ) {
        let mut inner = self.inner.write();
        inner.txs.insert(
            txid.to_string(),
            WalletTx {
                txid: txid.to_string(),
                address: address.to_string(),
                amount,
                confirmations,
            },
        );
        *inner.balances.entry(address.to_string()).or_default() += amount;
    }

    pub fn bump_confirmations(&self, txid: &str) {
        if let Some(tx) = self.inner.write().txs.get_mut(txid) {
            tx.confirmations += 1;
        }
    }
}

impl Wallet for PaperWallet {
    fn get_address_balance(&self, address: &str) -> Result<Decimal> {
        Ok(self
            .inner
            .read()
            .balances
            .get(address)
            .copied()
            .unwrap_or_default())
    }

    fn send_to_address(&self, from: &str, to: &str, amount: Decimal) -> Result<String> {
        if amount <= Decimal::ZERO {
            return Err(Error::BadArgs("send amount must be positive".into()));
        }
        let mut inner = self.inner.write();
        let have = inner.balances.get(from).copied().unwrap_or_default();
        if have < amount {
            return Err(Error::Wallet(format!(
                "insufficient funds at {}: {} < {}",
                from, have, amount
            )));
        }
        *inner.balances.entry(from.to_string()).or_default() -= amount;
        inner.next_txid += 1;
        let txid = format!("{}-tx-{}", self.name, inner.next_txid);
        inner.txs.insert(
            txid.clone(),
            WalletTx {
                txid: txid.clone(),
                address: to.to_string(),
                amount,
                confirmations: 1,
            },
        );
        inner.sent_count += 1;
        Ok(txid)
    }

    fn get_transaction(&self, _address: &str, txid: &str) -> Result<WalletTx> {
        self.inner
            .read()
            .txs
            .get(txid)
            .cloned()
            .ok_or_else(|| Error::NoData(format!("no transaction {}", txid)))
    }

    fn list_addresses(&self) -> Result<Vec<String>> {
        let mut addresses: Vec<String> = self.inner.read().balances.keys().cloned().collect();
        addresses.sort();
        Ok(addresses)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Default)]
struct MarketInner {
    balances: HashMap<String, Decimal>,
    orders: HashMap<String, MarketOrder>,
    withdraws: HashMap<String, MarketWithdraw>,
    deposits: HashMap<String, MarketDeposit>,
    prices: HashMap<(String, String), Decimal>,
    next_id: u64,
}

/// Simulated exchange.
pub struct PaperMarket {
    name: String,
    inner: RwLock<MarketInner>,
}

impl PaperMarket {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(MarketInner::default()),
        }
    }

    /// Quote for market orders selling `sell` into `target`.
    pub fn set_price(&self, sell: impl Into<String>, target: impl Into<String>, price: Decimal) {
        self.inner
            .write()
            .prices
            .insert((sell.into(), target.into()), price);
    }

    /// Credit an exchange balance directly.
    pub fn credit(&self, currency: impl Into<String>, amount: Decimal) {
        *self
            .inner
            .write()
            .balances
            .entry(currency.into())
            .or_default() += amount;
    }

    /// Advance the simulated outside world by one round: notice deposits
    /// arriving from the wallet, fill open orders at the quoted price and
    /// progress withdrawals.
    pub fn step(&self, wallet: &PaperWallet) {
        let prefix = format!("{}:", self.name);
        let mut inner = self.inner.write();

        for tx in wallet.transactions() {
            let Some(currency) = tx
                .address
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(":deposit"))
            else {
                continue;
            };
            match inner.deposits.get_mut(&tx.txid) {
                Some(deposit) => deposit.confirmations += 1,
                None => {
                    inner.deposits.insert(
                        tx.txid.clone(),
                        MarketDeposit {
                            txid: tx.txid.clone(),
                            currency: currency.to_string(),
                            amount: tx.amount,
                            confirmations: 1,
                        },
                    );
                    *inner.balances.entry(currency.to_string()).or_default() += tx.amount;
                }
            }
        }

        let open: Vec<String> = inner
            .orders
            .iter()
            .filter(|(_, o)| o.status == MarketOrderStatus::Open)
            .map(|(id, _)| id.clone())
            .collect();
        for id in open {
            let Some(order) = inner.orders.get(&id).cloned() else {
                continue;
            };
            let price = order.price.or_else(|| {
                inner
                    .prices
                    .get(&(order.sell_currency.clone(), order.target_currency.clone()))
                    .copied()
            });
            let Some(price) = price else { continue };
            let have = inner
                .balances
                .get(&order.sell_currency)
                .copied()
                .unwrap_or_default();
            if have < order.amount {
                continue;
            }
            let proceeds = order.amount * price;
            *inner.balances.entry(order.sell_currency.clone()).or_default() -= order.amount;
            *inner
                .balances
                .entry(order.target_currency.clone())
                .or_default() += proceeds;
            if let Some(o) = inner.orders.get_mut(&id) {
                o.status = MarketOrderStatus::Filled;
                o.quantity_filled = o.amount;
                o.proceeds = proceeds;
                o.price = Some(price);
            }
        }

        let pending: Vec<String> = inner.withdraws.keys().cloned().collect();
        for id in pending {
            let Some(withdraw) = inner.withdraws.get(&id).cloned() else {
                continue;
            };
            match withdraw.status {
                WithdrawStatus::Pending => {
                    let have = inner
                        .balances
                        .get(&withdraw.currency)
                        .copied()
                        .unwrap_or_default();
                    if have < withdraw.amount {
                        continue;
                    }
                    *inner.balances.entry(withdraw.currency.clone()).or_default() -=
                        withdraw.amount;
                    let txid = format!("{}-wtx-{}", self.name, id);
                    wallet.observe_transaction(&txid, &withdraw.address, withdraw.amount, 1);
                    if let Some(w) = inner.withdraws.get_mut(&id) {
                        w.txid = Some(txid);
                        w.status = WithdrawStatus::Sent;
                    }
                }
                WithdrawStatus::Sent => {
                    if let Some(txid) = &withdraw.txid {
                        wallet.bump_confirmations(txid);
                    }
                    if let Some(w) = inner.withdraws.get_mut(&id) {
                        w.status = WithdrawStatus::Completed;
                    }
                }
                _ => {}
            }
        }
    }
}

impl Market for PaperMarket {
    fn get_balance(&self, currency: &str) -> Result<Decimal> {
        Ok(self
            .inner
            .read()
            .balances
            .get(currency)
            .copied()
            .unwrap_or_default())
    }

    fn create_order(&self, order: &mut MarketOrder) -> Result<()> {
        if order.amount <= Decimal::ZERO {
            return Err(Error::Market("order amount must be positive".into()));
        }
        let mut inner = self.inner.write();
        inner.next_id += 1;
        let id = format!("{}-ord-{}", self.name, inner.next_id);
        order.id = Some(id.clone());
        inner.orders.insert(id, order.clone());
        Ok(())
    }

    fn get_order(&self, id: &str) -> Result<MarketOrder> {
        self.inner
            .read()
            .orders
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NoData(format!("no order {}", id)))
    }

    fn create_withdraw(&self, withdraw: &mut MarketWithdraw) -> Result<()> {
        let mut inner = self.inner.write();
        let have = inner
            .balances
            .get(&withdraw.currency)
            .copied()
            .unwrap_or_default();
        if have < withdraw.amount {
            return Err(Error::Market(format!(
                "insufficient {} balance: {} < {}",
                withdraw.currency, have, withdraw.amount
            )));
        }
        inner.next_id += 1;
        let id = format!("{}-wd-{}", self.name, inner.next_id);
        withdraw.id = Some(id.clone());
        inner.withdraws.insert(id, withdraw.clone());
        Ok(())
    }

    fn get_withdraw(&self, _currency: &str, id: &str) -> Result<MarketWithdraw> {
        self.inner
            .read()
            .withdraws
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NoData(format!("no withdrawal {}", id)))
    }

    fn get_deposit_address(&self, currency: &str) -> Result<String> {
        Ok(format!("{}:{}:deposit", self.name, currency))
    }

    fn get_deposit(&self, _currency: &str, txid: &str) -> Result<MarketDeposit> {
        self.inner
            .read()
            .deposits
            .get(txid)
            .cloned()
            .ok_or_else(|| Error::NoData(format!("no deposit {}", txid)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
