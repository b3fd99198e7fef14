//! Capability interfaces - wallet, market and ledger contracts

use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::{Record, Result};

/// A transaction as seen by the wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTx {
    pub txid: String,
    pub address: String,
    pub amount: Decimal,
    pub confirmations: u32,
}

/// Fill state of an order on the market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketOrderStatus {
    Open,
    Filled,
    Cancelled,
}

/// An order on the market's books.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketOrder {
    /// Assigned by the market on creation
    pub id: Option<String>,
    pub sell_currency: String,
    pub target_currency: String,
    pub amount: Decimal,
    /// Limit price, or `None` for a market order; carries the fill price back
    pub price: Option<Decimal>,
    pub status: MarketOrderStatus,
    pub quantity_filled: Decimal,
    /// Target-currency proceeds of the fill
    pub proceeds: Decimal,
}

impl MarketOrder {
    /// A sell of `amount` of `sell` into `target`.
    pub fn sell(
        sell: impl Into<String>,
        target: impl Into<String>,
        amount: Decimal,
        price: Option<Decimal>,
    ) -> Self {
        Self {
            id: None,
            sell_currency: sell.into(),
            target_currency: target.into(),
            amount,
            price,
            status: MarketOrderStatus::Open,
            quantity_filled: Decimal::ZERO,
            proceeds: Decimal::ZERO,
        }
    }
}

/// Progress of a withdrawal on the market side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawStatus {
    Pending,
    Sent,
    Completed,
    Failed,
}

/// A withdrawal request on the market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketWithdraw {
    /// Assigned by the market on creation
    pub id: Option<String>,
    pub currency: String,
    pub address: String,
    pub amount: Decimal,
    /// On-chain transaction id, once sent
    pub txid: Option<String>,
    pub status: WithdrawStatus,
}

impl MarketWithdraw {
    pub fn new(currency: impl Into<String>, address: impl Into<String>, amount: Decimal) -> Self {
        Self {
            id: None,
            currency: currency.into(),
            address: address.into(),
            amount,
            txid: None,
            status: WithdrawStatus::Pending,
        }
    }
}

/// A deposit as credited by the market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDeposit {
    pub txid: String,
    pub currency: String,
    pub amount: Decimal,
    pub confirmations: u32,
}

/// Wallet service consumed by the order engine.
///
/// Calls are synchronous and may block for the duration of the call;
/// "not found" is reported as `Error::NoData`.
pub trait Wallet: Send + Sync {
    fn get_address_balance(&self, address: &str) -> Result<Decimal>;

    /// Send funds; returns the transaction id. Irreversible.
    fn send_to_address(&self, from: &str, to: &str, amount: Decimal) -> Result<String>;

    fn get_transaction(&self, address: &str, txid: &str) -> Result<WalletTx>;

    fn list_addresses(&self) -> Result<Vec<String>>;

    fn name(&self) -> &str;
}

/// Market / exchange service consumed by the order engine.
pub trait Market: Send + Sync {
    fn get_balance(&self, currency: &str) -> Result<Decimal>;

    /// Place an order; assigns `order.id`. Irreversible.
    fn create_order(&self, order: &mut MarketOrder) -> Result<()>;

    fn get_order(&self, id: &str) -> Result<MarketOrder>;

    /// Request a withdrawal; assigns `withdraw.id`. Irreversible.
    fn create_withdraw(&self, withdraw: &mut MarketWithdraw) -> Result<()>;

    fn get_withdraw(&self, currency: &str, id: &str) -> Result<MarketWithdraw>;

    fn get_deposit_address(&self, currency: &str) -> Result<String>;

    fn get_deposit(&self, currency: &str, txid: &str) -> Result<MarketDeposit>;

    fn name(&self) -> &str;
}

/// Durable keyed record store.
///
/// The single source of truth after a crash: every in-memory working set
/// is rebuilt from it at start-up and written through on every mutation.
/// Implementations report write failures as `Error::Fatal`.
pub trait Book: Send + Sync {
    /// Append a record; returns its monotonically-assigned sequence id.
    fn add_entry(&mut self, record: &Record) -> Result<u64>;

    /// Overwrite the record at `seq`. With `upsert == false` an unknown
    /// seq returns `Ok(false)` without writing.
    fn update_entry(&mut self, seq: u64, record: &Record, upsert: bool) -> Result<bool>;

    fn get_entry(&self, seq: u64) -> Result<Option<Record>>;

    /// Iterate all records in sequence order; the callback returns
    /// `false` to stop early.
    fn each_entry(&self, f: &mut dyn FnMut(u64, &Record) -> bool) -> Result<()>;
}

/// Shared handle to the ledger, written through by scheduler and broker.
pub type SharedBook = Arc<RwLock<Box<dyn Book>>>;

/// Wrap a ledger implementation for shared write-through access.
pub fn shared_book(book: impl Book + 'static) -> SharedBook {
    let boxed: Box<dyn Book> = Box::new(book);
    Arc::new(RwLock::new(boxed))
}
