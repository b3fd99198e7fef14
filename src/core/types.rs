//! Core types - trade, bundle and order data model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a user-level trade request.
///
/// Moves strictly forward: `NoStatus → Recorded → Placed → Executing`
/// and then to exactly one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    NoStatus,
    Recorded,
    Placed,
    Executing,
    Completed,
    Abandoned,
    Cancelled,
}

impl TradeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradeStatus::Completed | TradeStatus::Abandoned | TradeStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TradeStatus::NoStatus => "no_status",
            TradeStatus::Recorded => "recorded",
            TradeStatus::Placed => "placed",
            TradeStatus::Executing => "executing",
            TradeStatus::Completed => "completed",
            TradeStatus::Abandoned => "abandoned",
            TradeStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// When a trade wants to run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Schedule {
    /// As soon as possible
    Now,
    /// At the next configured cadence boundary (global or per-market)
    OnSchedule,
    /// At an explicit point in time
    Later { at: DateTime<Utc> },
}

/// A user's trade request, as accepted by `Trader::place_trade`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRequest {
    /// Target market, or `None` for "any" (the configured default)
    pub market: Option<String>,
    /// Amount of `sell_currency` to trade away
    pub amount: Decimal,
    pub sell_currency: String,
    pub target_currency: String,
    /// Optional limit price; `None` trades at market
    pub price: Option<Decimal>,
    /// Wallet address funds are deposited from
    pub deposit_address: Option<String>,
    /// Wallet address proceeds are withdrawn to
    pub withdraw_address: Option<String>,
    pub schedule: Schedule,
}

/// A user-level trade record, durable in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeInfo {
    pub id: Uuid,
    pub market: Option<String>,
    pub amount: Decimal,
    pub sell_currency: String,
    pub target_currency: String,
    pub price: Option<Decimal>,
    pub deposit_address: Option<String>,
    pub withdraw_address: Option<String>,
    pub schedule: Schedule,
    /// Set exactly once, when the trade's bundle is submitted
    pub order_id: Option<Uuid>,
    pub status: TradeStatus,
    pub time_recorded: Option<DateTime<Utc>>,
    pub time_placed: Option<DateTime<Utc>>,
    pub time_executed: Option<DateTime<Utc>>,
    pub time_completed: Option<DateTime<Utc>>,
}

impl TradeInfo {
    /// Build the durable record for a freshly accepted request.
    pub fn from_request(req: TradeRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            market: req.market,
            amount: req.amount,
            sell_currency: req.sell_currency,
            target_currency: req.target_currency,
            price: req.price,
            deposit_address: req.deposit_address,
            withdraw_address: req.withdraw_address,
            schedule: req.schedule,
            order_id: None,
            status: TradeStatus::Recorded,
            time_recorded: Some(now),
            time_placed: None,
            time_executed: None,
            time_completed: None,
        }
    }
}

/// An in-memory bundle of compatible pending trades.
///
/// Exists only until submission; afterwards its trades reference the
/// `BrokerOrder` that replaced it. Never serialized: after a crash the
/// scheduler rebundles from the ledger's `Recorded` trades.
#[derive(Debug, Clone)]
pub struct TradeOrder {
    pub market: Option<String>,
    /// Aggregate of all bundled trade amounts
    pub amount: Decimal,
    pub sell_currency: String,
    pub target_currency: String,
    pub price: Option<Decimal>,
    pub deposit_address: Option<String>,
    pub withdraw_address: Option<String>,
    pub exec_time: DateTime<Utc>,
    /// Constituent trade ids
    pub trades: Vec<Uuid>,
}

impl TradeOrder {
    pub fn from_trade(trade: &TradeInfo, exec_time: DateTime<Utc>) -> Self {
        Self {
            market: trade.market.clone(),
            amount: trade.amount,
            sell_currency: trade.sell_currency.clone(),
            target_currency: trade.target_currency.clone(),
            price: trade.price,
            deposit_address: trade.deposit_address.clone(),
            withdraw_address: trade.withdraw_address.clone(),
            exec_time,
            trades: vec![trade.id],
        }
    }
}

/// The three ordered legs of a broker order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leg {
    Deposit,
    Exchange,
    Withdraw,
}

impl Leg {
    pub const ALL: [Leg; 3] = [Leg::Deposit, Leg::Exchange, Leg::Withdraw];

    pub fn next(self) -> Option<Leg> {
        match self {
            Leg::Deposit => Some(Leg::Exchange),
            Leg::Exchange => Some(Leg::Withdraw),
            Leg::Withdraw => None,
        }
    }
}

impl std::fmt::Display for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Leg::Deposit => "deposit",
            Leg::Exchange => "exchange",
            Leg::Withdraw => "withdraw",
        };
        write!(f, "{}", s)
    }
}

/// Five-step sub-state-machine driving one leg.
///
/// A leg only moves its stage forward; it may be revisited at the same
/// stage indefinitely until the stage's exit condition is met.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStage {
    /// Leg not required for this order
    Skip,
    /// Wait until the precondition is satisfiable right now
    Check,
    /// Perform the one-shot, irreversible external action
    Execute,
    /// Poll the source-side record of the action
    Verify,
    /// Poll the destination-side record of the action
    Confirm,
    Done,
}

/// Independent status of one leg's operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    NoStatus,
    Recorded,
    Processing,
    /// Cancel requested; resolved cooperatively on the next tick
    Cancelling,
    Completed,
    Skipped,
    Abandoned,
    Cancelled,
}

impl OpStatus {
    /// Terminal statuses never change, and only a terminal leg permits
    /// the owning order's stage to advance.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OpStatus::Completed | OpStatus::Skipped | OpStatus::Abandoned | OpStatus::Cancelled
        )
    }
}

/// The operation record driving one leg.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BrokerOp {
    pub stage: OpStage,
    pub status: OpStatus,
    pub time_executed: Option<DateTime<Utc>>,
    pub time_verified: Option<DateTime<Utc>>,
    pub time_concluded: Option<DateTime<Utc>>,
}

impl Default for BrokerOp {
    fn default() -> Self {
        Self {
            stage: OpStage::Check,
            status: OpStatus::NoStatus,
            time_executed: None,
            time_verified: None,
            time_concluded: None,
        }
    }
}

impl BrokerOp {
    /// Settle the leg with a terminal status.
    pub fn conclude(&mut self, status: OpStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.stage = OpStage::Done;
        self.time_concluded = Some(Utc::now());
    }
}

/// Per-leg operation table, indexed by `Leg`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LegOps([BrokerOp; 3]);

impl std::ops::Index<Leg> for LegOps {
    type Output = BrokerOp;

    fn index(&self, leg: Leg) -> &BrokerOp {
        &self.0[leg as usize]
    }
}

impl std::ops::IndexMut<Leg> for LegOps {
    fn index_mut(&mut self, leg: Leg) -> &mut BrokerOp {
        &mut self.0[leg as usize]
    }
}

/// Overall cursor over an order's legs. Never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStage {
    MakingDeposit,
    Exchanging,
    Withdrawing,
    Completed,
}

impl OrderStage {
    /// The leg currently being driven, if any.
    pub fn current_leg(&self) -> Option<Leg> {
        match self {
            OrderStage::MakingDeposit => Some(Leg::Deposit),
            OrderStage::Exchanging => Some(Leg::Exchange),
            OrderStage::Withdrawing => Some(Leg::Withdraw),
            OrderStage::Completed => None,
        }
    }
}

/// What kind of work a broker order performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    /// Deposit, exchange and withdraw on behalf of bundled trades
    Trade,
}

/// Deposit leg: move funds from the wallet onto the market.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepositLeg {
    /// Source wallet address; resolved to the first wallet address if unset
    pub from_address: Option<String>,
    pub amount: Decimal,
    /// Market deposit address, resolved during check
    pub deposit_address: Option<String>,
    /// Wallet transaction id, recorded by execute
    pub txid: Option<String>,
    pub confirmations: u32,
}

/// Exchange leg: convert deposited funds on the market.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeLeg {
    pub amount: Decimal,
    pub sell_currency: String,
    pub target_currency: String,
    /// Optional limit price; `None` places a market order
    pub price: Option<Decimal>,
    /// Market order id, recorded by execute
    pub order_id: Option<String>,
    pub quantity_filled: Decimal,
    /// Target-currency proceeds of the fill
    pub proceeds: Decimal,
}

/// Withdraw leg: move proceeds from the market back to a wallet address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WithdrawLeg {
    pub to_address: Option<String>,
    /// Fraction of exchange proceeds to withdraw (0..=1)
    pub fraction: Decimal,
    /// Resolved target-currency amount, computed during check
    pub amount: Decimal,
    /// Market withdrawal id, recorded by execute
    pub withdraw_id: Option<String>,
    /// On-chain transaction id, once the market has sent the funds
    pub txid: Option<String>,
}

/// The orchestrator's unit of work: one submitted bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub id: Uuid,
    pub kind: OrderKind,
    pub market: String,
    pub deposit: DepositLeg,
    pub exchange: ExchangeLeg,
    pub withdraw: WithdrawLeg,
    pub ops: LegOps,
    pub stage: OrderStage,
    pub cancellable: bool,
    pub time_placed: DateTime<Utc>,
}

impl BrokerOrder {
    pub fn new(
        market: impl Into<String>,
        deposit: DepositLeg,
        exchange: ExchangeLeg,
        withdraw: WithdrawLeg,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: OrderKind::Trade,
            market: market.into(),
            deposit,
            exchange,
            withdraw,
            ops: LegOps::default(),
            stage: OrderStage::MakingDeposit,
            cancellable: true,
            time_placed: Utc::now(),
        }
    }

    /// True once every leg has settled and the order left the open set.
    pub fn is_completed(&self) -> bool {
        self.stage == OrderStage::Completed
    }
}

/// A durable ledger record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Record {
    Trade(TradeInfo),
    Order(BrokerOrder),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_status_terminal() {
        assert!(OpStatus::Completed.is_terminal());
        assert!(OpStatus::Skipped.is_terminal());
        assert!(OpStatus::Abandoned.is_terminal());
        assert!(OpStatus::Cancelled.is_terminal());
        assert!(!OpStatus::Processing.is_terminal());
        assert!(!OpStatus::Cancelling.is_terminal());
    }

    #[test]
    fn test_conclude_settles_leg() {
        let mut op = BrokerOp::default();
        op.conclude(OpStatus::Completed);
        assert_eq!(op.stage, OpStage::Done);
        assert_eq!(op.status, OpStatus::Completed);
        assert!(op.time_concluded.is_some());
    }

    #[test]
    fn test_leg_ordering() {
        assert_eq!(Leg::Deposit.next(), Some(Leg::Exchange));
        assert_eq!(Leg::Exchange.next(), Some(Leg::Withdraw));
        assert_eq!(Leg::Withdraw.next(), None);
    }

    #[test]
    fn test_record_roundtrip() {
        let req = TradeRequest {
            market: Some("paper".into()),
            amount: Decimal::from(3),
            sell_currency: "RTC".into(),
            target_currency: "USD".into(),
            price: None,
            deposit_address: None,
            withdraw_address: None,
            schedule: Schedule::Now,
        };
        let trade = TradeInfo::from_request(req, Utc::now());
        let json = serde_json::to_string(&Record::Trade(trade.clone())).unwrap();
        match serde_json::from_str(&json).unwrap() {
            Record::Trade(back) => {
                assert_eq!(back.id, trade.id);
                assert_eq!(back.status, TradeStatus::Recorded);
            }
            _ => panic!("wrong record variant"),
        }
    }
}
