//! tradebatch - batched trade execution engine
//!
//! Accepts user trade requests, bundles compatible ones and drives each
//! bundle through a deposit / exchange / withdraw pipeline against
//! pluggable wallet and market services. All durable state lives in an
//! append-only ledger, so both the scheduler and the order engine can be
//! rebuilt after a crash without repeating irreversible actions.
//!
//! The engine is tick-driven and single-threaded by design: callers own
//! the loop and call `Trader::process_trades` and `Broker::process_orders`
//! periodically. Operations that are not ready yet signal `Error::Again`
//! and are retried on a later tick.

pub mod book;
pub mod broker;
pub mod core;
pub mod events;
pub mod paper;
pub mod trader;

pub use crate::core::{Config, Error, Result};
pub use book::{FileBook, MemBook};
pub use broker::Broker;
pub use trader::Trader;
