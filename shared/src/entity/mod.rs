//! `SeaORM` entities for everything the execution core persists.

pub mod capital_allocations;
pub mod credential_sets;
pub mod investment_universes;
pub mod order_fills;
pub mod orders;
pub mod positions;
pub mod signal_consumptions;
pub mod strategies;
pub mod strategy_universe_bindings;
pub mod trading_signals;
pub mod universe_members;
