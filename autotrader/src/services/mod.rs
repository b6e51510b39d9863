pub mod capital_ledger;
pub mod condition;
pub mod credential_vault;
pub mod emergency;
pub mod events;
pub mod order_manager;
pub mod scheduler;
pub mod signal_generator;
pub mod signal_ingester;
pub mod sizing;
pub mod universe_binder;

pub use capital_ledger::{AllocationRequest, CapitalLedger, CapitalSnapshot, Reservation};
pub use condition::{Condition, MarketContext, MarketField, Operand, Operator};
pub use credential_vault::{CredentialVault, NewCredential};
pub use emergency::{
    BulkItem, BulkOperation, BulkReport, CancelAllPending, Confirmation, EmergencyController,
    HaltAll, HaltReport, ItemOutcome, LiquidateAll,
};
pub use events::{EventBus, TradingEvent};
pub use order_manager::{FillOutcome, OrderLifecycleManager, OrderRequest, PlacementOutcome, SyncReport};
pub use scheduler::{StrategyFailure, StrategyPass, StrategyScheduler, TickReport};
pub use signal_generator::SignalGenerator;
pub use signal_ingester::{IngestOutcome, SignalIngester};
pub use sizing::{PercentOfAllocation, PositionSizer, SizingContext};
pub use universe_binder::UniverseBinder;
