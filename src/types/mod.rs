pub mod account;
pub mod event;
pub mod market;

pub use account::RawAccount;
pub use event::{EventKind, EventPayload, MarketEvent, SubscriptionLoss, SyncSummary};
pub use market::{Market, MarketStatus, Outcome};
