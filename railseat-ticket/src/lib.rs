pub mod guard;
pub mod ledger;
pub mod orchestrator;
pub mod orders;
pub mod reconcile;
pub mod token_bucket;
pub mod validation;

pub use guard::{ConcurrencyGuard, HeldLocks, LocalLockRegistry};
pub use ledger::{ClassCounts, RemainingTicketLedger};
pub use orchestrator::{TicketDeps, TicketService};
pub use orders::{InMemoryOrderGateway, OrderBook};
pub use reconcile::ReconcileScheduler;
pub use token_bucket::{Admission, AdmissionTokenBucket};
pub use validation::{PurchaseFilter, PurchaseValidator};
