pub mod layout;
pub mod placement;
pub mod registry;
pub mod selection;
pub mod strategy;

pub use layout::{find_layout, SeatClassLayout, SeatGrid, SeatPosition, LAYOUTS};
pub use placement::{CarriageGrid, Placement};
pub use registry::{RegistryError, StrategyKey, StrategyRegistry};
pub use strategy::{LayoutStrategy, PurchaseStrategy};
