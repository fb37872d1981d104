pub mod events;
pub mod ticket;
pub mod train;
