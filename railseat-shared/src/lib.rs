pub mod models;

pub use models::events::AutoCancelRequested;
pub use models::ticket::{
    Allocation, CarriageRemaining, OrderDetail, OrderReference, OrderStatus, PassengerSeatRequest,
    PurchaseRequest, PurchaseResponse, SeatClassAvailability, SeatPrice, TicketOrderItem,
    TicketOrderRequest,
};
pub use models::train::{SeatClass, Segment, Train, VehicleType};
