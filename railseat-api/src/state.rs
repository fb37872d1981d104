use std::sync::Arc;

use railseat_ticket::TicketService;

#[derive(Clone)]
pub struct AppState {
    pub tickets: Arc<TicketService>,
}
