pub mod order;
pub mod ticket;
pub mod ticket_type;

pub use order::{LineItem, NewOrder, Order, OrderStatus};
pub use ticket::{new_ticket_code, NewTicket, Ticket, TicketStatus};
pub use ticket_type::{TicketCategory, TicketType};
