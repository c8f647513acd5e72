pub mod ticket_session;

pub use ticket_session::TicketSession;
