//! Real-time ticket messaging client: REST calls for a ticket's thread plus a
//! reconnecting WebSocket channel for live events, typing and presence.

pub mod api;
pub mod config;
pub mod errors;
pub mod models;
pub mod service;
pub mod state;
pub mod ws;

pub use config::ClientConfig;
pub use errors::AppError;
pub use models::{Attachment, ConnectionState, Message, NewAttachment, Reaction};
pub use service::TicketSession;
pub use state::TicketState;
