pub mod client;

pub use client::MessagesApi;
