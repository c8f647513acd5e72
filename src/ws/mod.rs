pub mod backoff;
pub mod connection;
pub mod dispatcher;
pub mod driver;
pub mod frames;
pub mod scheduler;
