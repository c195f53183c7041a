//! Chat relay: debounced chat-to-backend dispatch and store-and-forward
//! delivery of backend responses.

pub mod aggregator;
pub mod channels;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod receiver;
pub mod record;
pub mod relay;
pub mod routing;
pub mod service;
pub mod store;
pub mod welcome;
