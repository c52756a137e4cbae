pub mod artnet;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod http;
pub mod message;
pub mod metrics;
pub mod udp;
pub mod workers;
