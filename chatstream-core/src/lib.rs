pub mod config;
pub mod controller;
pub mod coordinator;
pub mod error;
pub mod frame;
pub mod http_client;
pub mod model;
pub mod session;
pub mod telemetry;
pub mod token;
pub mod transport;
#[cfg(test)]
pub mod test_util;
