pub mod cancel;
pub mod config;
pub mod controller;
pub mod delta;
pub mod error;
pub mod http_client;
pub mod model;
pub mod relay;
pub mod response;
pub mod sse;
pub mod stream;
pub mod telemetry;
pub mod transport;
#[cfg(test)]
pub mod test_util;

pub use controller::{ChatController, LastError};
pub use error::{ChatError, CoreResult};
