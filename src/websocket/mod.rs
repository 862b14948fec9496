pub mod factory;
#[cfg(test)]
pub(crate) mod testing;

pub use factory::{Connector, TransportFrame, TransportSink, TransportStream, WebSocketFactory};
