pub mod bootstrap;
pub mod provisioning;

pub use bootstrap::{bootstrap, Bootstrap};
pub use provisioning::{Broker, BrokerSettings};
