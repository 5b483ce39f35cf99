// Node module - THE COORDINATOR
// Configuration, the tick-driven owner of the link state and counter,
// and the periodic status report

mod config;
mod coordinator;
mod status;

pub use config::{ConfigError, NodeConfig};
pub use coordinator::Node;
pub use status::NodeStatus;
