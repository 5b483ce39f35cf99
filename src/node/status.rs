// Status Report
// Snapshot of a node's relationship and counter, logged periodically

use crate::link::{LinkState, NodeIdentity, Role};
use std::fmt;
use tokio::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeStatus {
    pub identity: NodeIdentity,
    pub role: Role,
    pub state: LinkState,
    /// An outbound link we initiated is up
    pub outbound: bool,
    /// A peer is attached to our service
    pub inbound: bool,
    pub counter: u32,
    /// How long the outstanding connection attempt has been running
    pub connect_pending: Option<Duration>,
    pub scan_pending: bool,
}

impl NodeStatus {
    /// Both directions up and a role negotiated
    pub fn is_paired(&self) -> bool {
        self.outbound && self.inbound && self.role.is_assigned()
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] role={} state={} outbound={} inbound={} counter={} ",
            self.identity, self.role, self.state, self.outbound, self.inbound, self.counter
        )?;
        match self.connect_pending {
            Some(age) => write!(f, "connect_pending={}ms", age.as_millis())?,
            None => f.write_str("connect_pending=no")?,
        }
        write!(f, " scan_pending={}", self.scan_pending)
    }
}
