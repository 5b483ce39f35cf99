// Link module - THE RELATIONSHIP
// Shared link state, when to connect, and who leads once connected

mod manager;
mod negotiator;
mod types;

pub use types::{
    // Errors
    LinkError,
    // Identity and ordering
    Epoch, NodeIdentity, Role,
    // State
    ConnectionAttempt, InboundLink, LinkContext, LinkState, Session,
};

pub use manager::{AttemptAction, ConnectionManager, ManagerStats};
pub use negotiator::{decide_role, RoleNegotiator};
