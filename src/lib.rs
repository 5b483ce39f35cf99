//! Two-peer discovery, leader election and counter synchronization over a
//! short-range radio link.
//!
//! Each node advertises and scans at the same time. Once one side connects,
//! it reads the other's epoch: the longer-running node becomes Master, the
//! other Client. The Master then keeps a shared counter in step on the Client.

pub mod link;
pub mod node;
pub mod sync;
pub mod transport;
