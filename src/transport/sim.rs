// Simulated Radio
// In-memory transport connecting any number of nodes through a shared broker.
// Used by the integration tests and by the `simulate` command.

use crate::transport::gatt::{AttrId, BleService};
use crate::transport::{AttributeValue, LinkHandle, PeerRef, Transport, TransportError, TransportEvent};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// How a simulated node answers incoming connection requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectBehavior {
    #[default]
    Accept,
    /// Reject every connection request
    Refuse,
    /// Never answer; the request stays pending until the caller cancels it
    Hang,
}

#[derive(Debug, Default)]
struct SimNode {
    advertising: bool,
    service: Option<BleService>,
    attributes: HashMap<AttrId, AttributeValue>,
    events: VecDeque<TransportEvent>,
    behavior: ConnectBehavior,
}

#[derive(Debug, Clone)]
struct SimLink {
    initiator: PeerRef,
    target: PeerRef,
}

#[derive(Debug, Default)]
struct NetworkState {
    nodes: HashMap<PeerRef, SimNode>,
    links: HashMap<LinkHandle, SimLink>,
    pending: HashMap<LinkHandle, SimLink>,
}

impl NetworkState {
    fn push_event(&mut self, peer: &PeerRef, event: TransportEvent) {
        if let Some(node) = self.nodes.get_mut(peer) {
            node.events.push_back(event);
        }
    }

    fn outbound_link(&self, link: &LinkHandle, caller: &PeerRef) -> Result<SimLink, TransportError> {
        match self.links.get(link) {
            Some(l) if &l.initiator == caller => Ok(l.clone()),
            _ => Err(TransportError::NotConnected),
        }
    }

    fn inbound_link(&self, target: &PeerRef) -> Option<(LinkHandle, SimLink)> {
        self.links
            .iter()
            .find(|(_, l)| &l.target == target)
            .map(|(h, l)| (*h, l.clone()))
    }
}

// ============================================================================
// SIM NETWORK
// ============================================================================

/// Shared broker routing links, attribute traffic and events between nodes
#[derive(Debug, Clone, Default)]
pub struct SimNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a radio with the given address and return its transport
    pub async fn attach(&self, mac_address: &str) -> SimTransport {
        let address = PeerRef::ble(mac_address);
        self.state
            .lock()
            .await
            .nodes
            .insert(address.clone(), SimNode::default());

        SimTransport {
            address,
            network: self.clone(),
            advertising: false,
        }
    }

    pub async fn set_connect_behavior(&self, peer: &PeerRef, behavior: ConnectBehavior) {
        if let Some(node) = self.state.lock().await.nodes.get_mut(peer) {
            node.behavior = behavior;
        }
    }

    /// Replace the service a node exposes (`None` removes it entirely)
    pub async fn set_service(&self, peer: &PeerRef, service: Option<BleService>) {
        if let Some(node) = self.state.lock().await.nodes.get_mut(peer) {
            node.service = service;
        }
    }

    /// Tear down every link touching `peer`, as if it walked out of range.
    /// Both ends receive their close events; pending requests fail.
    pub async fn drop_links(&self, peer: &PeerRef) -> usize {
        let mut state = self.state.lock().await;
        let doomed: Vec<(LinkHandle, SimLink)> = state
            .links
            .iter()
            .filter(|(_, l)| &l.initiator == peer || &l.target == peer)
            .map(|(h, l)| (*h, l.clone()))
            .collect();

        for (handle, link) in &doomed {
            state.links.remove(handle);
            state.push_event(
                &link.initiator,
                TransportEvent::OutboundLinkClosed {
                    link: *handle,
                    reason: "link lost".to_string(),
                },
            );
            state.push_event(&link.target, TransportEvent::InboundLinkClosed { link: *handle });
        }

        // Requests still waiting on an answer fail instead
        let stranded: Vec<(LinkHandle, SimLink)> = state
            .pending
            .iter()
            .filter(|(_, l)| &l.initiator == peer || &l.target == peer)
            .map(|(h, l)| (*h, l.clone()))
            .collect();
        for (handle, link) in stranded {
            state.pending.remove(&handle);
            let error = TransportError::ConnectionFailed(format!("{} out of range", link.target));
            state.push_event(&link.initiator, TransportEvent::ConnectFailed { link: handle, error });
        }
        doomed.len()
    }

    /// Check whether a link from `initiator` to `target` is up
    pub async fn has_link(&self, initiator: &PeerRef, target: &PeerRef) -> bool {
        self.state
            .lock()
            .await
            .links
            .values()
            .any(|l| &l.initiator == initiator && &l.target == target)
    }

    pub async fn link_count(&self) -> usize {
        self.state.lock().await.links.len()
    }

    /// Connection requests that were neither answered nor cancelled
    pub async fn pending_connects(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_advertising(&self, peer: &PeerRef) -> bool {
        self.state
            .lock()
            .await
            .nodes
            .get(peer)
            .map(|n| n.advertising)
            .unwrap_or(false)
    }

    /// Read a node's own attribute as a connected peer would see it now
    pub async fn attribute(&self, peer: &PeerRef, attr: AttrId) -> Option<Vec<u8>> {
        self.state
            .lock()
            .await
            .nodes
            .get(peer)
            .and_then(|n| n.attributes.get(&attr))
            .map(|v| v.read_at(Instant::now()))
    }

    /// Queue an event for a node, as if its radio produced it
    pub async fn inject_event(&self, peer: &PeerRef, event: TransportEvent) {
        self.state.lock().await.push_event(peer, event);
    }
}

// ============================================================================
// SIM TRANSPORT
// ============================================================================

/// One node's view of the simulated radio
#[derive(Debug)]
pub struct SimTransport {
    address: PeerRef,
    network: SimNetwork,
    advertising: bool,
}

impl SimTransport {
    pub fn network(&self) -> &SimNetwork {
        &self.network
    }
}

impl Transport for SimTransport {
    fn local_address(&self) -> PeerRef {
        self.address.clone()
    }

    fn is_advertising(&self) -> bool {
        self.advertising
    }

    async fn register_service(&mut self, service: BleService) -> Result<(), TransportError> {
        let mut state = self.network.state.lock().await;
        let node = state
            .nodes
            .get_mut(&self.address)
            .ok_or_else(|| TransportError::InvalidOperation("radio detached".to_string()))?;
        node.service = Some(service);
        Ok(())
    }

    async fn advertise(&mut self) -> Result<(), TransportError> {
        let mut state = self.network.state.lock().await;
        let node = state
            .nodes
            .get_mut(&self.address)
            .ok_or_else(|| TransportError::InvalidOperation("radio detached".to_string()))?;
        if node.service.is_none() {
            return Err(TransportError::InvalidOperation(
                "Advertising requires a registered service".to_string(),
            ));
        }
        node.advertising = true;
        self.advertising = true;
        Ok(())
    }

    async fn stop_advertise(&mut self) -> Result<(), TransportError> {
        if let Some(node) = self.network.state.lock().await.nodes.get_mut(&self.address) {
            node.advertising = false;
        }
        self.advertising = false;
        Ok(())
    }

    async fn scan(&mut self, _duration: Duration) -> Result<Vec<PeerRef>, TransportError> {
        // Adverts are visible immediately, so the scan window is never waited out.
        let state = self.network.state.lock().await;
        let mut found: Vec<PeerRef> = state
            .nodes
            .iter()
            .filter(|(addr, node)| {
                **addr != self.address
                    && node.advertising
                    && node.service.as_ref().map(|s| s.uuid()) == Some(crate::transport::SERVICE_UUID)
            })
            .map(|(addr, _)| addr.clone())
            .collect();
        found.sort_by(|a, b| a.identity().cmp(b.identity()));
        Ok(found)
    }

    async fn stop_scan(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn connect(&mut self, peer: &PeerRef) -> Result<LinkHandle, TransportError> {
        if peer == &self.address {
            return Err(TransportError::InvalidOperation("cannot connect to self".to_string()));
        }

        let mut state = self.network.state.lock().await;
        let target = state
            .nodes
            .get(peer)
            .ok_or_else(|| TransportError::ConnectionFailed(format!("{} out of range", peer)))?;
        if !target.advertising {
            return Err(TransportError::ConnectionFailed(format!("{} is not advertising", peer)));
        }
        let behavior = target.behavior;

        let handle = LinkHandle::generate();
        let sim_link = SimLink {
            initiator: self.address.clone(),
            target: peer.clone(),
        };

        match behavior {
            ConnectBehavior::Refuse => {
                let error = TransportError::ConnectionRefused(peer.clone());
                state.push_event(&self.address, TransportEvent::ConnectFailed { link: handle, error });
            }
            ConnectBehavior::Hang => {
                state.pending.insert(handle, sim_link);
            }
            ConnectBehavior::Accept if state.inbound_link(peer).is_some() => {
                let error = TransportError::ConnectionFailed(format!("{} already has a client", peer));
                state.push_event(&self.address, TransportEvent::ConnectFailed { link: handle, error });
            }
            ConnectBehavior::Accept => {
                state.links.insert(handle, sim_link);
                state.push_event(&self.address, TransportEvent::OutboundLinkOpened { link: handle });
                state.push_event(
                    peer,
                    TransportEvent::InboundLinkOpened {
                        link: handle,
                        peer: self.address.clone(),
                    },
                );
            }
        }
        Ok(handle)
    }

    async fn discover_service(&mut self, link: &LinkHandle) -> Result<(), TransportError> {
        let state = self.network.state.lock().await;
        let sim_link = state.outbound_link(link, &self.address)?;
        let service = state
            .nodes
            .get(&sim_link.target)
            .and_then(|n| n.service.as_ref())
            .filter(|s| s.uuid() == crate::transport::SERVICE_UUID)
            .ok_or(TransportError::ServiceNotFound)?;

        match service.missing_attribute() {
            Some(attr) => Err(TransportError::AttributeNotFound(attr)),
            None => Ok(()),
        }
    }

    async fn disconnect(&mut self, link: &LinkHandle) -> Result<(), TransportError> {
        let mut state = self.network.state.lock().await;
        if let Some(pending) = state.pending.get(link) {
            if pending.initiator != self.address {
                return Err(TransportError::NotConnected);
            }
            state.pending.remove(link);
            return Ok(());
        }
        let sim_link = state.links.remove(link).ok_or(TransportError::NotConnected)?;

        if sim_link.initiator == self.address {
            state.push_event(&sim_link.target, TransportEvent::InboundLinkClosed { link: *link });
        } else if sim_link.target == self.address {
            state.push_event(
                &sim_link.initiator,
                TransportEvent::OutboundLinkClosed {
                    link: *link,
                    reason: "disconnected by peer".to_string(),
                },
            );
        } else {
            state.links.insert(*link, sim_link);
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }

    async fn read_attribute(&mut self, link: &LinkHandle, attr: AttrId) -> Result<Vec<u8>, TransportError> {
        let state = self.network.state.lock().await;
        let sim_link = state.outbound_link(link, &self.address)?;
        let target = state
            .nodes
            .get(&sim_link.target)
            .ok_or_else(|| TransportError::ReadFailed("peer vanished".to_string()))?;
        target
            .attributes
            .get(&attr)
            .map(|v| v.read_at(Instant::now()))
            .ok_or(TransportError::AttributeNotFound(attr))
    }

    async fn write_attribute(
        &mut self,
        link: &LinkHandle,
        attr: AttrId,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let mut state = self.network.state.lock().await;
        let sim_link = state.outbound_link(link, &self.address)?;
        let target = state
            .nodes
            .get_mut(&sim_link.target)
            .ok_or_else(|| TransportError::WriteFailed("peer vanished".to_string()))?;

        let writable = target
            .service
            .as_ref()
            .and_then(|s| s.characteristic(attr))
            .map(|c| c.can_write())
            .unwrap_or(false);
        if !writable {
            return Err(TransportError::WriteFailed(format!("{:?} is not writable", attr)));
        }

        target.attributes.insert(attr, AttributeValue::Bytes(data.to_vec()));
        target.events.push_back(TransportEvent::AttributeWritten {
            attr,
            data: data.to_vec(),
        });
        Ok(())
    }

    async fn set_attribute(&mut self, attr: AttrId, value: AttributeValue) -> Result<(), TransportError> {
        let mut state = self.network.state.lock().await;
        let node = state
            .nodes
            .get_mut(&self.address)
            .ok_or_else(|| TransportError::InvalidOperation("radio detached".to_string()))?;
        node.attributes.insert(attr, value);
        Ok(())
    }

    async fn notify(&mut self, attr: AttrId) -> Result<(), TransportError> {
        let mut state = self.network.state.lock().await;
        let Some((handle, sim_link)) = state.inbound_link(&self.address) else {
            return Ok(());
        };
        let data = state
            .nodes
            .get(&self.address)
            .and_then(|n| n.attributes.get(&attr))
            .map(|v| v.read_at(Instant::now()))
            .ok_or(TransportError::AttributeNotFound(attr))?;

        state.push_event(
            &sim_link.initiator,
            TransportEvent::Notified {
                link: handle,
                attr,
                data,
            },
        );
        Ok(())
    }

    async fn poll_events(&mut self) -> Vec<TransportEvent> {
        let mut state = self.network.state.lock().await;
        match state.nodes.get_mut(&self.address) {
            Some(node) => node.events.drain(..).collect(),
            None => Vec::new(),
        }
    }
}
