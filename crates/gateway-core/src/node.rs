//! Radio-side node table
//!
//! The driver reports nodes it learned about on the mesh; the registry
//! keeps this view to resolve endpoints, descriptors and zombie state.

use zcl_protocol::SimpleDescriptor;

/// The radio's view of one mesh node
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub ext_addr: u64,
    pub nwk_addr: u16,
    pub manufacturer_code: u16,
    pub active_endpoints: Vec<u8>,
    pub simple_descriptors: Vec<SimpleDescriptor>,
    /// True when the mesh considers the node unreachable
    pub zombie: bool,
}

impl NodeInfo {
    #[must_use]
    pub fn new(ext_addr: u64, nwk_addr: u16) -> Self {
        Self {
            ext_addr,
            nwk_addr,
            manufacturer_code: 0,
            active_endpoints: Vec::new(),
            simple_descriptors: Vec::new(),
            zombie: false,
        }
    }

    #[must_use]
    pub fn has_active_endpoint(&self, endpoint: u8) -> bool {
        self.active_endpoints.contains(&endpoint)
    }

    #[must_use]
    pub fn simple_descriptor(&self, endpoint: u8) -> Option<&SimpleDescriptor> {
        self.simple_descriptors.iter().find(|sd| sd.endpoint == endpoint)
    }

    /// Add or replace a simple descriptor, keeping the endpoint list in sync.
    pub fn upsert_simple_descriptor(&mut self, sd: SimpleDescriptor) {
        if !self.active_endpoints.contains(&sd.endpoint) {
            self.active_endpoints.push(sd.endpoint);
        }
        if let Some(existing) = self
            .simple_descriptors
            .iter_mut()
            .find(|d| d.endpoint == sd.endpoint)
        {
            *existing = sd;
        } else {
            self.simple_descriptors.push(sd);
        }
    }
}

/// Node lifecycle events delivered by the radio driver
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A node joined or re-announced with its descriptors
    Added(NodeInfo),
    /// The node's simple descriptors changed
    UpdatedDescriptors(NodeInfo),
    /// The mesh's reachability verdict flipped
    ZombieChanged { ext_addr: u64, zombie: bool },
    /// The node left the mesh
    Removed { ext_addr: u64 },
    /// Battery state derived from the node power descriptor,
    /// 100/66/33/0 for levels, 255 when invalid
    PowerDescriptor { ext_addr: u64, battery: u8 },
}
