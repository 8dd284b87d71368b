//! Radio driver seam
//!
//! The radio stack is an external collaborator. The core hands it
//! APSDE-DATA.requests and consumes its event stream; everything else
//! (serial framing, rejoin handling) lives behind this trait.

use thiserror::Error;
use zcl_protocol::green_power::GpDataIndication;
use zcl_protocol::{ApsDataConfirm, ApsDataIndication, ApsDataRequest};

use crate::node::NodeEvent;

/// Errors surfaced by a radio driver
#[derive(Error, Debug)]
pub enum RadioError {
    #[error("Not in network")]
    NotInNetwork,

    #[error("Destination node is a zombie")]
    NodeIsZombie,

    #[error("Radio busy")]
    Busy,

    #[error("Radio error: {0}")]
    Other(String),
}

/// Events delivered by the radio driver to the gateway event loop
#[derive(Debug, Clone)]
pub enum RadioEvent {
    /// An inbound APS frame
    Indication(ApsDataIndication),
    /// The result of a previously issued request
    Confirm(ApsDataConfirm),
    /// Node lifecycle / descriptor updates
    Node(NodeEvent),
    /// An inbound green power frame
    GreenPower(GpDataIndication),
    /// The radio joined or left the network
    NetworkState { connected: bool },
}

/// The outbound half of the radio seam
pub trait RadioDriver {
    /// True while the radio is joined to a network.
    fn in_network(&self) -> bool;

    /// Submit an APSDE-DATA.request. Completion is reported
    /// asynchronously through a [`RadioEvent::Confirm`].
    fn aps_request(&mut self, req: &ApsDataRequest) -> Result<(), RadioError>;
}

/// A recording radio double for tests.
///
/// Requests are captured in submission order; failures can be injected
/// to exercise the pipeline's error paths.
#[derive(Default)]
pub struct MockRadio {
    pub connected: bool,
    pub sent: Vec<ApsDataRequest>,
    pub fail_next: bool,
    pub zombie_next: bool,
}

impl MockRadio {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connected: true,
            sent: Vec::new(),
            fail_next: false,
            zombie_next: false,
        }
    }

    /// Requests sent to the given cluster.
    #[must_use]
    pub fn sent_to_cluster(&self, cluster_id: u16) -> Vec<&ApsDataRequest> {
        self.sent.iter().filter(|r| r.cluster_id == cluster_id).collect()
    }

    pub fn clear(&mut self) {
        self.sent.clear();
    }
}

impl RadioDriver for MockRadio {
    fn in_network(&self) -> bool {
        self.connected
    }

    fn aps_request(&mut self, req: &ApsDataRequest) -> Result<(), RadioError> {
        if !self.connected {
            return Err(RadioError::NotInNetwork);
        }
        if self.fail_next {
            self.fail_next = false;
            return Err(RadioError::Busy);
        }
        if self.zombie_next {
            self.zombie_next = false;
            return Err(RadioError::NodeIsZombie);
        }
        self.sent.push(req.clone());
        Ok(())
    }
}
