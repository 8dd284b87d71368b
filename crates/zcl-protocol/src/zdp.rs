//! ZigBee Device Profile payloads used by the binding manager

use crate::types::{Destination, ProtocolError};

/// ZDP cluster ids
pub mod clid {
    pub const DEVICE_ANNCE: u16 = 0x0013;
    pub const BIND_REQ: u16 = 0x0021;
    pub const UNBIND_REQ: u16 = 0x0022;
    pub const MGMT_BIND_REQ: u16 = 0x0033;
    pub const BIND_RSP: u16 = 0x8021;
    pub const UNBIND_RSP: u16 = 0x8022;
    pub const MGMT_BIND_RSP: u16 = 0x8033;
}

/// ZDP destination address mode bytes
const ADDR_MODE_GROUP: u8 = 0x01;
const ADDR_MODE_EXT: u8 = 0x03;

/// Encode a Bind_req / Unbind_req ASDU.
///
/// Layout: TSN, source ext address (8), source endpoint, cluster id (2),
/// destination address mode, then either a group id (2) or an ext address
/// (8) plus endpoint.
#[must_use]
pub fn encode_bind_request(
    tsn: u8,
    src_ext_addr: u64,
    src_endpoint: u8,
    cluster_id: u16,
    dst: &Destination,
) -> Vec<u8> {
    let mut asdu = Vec::with_capacity(21);
    asdu.push(tsn);
    asdu.extend_from_slice(&src_ext_addr.to_le_bytes());
    asdu.push(src_endpoint);
    asdu.extend_from_slice(&cluster_id.to_le_bytes());

    match dst {
        Destination::Group(group) => {
            asdu.push(ADDR_MODE_GROUP);
            asdu.extend_from_slice(&group.to_le_bytes());
        }
        Destination::Ext { addr, endpoint } => {
            asdu.push(ADDR_MODE_EXT);
            asdu.extend_from_slice(&addr.to_le_bytes());
            asdu.push(*endpoint);
        }
        Destination::Nwk { .. } => {
            // bindings never target short addresses; encode as ext 0
            asdu.push(ADDR_MODE_EXT);
            asdu.extend_from_slice(&0u64.to_le_bytes());
            asdu.push(0);
        }
    }

    asdu
}

/// A Bind_rsp / Unbind_rsp ASDU
#[derive(Debug, Clone)]
pub struct BindResponse {
    pub tsn: u8,
    pub status: u8,
}

impl BindResponse {
    pub fn parse(asdu: &[u8]) -> Result<Self, ProtocolError> {
        if asdu.len() < 2 {
            return Err(ProtocolError::FrameTooShort(asdu.len()));
        }
        Ok(Self {
            tsn: asdu[0],
            status: asdu[1],
        })
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == 0x00
    }
}
