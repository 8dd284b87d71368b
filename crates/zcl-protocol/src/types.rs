//! APS-layer primitives shared between the core and the radio driver

use thiserror::Error;

/// Protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("Unknown command ID: {0:#04X}")]
    UnknownCommand(u8),

    #[error("Unsupported ZCL data type: {0:#04X}")]
    UnsupportedDataType(u8),
}

/// APS-layer delivery status carried in a data confirm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApsStatus {
    Success,
    NoAck,
    Other(u8),
}

impl ApsStatus {
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => ApsStatus::Success,
            0xA7 => ApsStatus::NoAck,
            v => ApsStatus::Other(v),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ApsStatus::Success)
    }
}

/// APS destination addressing
///
/// Per-destination serialization in the pipeline compares only the address
/// part; the endpoint does not separate destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Group (multicast) address
    Group(u16),
    /// Network short address plus endpoint
    Nwk { addr: u16, endpoint: u8 },
    /// 64-bit extended address plus endpoint
    Ext { addr: u64, endpoint: u8 },
}

impl Destination {
    /// True when both destinations refer to the same node or group.
    #[must_use]
    pub fn same_address(&self, other: &Destination) -> bool {
        match (self, other) {
            (Destination::Group(a), Destination::Group(b)) => a == b,
            (Destination::Nwk { addr: a, .. }, Destination::Nwk { addr: b, .. }) => a == b,
            (Destination::Ext { addr: a, .. }, Destination::Ext { addr: b, .. }) => a == b,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_group(&self) -> bool {
        matches!(self, Destination::Group(_))
    }

    #[must_use]
    pub fn group(&self) -> Option<u16> {
        match self {
            Destination::Group(g) => Some(*g),
            _ => None,
        }
    }

    #[must_use]
    pub fn ext_addr(&self) -> Option<u64> {
        match self {
            Destination::Ext { addr, .. } => Some(*addr),
            _ => None,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> Option<u8> {
        match self {
            Destination::Group(_) => None,
            Destination::Nwk { endpoint, .. } | Destination::Ext { endpoint, .. } => {
                Some(*endpoint)
            }
        }
    }
}

/// APS transmit options
pub mod tx_options {
    pub const NONE: u8 = 0x00;
    /// APS acknowledged transmission
    pub const ACK: u8 = 0x04;
}

/// APSDE-DATA.request primitive handed to the radio driver
#[derive(Debug, Clone)]
pub struct ApsDataRequest {
    pub id: u8,
    pub dst: Destination,
    pub profile_id: u16,
    pub cluster_id: u16,
    pub src_endpoint: u8,
    pub asdu: Vec<u8>,
    pub tx_options: u8,
    pub radius: u8,
}

impl ApsDataRequest {
    /// A unicast request towards a light endpoint with APS ack
    #[must_use]
    pub fn unicast(id: u8, addr: u64, endpoint: u8, profile_id: u16, cluster_id: u16) -> Self {
        Self {
            id,
            dst: Destination::Ext { addr, endpoint },
            profile_id,
            cluster_id,
            src_endpoint: 0x01,
            asdu: Vec::new(),
            tx_options: tx_options::ACK,
            radius: 0,
        }
    }

    /// A groupcast request addressed at the broadcast endpoint
    #[must_use]
    pub fn groupcast(id: u8, group: u16, profile_id: u16, cluster_id: u16) -> Self {
        Self {
            id,
            dst: Destination::Group(group),
            profile_id,
            cluster_id,
            src_endpoint: 0x01,
            asdu: Vec::new(),
            tx_options: tx_options::NONE,
            radius: 0,
        }
    }
}

/// APSDE-DATA.indication primitive delivered by the radio driver
#[derive(Debug, Clone)]
pub struct ApsDataIndication {
    pub src_ext_addr: u64,
    pub src_nwk_addr: u16,
    pub src_endpoint: u8,
    pub dst_endpoint: u8,
    pub profile_id: u16,
    pub cluster_id: u16,
    pub asdu: Vec<u8>,
    pub lqi: u8,
    pub rssi: i8,
}

/// APSDE-DATA.confirm primitive correlating a request id with its outcome
#[derive(Debug, Clone)]
pub struct ApsDataConfirm {
    pub id: u8,
    pub dst: Destination,
    pub status: ApsStatus,
}

/// An endpoint's manifest of profile, device id and clusters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleDescriptor {
    pub endpoint: u8,
    pub profile_id: u16,
    pub device_id: u16,
    pub in_clusters: Vec<u16>,
    pub out_clusters: Vec<u16>,
}

impl SimpleDescriptor {
    #[must_use]
    pub fn has_in_cluster(&self, cluster_id: u16) -> bool {
        self.in_clusters.contains(&cluster_id)
    }

    #[must_use]
    pub fn has_out_cluster(&self, cluster_id: u16) -> bool {
        self.out_clusters.contains(&cluster_id)
    }
}

/// Format a 64-bit extended address the way it appears in unique ids,
/// e.g. `00:21:2E:FF:FF:00:AA:BB-0B` with the endpoint suffix.
#[must_use]
pub fn format_unique_id(ext_addr: u64, endpoint: u8) -> String {
    let b = ext_addr.to_be_bytes();
    format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}-{:02X}",
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], endpoint
    )
}

/// Format an extended address without endpoint suffix (sensor unique ids).
#[must_use]
pub fn format_ext_addr(ext_addr: u64) -> String {
    let b = ext_addr.to_be_bytes();
    format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_same_address_ignores_endpoint() {
        let a = Destination::Ext { addr: 0x1122, endpoint: 1 };
        let b = Destination::Ext { addr: 0x1122, endpoint: 2 };
        let c = Destination::Ext { addr: 0x3344, endpoint: 1 };
        assert!(a.same_address(&b));
        assert!(!a.same_address(&c));
        assert!(!a.same_address(&Destination::Group(0x1122)));
    }

    #[test]
    fn test_unique_id_format() {
        let uid = format_unique_id(0x00212EFFFF00AABB, 0x0B);
        assert_eq!(uid, "00:21:2E:FF:FF:00:AA:BB-0B");
    }

    #[test]
    fn test_aps_status() {
        assert!(ApsStatus::from_u8(0x00).is_success());
        assert_eq!(ApsStatus::from_u8(0xA7), ApsStatus::NoAck);
        assert_eq!(ApsStatus::from_u8(0xD0), ApsStatus::Other(0xD0));
    }
}
