//! ZCL frame structure
//!
//! Frame format (little-endian):
//! ```text
//! [Frame Control: 1 byte]
//! [Manufacturer Code: 0/2 bytes]
//! [Transaction Sequence: 1 byte]
//! [Command ID: 1 byte]
//! [Payload: variable]
//! ```

use crate::types::ProtocolError;

/// Frame control: cluster-specific command (vs. profile-wide)
pub const FC_CLUSTER_COMMAND: u8 = 0x01;
/// Frame control: manufacturer-specific bit
pub const FC_MANUFACTURER_SPECIFIC: u8 = 0x04;
/// Frame control: direction server-to-client
pub const FC_DIRECTION_SERVER_TO_CLIENT: u8 = 0x08;
/// Frame control: disable default response
pub const FC_DISABLE_DEFAULT_RESPONSE: u8 = 0x10;

/// ZCL frame (Zigbee Cluster Library)
#[derive(Debug, Clone)]
pub struct ZclFrame {
    pub frame_control: u8,
    pub manufacturer_code: Option<u16>,
    pub sequence: u8,
    pub command_id: u8,
    pub payload: Vec<u8>,
}

impl ZclFrame {
    /// Create a cluster-specific command frame (client to server)
    #[must_use]
    pub fn cluster_command(sequence: u8, command_id: u8) -> Self {
        Self {
            frame_control: FC_CLUSTER_COMMAND | FC_DISABLE_DEFAULT_RESPONSE,
            manufacturer_code: None,
            sequence,
            command_id,
            payload: Vec::new(),
        }
    }

    /// Create a profile-wide (global) command frame, e.g. read attributes
    #[must_use]
    pub fn global_command(sequence: u8, command_id: u8) -> Self {
        Self {
            frame_control: FC_DISABLE_DEFAULT_RESPONSE,
            manufacturer_code: None,
            sequence,
            command_id,
            payload: Vec::new(),
        }
    }

    /// Parse a ZCL frame from raw ASDU bytes
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 3 {
            return Err(ProtocolError::FrameTooShort(data.len()));
        }

        let frame_control = data[0];
        let mut idx = 1;

        let manufacturer_code = if (frame_control & FC_MANUFACTURER_SPECIFIC) != 0 {
            if data.len() < idx + 2 {
                return Err(ProtocolError::FrameTooShort(data.len()));
            }
            let code = u16::from_le_bytes([data[idx], data[idx + 1]]);
            idx += 2;
            Some(code)
        } else {
            None
        };

        if data.len() < idx + 2 {
            return Err(ProtocolError::FrameTooShort(data.len()));
        }

        let sequence = data[idx];
        idx += 1;
        let command_id = data[idx];
        idx += 1;

        Ok(Self {
            frame_control,
            manufacturer_code,
            sequence,
            command_id,
            payload: data[idx..].to_vec(),
        })
    }

    /// Serialize to ASDU bytes
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(4 + self.payload.len());
        data.push(self.frame_control);
        if let Some(mfr) = self.manufacturer_code {
            data.extend_from_slice(&mfr.to_le_bytes());
        }
        data.push(self.sequence);
        data.push(self.command_id);
        data.extend_from_slice(&self.payload);
        data
    }

    /// Check if this is a cluster-specific command (vs. global)
    #[must_use]
    pub fn is_cluster_specific(&self) -> bool {
        (self.frame_control & 0x03) == FC_CLUSTER_COMMAND
    }

    /// Check if this is a profile-wide (global) command
    #[must_use]
    pub fn is_profile_wide(&self) -> bool {
        (self.frame_control & 0x03) == 0x00
    }

    /// Check if this is from server to client
    #[must_use]
    pub fn is_from_server(&self) -> bool {
        (self.frame_control & FC_DIRECTION_SERVER_TO_CLIENT) != 0
    }

    /// Check if this is the ZCL default response command
    #[must_use]
    pub fn is_default_response(&self) -> bool {
        self.is_profile_wide() && self.command_id == crate::cluster::global_cmd::DEFAULT_RESPONSE
    }
}
