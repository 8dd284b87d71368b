//! Green power primitives
//!
//! Green power devices are batteryless switches addressed by a 32-bit
//! source id instead of a full extended address.

use crate::types::ProtocolError;

/// Green power command ids (GPD frame command field)
pub mod gp_cmd {
    pub const SCENE_0: u8 = 0x10;
    pub const SCENE_15: u8 = 0x1F;
    pub const OFF: u8 = 0x20;
    pub const ON: u8 = 0x21;
    pub const TOGGLE: u8 = 0x22;
    pub const RELEASE: u8 = 0x23;
    pub const PRESS_1_OF_1: u8 = 0x60;
    pub const RELEASE_1_OF_1: u8 = 0x61;
    pub const PRESS_1_OF_2: u8 = 0x62;
    pub const RELEASE_1_OF_2: u8 = 0x63;
    pub const PRESS_2_OF_2: u8 = 0x64;
    pub const RELEASE_2_OF_2: u8 = 0x65;
    pub const COMMISSIONING: u8 = 0xE0;
}

/// Returns true for the command ids treated as button events.
#[must_use]
pub fn is_button_event(command_id: u8) -> bool {
    matches!(
        command_id,
        gp_cmd::SCENE_0..=gp_cmd::SCENE_15
            | gp_cmd::OFF
            | gp_cmd::ON
            | gp_cmd::TOGGLE
            | gp_cmd::RELEASE
            | gp_cmd::PRESS_1_OF_1..=gp_cmd::RELEASE_2_OF_2
    )
}

/// An incoming green power data frame
#[derive(Debug, Clone)]
pub struct GpDataIndication {
    pub gpd_src_id: u32,
    pub gpd_command_id: u8,
    pub payload: Vec<u8>,
}

/// Decoded green power commissioning payload
#[derive(Debug, Clone)]
pub struct GpCommissioning {
    pub device_id: u8,
    pub options: u8,
    pub ext_options: u8,
    pub key: Option<[u8; 16]>,
    pub mic: Option<u32>,
    pub outgoing_counter: Option<u32>,
}

impl GpCommissioning {
    /// Parse a commissioning frame payload.
    ///
    /// Layout: device id (1), options (1), optional extended options (1),
    /// optional 16-byte key, optional MIC (4), optional outgoing counter (4).
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 2 {
            return Err(ProtocolError::FrameTooShort(data.len()));
        }

        let device_id = data[0];
        let options = data[1];
        let mut idx = 2;

        let ext_options_present = (options & 0x80) != 0;
        let ext_options = if ext_options_present {
            if idx >= data.len() {
                return Err(ProtocolError::FrameTooShort(data.len()));
            }
            let v = data[idx];
            idx += 1;
            v
        } else {
            0
        };

        let key_present = (ext_options & 0x20) != 0;
        let key_encrypted = (ext_options & 0x40) != 0;
        let counter_present = (ext_options & 0x80) != 0;

        let key = if key_present {
            if idx + 16 > data.len() {
                return Err(ProtocolError::FrameTooShort(data.len()));
            }
            let mut k = [0u8; 16];
            k.copy_from_slice(&data[idx..idx + 16]);
            idx += 16;
            Some(k)
        } else {
            None
        };

        let mic = if key_present && key_encrypted {
            if idx + 4 > data.len() {
                return Err(ProtocolError::FrameTooShort(data.len()));
            }
            let v = u32::from_le_bytes([data[idx], data[idx + 1], data[idx + 2], data[idx + 3]]);
            idx += 4;
            Some(v)
        } else {
            None
        };

        let outgoing_counter = if counter_present {
            if idx + 4 > data.len() {
                return Err(ProtocolError::FrameTooShort(data.len()));
            }
            Some(u32::from_le_bytes([
                data[idx],
                data[idx + 1],
                data[idx + 2],
                data[idx + 3],
            ]))
        } else {
            None
        };

        Ok(Self {
            device_id,
            options,
            ext_options,
            key,
            mic,
            outgoing_counter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_events() {
        assert!(is_button_event(gp_cmd::SCENE_0));
        assert!(is_button_event(0x1A));
        assert!(is_button_event(gp_cmd::TOGGLE));
        assert!(is_button_event(gp_cmd::RELEASE_2_OF_2));
        assert!(!is_button_event(gp_cmd::COMMISSIONING));
        assert!(!is_button_event(0x00));
    }

    #[test]
    fn test_commissioning_minimal() {
        let c = GpCommissioning::parse(&[0x02, 0x00]).unwrap();
        assert_eq!(c.device_id, 0x02);
        assert!(c.key.is_none());
        assert!(c.outgoing_counter.is_none());
    }

    #[test]
    fn test_commissioning_with_counter() {
        // ext options present, counter present
        let data = [0x02, 0x80, 0x80, 0x44, 0x33, 0x22, 0x11];
        let c = GpCommissioning::parse(&data).unwrap();
        assert_eq!(c.outgoing_counter, Some(0x11223344));
    }
}
