//! Cluster command payloads consumed and produced by the synchronizer
//!
//! All payloads are little-endian. Parsers work on the ZCL frame payload,
//! i.e. after the ZCL header has been stripped.

use crate::cluster::data_type;
use crate::types::ProtocolError;

/// A decoded ZCL attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    I16(i16),
    String(String),
}

impl AttrValue {
    /// Numeric view of the value, strings yield `None`.
    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            AttrValue::Bool(b) => Some(u32::from(*b)),
            AttrValue::U8(v) => Some(u32::from(*v)),
            AttrValue::U16(v) => Some(u32::from(*v)),
            AttrValue::U32(v) => Some(*v),
            AttrValue::I16(v) if *v >= 0 => Some(*v as u32),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            AttrValue::U8(v) => Some(*v != 0),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Decode a typed value at `idx`, returning the value and bytes consumed.
    fn decode(ty: u8, data: &[u8], idx: usize) -> Result<(AttrValue, usize), ProtocolError> {
        let need = |n: usize| {
            if data.len() < idx + n {
                Err(ProtocolError::FrameTooShort(data.len()))
            } else {
                Ok(())
            }
        };

        match ty {
            data_type::BOOLEAN => {
                need(1)?;
                Ok((AttrValue::Bool(data[idx] != 0), 1))
            }
            data_type::UINT8 | data_type::BITMAP8 | data_type::ENUM8 => {
                need(1)?;
                Ok((AttrValue::U8(data[idx]), 1))
            }
            data_type::UINT16 => {
                need(2)?;
                Ok((AttrValue::U16(u16::from_le_bytes([data[idx], data[idx + 1]])), 2))
            }
            data_type::INT16 => {
                need(2)?;
                Ok((AttrValue::I16(i16::from_le_bytes([data[idx], data[idx + 1]])), 2))
            }
            data_type::UINT32 => {
                need(4)?;
                let v = u32::from_le_bytes([data[idx], data[idx + 1], data[idx + 2], data[idx + 3]]);
                Ok((AttrValue::U32(v), 4))
            }
            data_type::STRING => {
                need(1)?;
                let len = data[idx] as usize;
                need(1 + len)?;
                let s = String::from_utf8_lossy(&data[idx + 1..idx + 1 + len]).into_owned();
                Ok((AttrValue::String(s), 1 + len))
            }
            other => Err(ProtocolError::UnsupportedDataType(other)),
        }
    }
}

/// One attribute record from a read response or a report
#[derive(Debug, Clone)]
pub struct AttributeRecord {
    pub attr_id: u16,
    pub value: AttrValue,
}

/// Parse a Read Attributes Response payload (global command 0x01).
///
/// Records with a non-success status are skipped; records with a data type
/// the gateway does not track end parsing (trailing unknown records are not
/// needed by any consumer).
pub fn parse_read_attributes_response(data: &[u8]) -> Result<Vec<AttributeRecord>, ProtocolError> {
    let mut records = Vec::new();
    let mut idx = 0;

    while idx + 3 <= data.len() {
        let attr_id = u16::from_le_bytes([data[idx], data[idx + 1]]);
        let status = data[idx + 2];
        idx += 3;

        if status != 0x00 {
            continue; // unsupported attribute, no value follows
        }

        if idx >= data.len() {
            return Err(ProtocolError::FrameTooShort(data.len()));
        }
        let ty = data[idx];
        idx += 1;

        match AttrValue::decode(ty, data, idx) {
            Ok((value, consumed)) => {
                idx += consumed;
                records.push(AttributeRecord { attr_id, value });
            }
            Err(ProtocolError::UnsupportedDataType(_)) => break,
            Err(e) => return Err(e),
        }
    }

    Ok(records)
}

/// Parse a Report Attributes payload (global command 0x0A).
pub fn parse_report_attributes(data: &[u8]) -> Result<Vec<AttributeRecord>, ProtocolError> {
    let mut records = Vec::new();
    let mut idx = 0;

    while idx + 3 <= data.len() {
        let attr_id = u16::from_le_bytes([data[idx], data[idx + 1]]);
        let ty = data[idx + 2];
        idx += 3;

        match AttrValue::decode(ty, data, idx) {
            Ok((value, consumed)) => {
                idx += consumed;
                records.push(AttributeRecord { attr_id, value });
            }
            Err(ProtocolError::UnsupportedDataType(_)) => break,
            Err(e) => return Err(e),
        }
    }

    Ok(records)
}

/// Encode a Read Attributes request payload.
#[must_use]
pub fn encode_read_attributes(attributes: &[u16]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(attributes.len() * 2);
    for attr in attributes {
        payload.extend_from_slice(&attr.to_le_bytes());
    }
    payload
}

/// Encode a Write Attributes request payload for a single attribute.
#[must_use]
pub fn encode_write_attribute(attr_id: u16, ty: u8, value: &AttrValue) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&attr_id.to_le_bytes());
    payload.push(ty);
    match value {
        AttrValue::Bool(b) => payload.push(u8::from(*b)),
        AttrValue::U8(v) => payload.push(*v),
        AttrValue::U16(v) => payload.extend_from_slice(&v.to_le_bytes()),
        AttrValue::U32(v) => payload.extend_from_slice(&v.to_le_bytes()),
        AttrValue::I16(v) => payload.extend_from_slice(&v.to_le_bytes()),
        AttrValue::String(s) => {
            payload.push(s.len() as u8);
            payload.extend_from_slice(s.as_bytes());
        }
    }
    payload
}

/// Groups cluster: Get Group Membership Response (command 0x02)
#[derive(Debug, Clone)]
pub struct GetGroupMembershipResponse {
    pub capacity: u8,
    pub count: u8,
    pub groups: Vec<u16>,
}

impl GetGroupMembershipResponse {
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 2 {
            return Err(ProtocolError::FrameTooShort(data.len()));
        }

        let capacity = data[0];
        let count = data[1];

        let mut groups = Vec::with_capacity(count as usize);
        let mut idx = 2;
        for _ in 0..count {
            if idx + 2 > data.len() {
                break;
            }
            groups.push(u16::from_le_bytes([data[idx], data[idx + 1]]));
            idx += 2;
        }

        Ok(Self { capacity, count, groups })
    }
}

/// Groups cluster: Add Group Response (0x00) and Remove Group Response (0x03)
#[derive(Debug, Clone)]
pub struct GroupResponse {
    pub status: u8,
    pub group_id: u16,
}

impl GroupResponse {
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 3 {
            return Err(ProtocolError::FrameTooShort(data.len()));
        }
        Ok(Self {
            status: data[0],
            group_id: u16::from_le_bytes([data[1], data[2]]),
        })
    }
}

/// Scenes cluster: Get Scene Membership Response (command 0x06)
#[derive(Debug, Clone)]
pub struct GetSceneMembershipResponse {
    pub status: u8,
    pub capacity: u8,
    pub group_id: u16,
    pub scenes: Vec<u8>,
}

impl GetSceneMembershipResponse {
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 4 {
            return Err(ProtocolError::FrameTooShort(data.len()));
        }

        let status = data[0];
        let capacity = data[1];
        let group_id = u16::from_le_bytes([data[2], data[3]]);

        let mut scenes = Vec::new();
        if status == 0x00 && data.len() >= 5 {
            let count = data[4] as usize;
            for i in 0..count {
                if 5 + i < data.len() {
                    scenes.push(data[5 + i]);
                }
            }
        }

        Ok(Self { status, capacity, group_id, scenes })
    }
}

/// Scenes cluster: Store (0x04), Remove (0x02) and Add (0x00) Scene Response
#[derive(Debug, Clone)]
pub struct SceneResponse {
    pub status: u8,
    pub group_id: u16,
    pub scene_id: u8,
}

impl SceneResponse {
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 4 {
            return Err(ProtocolError::FrameTooShort(data.len()));
        }
        Ok(Self {
            status: data[0],
            group_id: u16::from_le_bytes([data[1], data[2]]),
            scene_id: data[3],
        })
    }
}

/// One cluster extension record inside a View Scene Response
#[derive(Debug, Clone)]
pub struct SceneExtension {
    pub cluster_id: u16,
    pub data: Vec<u8>,
}

/// Scenes cluster: View Scene Response (command 0x01)
///
/// Carries the stored transition time (1/10 s units) and per-cluster
/// extension records for on/off (0x0006), level (0x0008) and color (0x0300).
#[derive(Debug, Clone)]
pub struct ViewSceneResponse {
    pub status: u8,
    pub group_id: u16,
    pub scene_id: u8,
    pub transition_time: u16,
    pub extensions: Vec<SceneExtension>,
}

impl ViewSceneResponse {
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 4 {
            return Err(ProtocolError::FrameTooShort(data.len()));
        }

        let status = data[0];
        let group_id = u16::from_le_bytes([data[1], data[2]]);
        let scene_id = data[3];

        if status != 0x00 {
            return Ok(Self {
                status,
                group_id,
                scene_id,
                transition_time: 0,
                extensions: Vec::new(),
            });
        }

        if data.len() < 7 {
            return Err(ProtocolError::FrameTooShort(data.len()));
        }

        let transition_time = u16::from_le_bytes([data[4], data[5]]);

        // scene name: length-prefixed string, skipped
        let name_len = data[6] as usize;
        let mut idx = 7 + name_len;

        let mut extensions = Vec::new();
        while idx + 3 <= data.len() {
            let cluster_id = u16::from_le_bytes([data[idx], data[idx + 1]]);
            let len = data[idx + 2] as usize;
            idx += 3;

            if idx + len > data.len() {
                break;
            }
            extensions.push(SceneExtension {
                cluster_id,
                data: data[idx..idx + len].to_vec(),
            });
            idx += len;
        }

        Ok(Self { status, group_id, scene_id, transition_time, extensions })
    }

    /// On/off state from the 0x0006 extension, if present.
    #[must_use]
    pub fn on(&self) -> Option<bool> {
        self.extensions
            .iter()
            .find(|e| e.cluster_id == crate::cluster::id::ON_OFF)
            .and_then(|e| e.data.first())
            .map(|b| *b != 0)
    }

    /// Level from the 0x0008 extension, if present.
    #[must_use]
    pub fn level(&self) -> Option<u8> {
        self.extensions
            .iter()
            .find(|e| e.cluster_id == crate::cluster::id::LEVEL_CONTROL)
            .and_then(|e| e.data.first())
            .copied()
    }

    /// CIE xy from the 0x0300 extension, if present.
    #[must_use]
    pub fn color_xy(&self) -> Option<(u16, u16)> {
        self.extensions
            .iter()
            .find(|e| e.cluster_id == crate::cluster::id::COLOR_CONTROL)
            .and_then(|e| {
                if e.data.len() >= 4 {
                    Some((
                        u16::from_le_bytes([e.data[0], e.data[1]]),
                        u16::from_le_bytes([e.data[2], e.data[3]]),
                    ))
                } else {
                    None
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_membership_response() {
        // capacity=10, count=2, groups 0x0001 and 0x0004
        let data = [10, 2, 0x01, 0x00, 0x04, 0x00];
        let rsp = GetGroupMembershipResponse::parse(&data).unwrap();
        assert_eq!(rsp.capacity, 10);
        assert_eq!(rsp.groups, vec![1, 4]);
    }

    #[test]
    fn test_scene_membership_response() {
        // status=0, capacity=14, group=0x0003, count=2, scenes 1 and 10
        let data = [0x00, 14, 0x03, 0x00, 2, 1, 10];
        let rsp = GetSceneMembershipResponse::parse(&data).unwrap();
        assert_eq!(rsp.group_id, 3);
        assert_eq!(rsp.scenes, vec![1, 10]);
    }

    #[test]
    fn test_view_scene_response() {
        let data = [
            0x00, // status
            0x03, 0x00, // group 3
            0x0A, // scene 10
            0x14, 0x00, // transition time 2.0s
            0x00, // empty name
            0x06, 0x00, 0x01, 0x01, // on/off ext: on
            0x08, 0x00, 0x01, 0x80, // level ext: 128
            0x00, 0x03, 0x04, 0x11, 0x22, 0x33, 0x44, // color ext: x, y
        ];
        let rsp = ViewSceneResponse::parse(&data).unwrap();
        assert_eq!(rsp.transition_time, 20);
        assert_eq!(rsp.on(), Some(true));
        assert_eq!(rsp.level(), Some(128));
        assert_eq!(rsp.color_xy(), Some((0x2211, 0x4433)));
    }

    #[test]
    fn test_report_attributes() {
        // illuminance measured value: attr 0x0000, u16, 0x4E20
        let data = [0x00, 0x00, 0x21, 0x20, 0x4E];
        let records = parse_report_attributes(&data).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attr_id, 0x0000);
        assert_eq!(records[0].value, AttrValue::U16(0x4E20));
    }

    #[test]
    fn test_read_attributes_response_skips_unsupported_status() {
        // attr 0x0004 unsupported (status 0x86), attr 0x0005 string "LCT001"
        let data = [
            0x04, 0x00, 0x86, // unsupported
            0x05, 0x00, 0x00, 0x42, 6, b'L', b'C', b'T', b'0', b'0', b'1',
        ];
        let records = parse_read_attributes_response(&data).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value.as_str(), Some("LCT001"));
    }

    #[test]
    fn test_encode_read_attributes() {
        assert_eq!(encode_read_attributes(&[0x0000, 0x4000]), vec![0, 0, 0, 0x40]);
    }
}
