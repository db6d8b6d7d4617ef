use crate::EngineError;
use rust_decimal::Decimal;
use smol_str::{SmolStr, ToSmolStr};
use std::str::FromStr;

const FRAME_MAGIC: u8 = b'T';
const FRAME_VERSION: u8 = 1;

const TAG_DECIMAL: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_TEXT: u8 = 2;

/// One value of a self-describing snapshot frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameValue {
    Decimal(Decimal),
    Int(i64),
    Text(SmolStr),
}

impl FrameValue {
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            FrameValue::Decimal(value) => Some(*value),
            FrameValue::Int(value) => Some(Decimal::from(*value)),
            FrameValue::Text(_) => None,
        }
    }
}

/// Self-describing key-value binary frame, one per snapshot file.
///
/// Field order is stable: encode writes fields in insertion order and decode
/// preserves it, so a recorded run replays byte-identically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    fields: Vec<(SmolStr, FrameValue)>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl AsRef<str>, value: FrameValue) {
        self.fields.push((SmolStr::new(name.as_ref()), value));
    }

    pub fn get(&self, name: &str) -> Option<&FrameValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(SmolStr, FrameValue)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.fields.len() * 16);
        bytes.push(FRAME_MAGIC);
        bytes.push(FRAME_VERSION);
        bytes.extend_from_slice(&(self.fields.len() as u16).to_le_bytes());

        for (name, value) in &self.fields {
            bytes.push(name.len() as u8);
            bytes.extend_from_slice(name.as_bytes());

            match value {
                FrameValue::Decimal(decimal) => {
                    let text = decimal.to_string();
                    bytes.push(TAG_DECIMAL);
                    bytes.extend_from_slice(&(text.len() as u16).to_le_bytes());
                    bytes.extend_from_slice(text.as_bytes());
                }
                FrameValue::Int(int) => {
                    bytes.push(TAG_INT);
                    bytes.extend_from_slice(&8u16.to_le_bytes());
                    bytes.extend_from_slice(&int.to_le_bytes());
                }
                FrameValue::Text(text) => {
                    bytes.push(TAG_TEXT);
                    bytes.extend_from_slice(&(text.len() as u16).to_le_bytes());
                    bytes.extend_from_slice(text.as_bytes());
                }
            }
        }

        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EngineError> {
        let corrupt = |detail: &str| {
            EngineError::TransientIo(format!("corrupt snapshot frame: {detail}").to_smolstr())
        };

        if bytes.len() < 4 || bytes[0] != FRAME_MAGIC {
            return Err(corrupt("bad header"));
        }
        if bytes[1] != FRAME_VERSION {
            return Err(corrupt("unsupported version"));
        }

        let count = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
        let mut fields = Vec::with_capacity(count);
        let mut offset = 4;

        for _ in 0..count {
            let name_len = *bytes.get(offset).ok_or_else(|| corrupt("truncated name length"))? as usize;
            offset += 1;

            let name = bytes
                .get(offset..offset + name_len)
                .ok_or_else(|| corrupt("truncated name"))?;
            let name = std::str::from_utf8(name).map_err(|_| corrupt("name not utf8"))?;
            offset += name_len;

            let tag = *bytes.get(offset).ok_or_else(|| corrupt("truncated tag"))?;
            offset += 1;

            let value_len = bytes
                .get(offset..offset + 2)
                .ok_or_else(|| corrupt("truncated value length"))?;
            let value_len = u16::from_le_bytes([value_len[0], value_len[1]]) as usize;
            offset += 2;

            let payload = bytes
                .get(offset..offset + value_len)
                .ok_or_else(|| corrupt("truncated value"))?;
            offset += value_len;

            let value = match tag {
                TAG_DECIMAL => {
                    let text = std::str::from_utf8(payload).map_err(|_| corrupt("decimal not utf8"))?;
                    FrameValue::Decimal(
                        Decimal::from_str(text).map_err(|_| corrupt("unparseable decimal"))?,
                    )
                }
                TAG_INT => {
                    let array: [u8; 8] =
                        payload.try_into().map_err(|_| corrupt("int payload size"))?;
                    FrameValue::Int(i64::from_le_bytes(array))
                }
                TAG_TEXT => {
                    let text = std::str::from_utf8(payload).map_err(|_| corrupt("text not utf8"))?;
                    FrameValue::Text(SmolStr::new(text))
                }
                _ => return Err(corrupt("unknown tag")),
            };

            fields.push((SmolStr::new(name), value));
        }

        Ok(Self { fields })
    }
}
