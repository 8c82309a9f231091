use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

pub const MESG_SESSION: u16 = 18;
pub const MESG_LAP: u16 = 19;
pub const MESG_RECORD: u16 = 20;
pub const MESG_FIELD_DESCRIPTION: u16 = 206;

pub const FIELD_TIMESTAMP: u8 = 253;

/// Seconds between the Unix epoch and the FIT epoch (1989-12-31T00:00:00Z).
pub const FIT_EPOCH_OFFSET: i64 = 631_065_600;

const CRC_TABLE: [u16; 16] = [
    0x0000, 0xCC01, 0xD801, 0x1400, 0xF001, 0x3C00, 0x2800, 0xE401, 0xA001, 0x6C00, 0x7800,
    0xB401, 0x5000, 0x9C01, 0x8801, 0x4400,
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FitError {
    #[error("file too short for a FIT header")]
    TooShort,
    #[error("missing .FIT signature")]
    BadSignature,
    #[error("truncated data at byte {0}")]
    Truncated(usize),
    #[error("data message for undefined local type {0}")]
    MissingDefinition(u8),
    #[error("crc mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    Crc { stored: u16, computed: u16 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FitValue {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
    Text(String),
}

impl FitValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FitValue::Signed(value) => Some(*value as f64),
            FitValue::Unsigned(value) => Some(*value as f64),
            FitValue::Float(value) => Some(*value),
            FitValue::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FitValue::Signed(value) => Some(*value),
            FitValue::Unsigned(value) => i64::try_from(*value).ok(),
            FitValue::Float(_) | FitValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FitValue::Text(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitMessage {
    pub global: u16,
    pub fields: BTreeMap<u8, FitValue>,
    pub developer: BTreeMap<String, FitValue>,
}

impl FitMessage {
    pub fn get(&self, field: u8) -> Option<&FitValue> {
        self.fields.get(&field)
    }

    pub fn raw_f64(&self, field: u8) -> Option<f64> {
        self.get(field).and_then(FitValue::as_f64)
    }

    /// Applies the profile scale/offset: `raw / scale - offset`.
    pub fn scaled(&self, field: u8, scale: f64, offset: f64) -> Option<f64> {
        self.raw_f64(field).map(|raw| raw / scale - offset)
    }

    pub fn timestamp(&self) -> Option<u32> {
        self.get(FIELD_TIMESTAMP)
            .and_then(FitValue::as_i64)
            .and_then(|value| u32::try_from(value).ok())
    }

    pub fn developer_f64(&self, name: &str) -> Option<f64> {
        self.developer.get(name).and_then(FitValue::as_f64)
    }
}

#[derive(Debug, Clone, Copy)]
struct FieldDef {
    num: u8,
    size: u8,
    base_type: u8,
}

#[derive(Debug, Clone, Copy)]
struct DevFieldDef {
    num: u8,
    size: u8,
    dev_index: u8,
}

#[derive(Debug, Clone)]
struct Definition {
    global: u16,
    big_endian: bool,
    fields: Vec<FieldDef>,
    dev_fields: Vec<DevFieldDef>,
}

#[derive(Debug, Clone)]
struct DevFieldInfo {
    name: String,
    base_type: u8,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], FitError> {
        let end = self.pos.checked_add(len).ok_or(FitError::Truncated(self.pos))?;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or(FitError::Truncated(self.pos))?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, FitError> {
        Ok(self.take(1)?[0])
    }
}

pub fn crc16(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0u16, |crc, byte| {
        let tmp = CRC_TABLE[(crc & 0xF) as usize];
        let crc = ((crc >> 4) & 0x0FFF) ^ tmp ^ CRC_TABLE[(byte & 0xF) as usize];
        let tmp = CRC_TABLE[(crc & 0xF) as usize];
        ((crc >> 4) & 0x0FFF) ^ tmp ^ CRC_TABLE[((byte >> 4) & 0xF) as usize]
    })
}

pub fn decode(bytes: &[u8]) -> Result<Vec<FitMessage>, FitError> {
    if bytes.len() < 12 {
        return Err(FitError::TooShort);
    }
    let header_size = bytes[0] as usize;
    if header_size < 12 || bytes.len() < header_size {
        return Err(FitError::TooShort);
    }
    if &bytes[8..12] != b".FIT" {
        return Err(FitError::BadSignature);
    }
    let data_size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let data_end = header_size
        .checked_add(data_size)
        .filter(|end| *end <= bytes.len())
        .ok_or(FitError::Truncated(bytes.len()))?;

    if let Some(stored) = bytes.get(data_end..data_end + 2) {
        let stored = u16::from_le_bytes([stored[0], stored[1]]);
        let computed = crc16(&bytes[..data_end]);
        if stored != computed {
            return Err(FitError::Crc { stored, computed });
        }
    }

    let mut reader = Reader {
        data: &bytes[..data_end],
        pos: header_size,
    };
    let mut definitions: [Option<Definition>; 16] = Default::default();
    let mut dev_infos: HashMap<(u8, u8), DevFieldInfo> = HashMap::new();
    let mut last_timestamp: Option<u32> = None;
    let mut messages = Vec::new();

    while reader.pos < data_end {
        let header = reader.u8()?;
        if header & 0x80 != 0 {
            let local = (header >> 5) & 0x03;
            let offset = u32::from(header & 0x1F);
            let definition = definitions[local as usize]
                .as_ref()
                .ok_or(FitError::MissingDefinition(local))?;
            let mut message = read_data(&mut reader, definition, &dev_infos)?;
            if let Some(last) = last_timestamp {
                let mut timestamp = (last & !0x1F) + offset;
                if offset < (last & 0x1F) {
                    timestamp += 0x20;
                }
                message
                    .fields
                    .insert(FIELD_TIMESTAMP, FitValue::Unsigned(u64::from(timestamp)));
                last_timestamp = Some(timestamp);
            }
            messages.push(message);
            continue;
        }

        let local = header & 0x0F;
        if header & 0x40 != 0 {
            let has_dev = header & 0x20 != 0;
            definitions[local as usize] = Some(read_definition(&mut reader, has_dev)?);
            continue;
        }

        let definition = definitions[local as usize]
            .as_ref()
            .ok_or(FitError::MissingDefinition(local))?;
        let message = read_data(&mut reader, definition, &dev_infos)?;
        if let Some(timestamp) = message.timestamp() {
            last_timestamp = Some(timestamp);
        }
        if message.global == MESG_FIELD_DESCRIPTION {
            register_dev_field(&message, &mut dev_infos);
        }
        messages.push(message);
    }

    Ok(messages)
}

fn read_definition(reader: &mut Reader<'_>, has_dev: bool) -> Result<Definition, FitError> {
    let _reserved = reader.u8()?;
    let big_endian = reader.u8()? == 1;
    let global_bytes = reader.take(2)?;
    let global = if big_endian {
        u16::from_be_bytes([global_bytes[0], global_bytes[1]])
    } else {
        u16::from_le_bytes([global_bytes[0], global_bytes[1]])
    };
    let count = reader.u8()?;
    let mut fields = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let raw = reader.take(3)?;
        fields.push(FieldDef {
            num: raw[0],
            size: raw[1],
            base_type: raw[2],
        });
    }
    let mut dev_fields = Vec::new();
    if has_dev {
        let count = reader.u8()?;
        for _ in 0..count {
            let raw = reader.take(3)?;
            dev_fields.push(DevFieldDef {
                num: raw[0],
                size: raw[1],
                dev_index: raw[2],
            });
        }
    }
    Ok(Definition {
        global,
        big_endian,
        fields,
        dev_fields,
    })
}

fn read_data(
    reader: &mut Reader<'_>,
    definition: &Definition,
    dev_infos: &HashMap<(u8, u8), DevFieldInfo>,
) -> Result<FitMessage, FitError> {
    let mut message = FitMessage {
        global: definition.global,
        ..FitMessage::default()
    };
    for field in &definition.fields {
        let raw = reader.take(field.size as usize)?;
        if let Some(value) = read_value(raw, field.base_type, definition.big_endian) {
            message.fields.insert(field.num, value);
        }
    }
    for field in &definition.dev_fields {
        let raw = reader.take(field.size as usize)?;
        let Some(info) = dev_infos.get(&(field.dev_index, field.num)) else {
            continue;
        };
        if let Some(value) = read_value(raw, info.base_type, definition.big_endian) {
            message.developer.insert(info.name.clone(), value);
        }
    }
    Ok(message)
}

fn register_dev_field(message: &FitMessage, dev_infos: &mut HashMap<(u8, u8), DevFieldInfo>) {
    let dev_index = message.get(0).and_then(FitValue::as_i64);
    let field_num = message.get(1).and_then(FitValue::as_i64);
    let base_type = message.get(2).and_then(FitValue::as_i64);
    let name = message.get(3).and_then(FitValue::as_text);
    if let (Some(dev_index), Some(field_num), Some(base_type), Some(name)) =
        (dev_index, field_num, base_type, name)
    {
        dev_infos.insert(
            (dev_index as u8, field_num as u8),
            DevFieldInfo {
                name: name.to_string(),
                base_type: base_type as u8,
            },
        );
    }
}

fn read_value(raw: &[u8], base_type: u8, big_endian: bool) -> Option<FitValue> {
    macro_rules! int {
        ($ty:ty, $n:expr) => {{
            let bytes: [u8; $n] = raw.get(..$n)?.try_into().ok()?;
            if big_endian {
                <$ty>::from_be_bytes(bytes)
            } else {
                <$ty>::from_le_bytes(bytes)
            }
        }};
    }

    match base_type & 0x1F {
        0x00 | 0x02 | 0x0D => {
            let value = *raw.first()?;
            (value != 0xFF).then_some(FitValue::Unsigned(u64::from(value)))
        }
        0x01 => {
            let value = *raw.first()? as i8;
            (value != 0x7F).then_some(FitValue::Signed(i64::from(value)))
        }
        0x03 => {
            let value = int!(i16, 2);
            (value != 0x7FFF).then_some(FitValue::Signed(i64::from(value)))
        }
        0x04 => {
            let value = int!(u16, 2);
            (value != 0xFFFF).then_some(FitValue::Unsigned(u64::from(value)))
        }
        0x05 => {
            let value = int!(i32, 4);
            (value != 0x7FFF_FFFF).then_some(FitValue::Signed(i64::from(value)))
        }
        0x06 => {
            let value = int!(u32, 4);
            (value != 0xFFFF_FFFF).then_some(FitValue::Unsigned(u64::from(value)))
        }
        0x07 => {
            let end = raw.iter().position(|byte| *byte == 0).unwrap_or(raw.len());
            let text = String::from_utf8_lossy(&raw[..end]).trim().to_string();
            (!text.is_empty()).then_some(FitValue::Text(text))
        }
        0x08 => {
            let value = int!(u32, 4);
            let value = f32::from_bits(value);
            value.is_finite().then_some(FitValue::Float(f64::from(value)))
        }
        0x09 => {
            let value = int!(u64, 8);
            let value = f64::from_bits(value);
            value.is_finite().then_some(FitValue::Float(value))
        }
        0x0A => {
            let value = *raw.first()?;
            (value != 0).then_some(FitValue::Unsigned(u64::from(value)))
        }
        0x0B => {
            let value = int!(u16, 2);
            (value != 0).then_some(FitValue::Unsigned(u64::from(value)))
        }
        0x0C => {
            let value = int!(u32, 4);
            (value != 0).then_some(FitValue::Unsigned(u64::from(value)))
        }
        0x0E => {
            let value = int!(i64, 8);
            (value != i64::MAX).then_some(FitValue::Signed(value))
        }
        0x0F => {
            let value = int!(u64, 8);
            (value != u64::MAX).then_some(FitValue::Unsigned(value))
        }
        0x10 => {
            let value = int!(u64, 8);
            (value != 0).then_some(FitValue::Unsigned(value))
        }
        _ => None,
    }
}
