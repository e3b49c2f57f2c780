//! Property elements: the 12-byte TLV carried in GetProp/SetProp bodies.
//!
//! Each element is a 4-byte tag, 4-byte flags, and 4-byte size, followed by
//! `size` value bytes. A list is terminated by the sentinel element whose tag
//! is four NUL bytes. Bit 0 of the flags marks a per-property error whose
//! body is a big-endian i32 error code.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use acp_core::catalogue::{self, Entry, Kind};
use acp_core::error::{Error, FramingError, PropertyError, Result, ValidationError};
use uuid::Uuid;

use crate::cflbinary::{self, Value};

/// Size of the element header on the wire.
pub const ELEMENT_HEADER_SIZE: usize = 12;

const ERROR_FLAG: u32 = 0x1;
const SENTINEL_NAME: [u8; 4] = [0; 4];

/// Host-side input to a property value, coerced per the catalogue kind.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    Plist(Value),
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Text(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Text(v)
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(v: Vec<u8>) -> Self {
        PropertyValue::Bytes(v)
    }
}

impl From<Value> for PropertyValue {
    fn from(v: Value) -> Self {
        PropertyValue::Plist(v)
    }
}

impl PropertyValue {
    fn variant_name(&self) -> &'static str {
        match self {
            PropertyValue::Int(_) => "integer",
            PropertyValue::Text(_) => "text",
            PropertyValue::Bytes(_) => "byte",
            PropertyValue::Plist(_) => "plist",
        }
    }
}

/// One typed attribute of the device.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub flags: u32,
    pub value: Vec<u8>,
}

impl Property {
    /// Construct a populated property, coercing and validating the value
    /// against the catalogue entry for `tag`.
    pub fn new(tag: &str, value: impl Into<PropertyValue>) -> Result<Self> {
        let entry = entry_for(tag)?;
        let encoded = encode_value(tag, entry.kind, value.into())?;
        if let Some(validator) = &entry.validator {
            if !validator.accepts(&encoded) {
                return Err(ValidationError::Rejected { tag: tag.to_string() }.into());
            }
        }
        Ok(Self {
            name: tag.to_string(),
            flags: 0,
            value: encoded,
        })
    }

    /// Construct an empty-valued element naming a tag to read.
    pub fn query(tag: &str) -> Result<Self> {
        entry_for(tag)?;
        Ok(Self {
            name: tag.to_string(),
            flags: 0,
            value: Vec::new(),
        })
    }

    /// The catalogue entry for this property.
    pub fn entry(&self) -> Option<&'static Entry> {
        catalogue::lookup(&self.name)
    }

    /// Serialize to wire bytes.
    pub fn compose(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ELEMENT_HEADER_SIZE + self.value.len());
        out.extend_from_slice(self.name.as_bytes());
        out.extend_from_slice(&self.flags.to_be_bytes());
        out.extend_from_slice(&(self.value.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.value);
        out
    }

    /// Parse one complete element. Returns `None` for the sentinel; a
    /// per-property error element surfaces as `Error::Property`.
    pub fn parse(data: &[u8]) -> Result<Option<Property>> {
        let header = ElementHeader::parse(data)?;
        let expected = ELEMENT_HEADER_SIZE + header.size as usize;
        if data.len() != expected {
            return Err(FramingError::ElementTruncated {
                expected,
                actual: data.len(),
            }
            .into());
        }
        header.into_property(data[ELEMENT_HEADER_SIZE..].to_vec())
    }

    /// Render the value for display according to its catalogue kind.
    pub fn format_value(&self) -> String {
        match self.entry() {
            Some(entry) => format_value(entry.kind, &self.value),
            None => hex_dump(&self.value),
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = self.entry().map(|e| e.description).unwrap_or("?");
        write!(f, "{} ({}) = {}", self.name, description, self.format_value())
    }
}

/// Wire bytes of the list-terminating sentinel element.
pub fn sentinel() -> Vec<u8> {
    let mut out = Vec::with_capacity(ELEMENT_HEADER_SIZE + 4);
    out.extend_from_slice(&SENTINEL_NAME);
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&4u32.to_be_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out
}

/// The fixed 12-byte element header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
    pub name: [u8; 4],
    pub flags: u32,
    pub size: u32,
}

impl ElementHeader {
    pub fn parse(data: &[u8]) -> Result<ElementHeader> {
        if data.len() < ELEMENT_HEADER_SIZE {
            return Err(FramingError::ElementTruncated {
                expected: ELEMENT_HEADER_SIZE,
                actual: data.len(),
            }
            .into());
        }
        Ok(ElementHeader {
            name: [data[0], data[1], data[2], data[3]],
            flags: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            size: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        })
    }

    /// Whether this header is the list terminator. Both the four-NUL-value
    /// form and the tag-only (zero size) form are accepted.
    pub fn is_sentinel(&self) -> bool {
        self.name == SENTINEL_NAME
    }

    /// Attach the value bytes read after this header. Returns `None` for the
    /// sentinel; error elements surface as `Error::Property`.
    pub fn into_property(self, value: Vec<u8>) -> Result<Option<Property>> {
        if self.is_sentinel() {
            return Ok(None);
        }
        let tag = match std::str::from_utf8(&self.name) {
            Ok(tag) if tag.is_ascii() => tag.to_string(),
            _ => {
                return Err(ValidationError::BadTag(
                    String::from_utf8_lossy(&self.name).into_owned(),
                )
                .into())
            }
        };
        if self.flags & ERROR_FLAG != 0 {
            if value.len() != 4 {
                return Err(FramingError::ElementTruncated {
                    expected: 4,
                    actual: value.len(),
                }
                .into());
            }
            let code = i32::from_be_bytes([value[0], value[1], value[2], value[3]]);
            return Err(PropertyError { tag, code }.into());
        }
        if catalogue::lookup(&tag).is_none() {
            return Err(ValidationError::UnknownTag(tag).into());
        }
        Ok(Some(Property {
            name: tag,
            flags: self.flags,
            value,
        }))
    }
}

fn entry_for(tag: &str) -> Result<&'static Entry> {
    if tag.len() != 4 || !tag.is_ascii() {
        return Err(ValidationError::BadTag(tag.to_string()).into());
    }
    catalogue::lookup(tag)
        .ok_or_else(|| Error::from(ValidationError::UnknownTag(tag.to_string())))
}

fn wrong_type(tag: &str, value: &PropertyValue) -> Error {
    ValidationError::WrongType {
        tag: tag.to_string(),
        given: value.variant_name(),
    }
    .into()
}

fn invalid(tag: &str, reason: impl Into<String>) -> Error {
    ValidationError::InvalidValue {
        tag: tag.to_string(),
        reason: reason.into(),
    }
    .into()
}

fn unsigned_be(tag: &str, v: i64, width: usize) -> Result<Vec<u8>> {
    let max: u64 = if width == 8 { u64::MAX } else { (1u64 << (8 * width)) - 1 };
    if v < 0 || v as u64 > max {
        return Err(invalid(tag, format!("{v} does not fit in {width} bytes")));
    }
    Ok((v as u64).to_be_bytes()[8 - width..].to_vec())
}

fn fixed_bytes(tag: &str, bytes: Vec<u8>, width: usize) -> Result<Vec<u8>> {
    if bytes.len() != width {
        return Err(invalid(tag, format!("expected {width} bytes, got {}", bytes.len())));
    }
    Ok(bytes)
}

/// Coerce a host value to its canonical big-endian wire layout.
fn encode_value(tag: &str, kind: Kind, value: PropertyValue) -> Result<Vec<u8>> {
    match (kind, value) {
        (Kind::Str, PropertyValue::Text(s)) => Ok(s.into_bytes()),
        (Kind::Str, PropertyValue::Bytes(b)) => Ok(b),

        (Kind::Log, PropertyValue::Text(s)) => Ok(s.into_bytes()),
        (Kind::Log, PropertyValue::Bytes(b)) => Ok(b),

        (Kind::Dec | Kind::Hex | Kind::U32, PropertyValue::Int(v)) => unsigned_be(tag, v, 4),
        (Kind::Dec | Kind::Hex | Kind::U32, PropertyValue::Bytes(b)) => fixed_bytes(tag, b, 4),

        (Kind::U16, PropertyValue::Int(v)) => unsigned_be(tag, v, 2),
        (Kind::U16, PropertyValue::Bytes(b)) => fixed_bytes(tag, b, 2),

        (Kind::U8, PropertyValue::Int(v)) => unsigned_be(tag, v, 1),
        (Kind::U8, PropertyValue::Bytes(b)) => fixed_bytes(tag, b, 1),

        (Kind::Ui8, PropertyValue::Int(v)) => {
            if v < 0 {
                return Err(invalid(tag, "negative value"));
            }
            let bytes = (v as u64).to_be_bytes();
            let first = bytes.iter().position(|&b| b != 0).unwrap_or(7);
            Ok(bytes[first..].to_vec())
        }
        (Kind::Ui8, PropertyValue::Bytes(b)) => Ok(b),

        (Kind::Boo, PropertyValue::Int(v)) => match v {
            0 | 1 => Ok(vec![v as u8]),
            _ => Err(invalid(tag, "boolean must be 0 or 1")),
        },
        (Kind::Boo, PropertyValue::Bytes(b)) => fixed_bytes(tag, b, 1),

        (Kind::Mac, PropertyValue::Bytes(b)) => fixed_bytes(tag, b, 6),
        (Kind::Mac, PropertyValue::Text(s)) => parse_mac(tag, &s),

        (Kind::Ip4, PropertyValue::Bytes(b)) => fixed_bytes(tag, b, 4),
        (Kind::Ip4, PropertyValue::Text(s)) => s
            .parse::<Ipv4Addr>()
            .map(|addr| addr.octets().to_vec())
            .map_err(|_| invalid(tag, format!("not an IPv4 address: {s:?}"))),

        (Kind::Ip6, PropertyValue::Bytes(b)) => fixed_bytes(tag, b, 16),
        (Kind::Ip6, PropertyValue::Text(s)) => s
            .parse::<Ipv6Addr>()
            .map(|addr| addr.octets().to_vec())
            .map_err(|_| invalid(tag, format!("not an IPv6 address: {s:?}"))),

        (Kind::Uid, PropertyValue::Bytes(b)) => fixed_bytes(tag, b, 16),
        (Kind::Uid, PropertyValue::Text(s)) => Uuid::parse_str(&s)
            .map(|u| u.as_bytes().to_vec())
            .map_err(|_| invalid(tag, format!("not a UUID: {s:?}"))),

        (Kind::Cfb, PropertyValue::Plist(tree)) => Ok(cflbinary::compose(&tree)),
        (Kind::Cfb, PropertyValue::Bytes(b)) => Ok(b),

        (Kind::Bin | Kind::Bpl, PropertyValue::Bytes(b)) => Ok(b),

        (_, value) => Err(wrong_type(tag, &value)),
    }
}

fn parse_mac(tag: &str, text: &str) -> Result<Vec<u8>> {
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() != 6 {
        return Err(invalid(tag, format!("not a MAC address: {text:?}")));
    }
    parts
        .iter()
        .map(|part| u8::from_str_radix(part, 16))
        .collect::<std::result::Result<Vec<u8>, _>>()
        .map_err(|_| invalid(tag, format!("not a MAC address: {text:?}")))
}

/// Render an encoded value for display according to its kind.
pub fn format_value(kind: Kind, value: &[u8]) -> String {
    match kind {
        Kind::Str | Kind::Log => String::from_utf8_lossy(value).into_owned(),
        Kind::Dec | Kind::U8 | Kind::U16 | Kind::U32 | Kind::Ui8 => match be_uint(value) {
            Some(v) => v.to_string(),
            None => hex_dump(value),
        },
        Kind::Hex => match be_uint(value) {
            Some(v) => format!("{v:#010x}"),
            None => hex_dump(value),
        },
        Kind::Boo => match value {
            [0] => "false".to_string(),
            [_] => "true".to_string(),
            _ => hex_dump(value),
        },
        Kind::Mac => {
            if value.len() == 6 {
                value
                    .iter()
                    .map(|b| format!("{b:02x}"))
                    .collect::<Vec<_>>()
                    .join(":")
            } else {
                hex_dump(value)
            }
        }
        Kind::Ip4 => match <[u8; 4]>::try_from(value) {
            Ok(octets) => Ipv4Addr::from(octets).to_string(),
            Err(_) => hex_dump(value),
        },
        Kind::Ip6 => match <[u8; 16]>::try_from(value) {
            Ok(octets) => Ipv6Addr::from(octets).to_string(),
            Err(_) => hex_dump(value),
        },
        Kind::Uid => match Uuid::from_slice(value) {
            Ok(uuid) => uuid.to_string(),
            Err(_) => hex_dump(value),
        },
        Kind::Cfb => match cflbinary::parse(value) {
            Ok(tree) => format!("{tree:?}"),
            Err(_) => hex_dump(value),
        },
        Kind::Bin | Kind::Bpl => hex_dump(value),
    }
}

fn be_uint(value: &[u8]) -> Option<u64> {
    if value.is_empty() || value.len() > 8 {
        return None;
    }
    let mut buf = [0u8; 8];
    buf[8 - value.len()..].copy_from_slice(value);
    Some(u64::from_be_bytes(buf))
}

fn hex_dump(value: &[u8]) -> String {
    value.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    mod wire {
        use super::*;

        #[test]
        fn query_element_is_header_only() {
            let bytes = Property::query("syAP").unwrap().compose();
            assert_eq!(bytes.len(), ELEMENT_HEADER_SIZE);
            assert_eq!(&bytes[..4], b"syAP");
            assert_eq!(&bytes[4..], &[0u8; 8]);
        }

        #[test]
        fn populated_element_roundtrips() {
            let prop = Property::new("syNm", "Base Station").unwrap();
            let parsed = Property::parse(&prop.compose()).unwrap();
            assert_eq!(parsed, Some(prop));
        }

        #[test]
        fn sentinel_parses_to_none() {
            assert_eq!(Property::parse(&sentinel()).unwrap(), None);
        }

        #[test]
        fn tag_only_sentinel_accepted() {
            let mut bytes = Vec::new();
            bytes.extend_from_slice(&[0u8; 4]);
            bytes.extend_from_slice(&0u32.to_be_bytes());
            bytes.extend_from_slice(&0u32.to_be_bytes());
            assert_eq!(Property::parse(&bytes).unwrap(), None);
        }

        #[test]
        fn error_flag_surfaces_property_error() {
            let mut bytes = Vec::new();
            bytes.extend_from_slice(b"syNm");
            bytes.extend_from_slice(&1u32.to_be_bytes());
            bytes.extend_from_slice(&4u32.to_be_bytes());
            bytes.extend_from_slice(&(-16i32).to_be_bytes());
            match Property::parse(&bytes) {
                Err(Error::Property(e)) => {
                    assert_eq!(e.tag, "syNm");
                    assert_eq!(e.code, -16);
                }
                other => panic!("expected property error, got {other:?}"),
            }
        }

        #[test]
        fn size_mismatch_rejected() {
            let mut bytes = Property::new("syNm", "x").unwrap().compose();
            bytes.push(0);
            assert!(Property::parse(&bytes).is_err());
        }

        #[test]
        fn unknown_reply_tag_rejected() {
            let mut bytes = Vec::new();
            bytes.extend_from_slice(b"zzZZ");
            bytes.extend_from_slice(&0u32.to_be_bytes());
            bytes.extend_from_slice(&0u32.to_be_bytes());
            assert!(matches!(
                Property::parse(&bytes),
                Err(Error::Validation(ValidationError::UnknownTag(_)))
            ));
        }
    }

    mod construction {
        use super::*;

        #[test]
        fn unknown_tag_rejected() {
            assert!(matches!(
                Property::new("nope", 1i64),
                Err(Error::Validation(ValidationError::UnknownTag(_)))
            ));
        }

        #[test]
        fn malformed_tag_rejected() {
            assert!(Property::new("toolong", 1i64).is_err());
            assert!(Property::query("ab").is_err());
        }

        #[test]
        fn wrong_input_type_rejected() {
            assert!(matches!(
                Property::new("syNm", 5i64),
                Err(Error::Validation(ValidationError::WrongType { .. }))
            ));
            assert!(Property::new("slvl", "five").is_err());
        }

        #[test]
        fn validator_rejection() {
            assert!(matches!(
                Property::new("slvl", 9i64),
                Err(Error::Validation(ValidationError::Rejected { .. }))
            ));
            assert!(Property::new("LEDc", 7i64).is_err());
        }

        #[test]
        fn reboot_trigger_takes_zero_only() {
            assert!(Property::new("acRB", 0i64).is_ok());
            assert!(Property::new("acRB", 1i64).is_err());
        }

        #[test]
        fn validated_entries_roundtrip() {
            for (tag, value) in [
                ("slvl", 5i64),
                ("dhLe", 7200),
                ("LEDc", 2),
                ("SUFq", 86_400),
                ("6Lfx", 64),
                ("acRB", 0),
            ] {
                let prop = Property::new(tag, value).unwrap();
                let parsed = Property::parse(&prop.compose()).unwrap();
                assert_eq!(parsed, Some(prop), "roundtrip for {tag}");
            }
        }
    }

    mod coercion {
        use super::*;

        #[test]
        fn integers_encode_big_endian() {
            assert_eq!(Property::new("slvl", 5i64).unwrap().value, [0, 0, 0, 5]);
            assert_eq!(Property::new("syUT", 258i64).unwrap().value, [0, 0, 1, 2]);
        }

        #[test]
        fn integer_range_is_enforced_by_width() {
            assert!(Property::new("syUT", 1i64 << 40).is_err());
            assert!(Property::new("syUT", -1i64).is_err());
        }

        #[test]
        fn mac_accepts_text_and_raw() {
            let from_text = Property::new("raMA", "00:1f:f3:00:12:ab").unwrap();
            let from_bytes =
                Property::new("raMA", vec![0x00, 0x1f, 0xf3, 0x00, 0x12, 0xab]).unwrap();
            assert_eq!(from_text.value, from_bytes.value);
            assert!(Property::new("raMA", "not-a-mac").is_err());
            assert!(Property::new("raMA", vec![1, 2, 3]).is_err());
        }

        #[test]
        fn ip4_accepts_dotted_quad() {
            let prop = Property::new("laIP", "10.0.1.1").unwrap();
            assert_eq!(prop.value, [10, 0, 1, 1]);
        }

        #[test]
        fn ip6_accepts_text() {
            let prop = Property::new("6Lad", "fe80::1").unwrap();
            assert_eq!(prop.value.len(), 16);
            assert_eq!(prop.value[0], 0xfe);
            assert_eq!(prop.value[15], 0x01);
        }

        #[test]
        fn uuid_accepts_text_and_raw() {
            let text = "f81d4fae-7dec-11d0-a765-00a0c91e6bf6";
            let prop = Property::new("uuid", text).unwrap();
            assert_eq!(prop.value.len(), 16);
            assert_eq!(prop.format_value(), text);
        }

        #[test]
        fn boolean_encoding() {
            assert_eq!(Property::new("SUEn", 1i64).unwrap().value, [1]);
            assert_eq!(Property::new("SUEn", 0i64).unwrap().value, [0]);
            assert!(Property::new("SUEn", 2i64).is_err());
        }

        #[test]
        fn cfb_takes_plist_trees() {
            let tree = Value::Dict(vec![("enabled".to_string(), Value::Bool(true))]);
            let prop = Property::new("tACL", tree.clone()).unwrap();
            assert_eq!(cflbinary::parse(&prop.value).unwrap(), tree);
        }
    }

    mod display {
        use super::*;

        #[test]
        fn formats_follow_kind() {
            assert_eq!(format_value(Kind::Dec, &[0, 0, 0, 42]), "42");
            assert_eq!(format_value(Kind::Hex, &[0, 0, 0x10, 0]), "0x00001000");
            assert_eq!(format_value(Kind::Ip4, &[192, 168, 1, 1]), "192.168.1.1");
            assert_eq!(
                format_value(Kind::Mac, &[0, 0x1f, 0xf3, 0, 0x12, 0xab]),
                "00:1f:f3:00:12:ab"
            );
            assert_eq!(format_value(Kind::Boo, &[1]), "true");
            assert_eq!(format_value(Kind::Str, b"AirPort"), "AirPort");
            assert_eq!(format_value(Kind::Bin, &[0xde, 0xad]), "dead");
        }

        #[test]
        fn display_includes_description() {
            let prop = Property::new("syNm", "Attic").unwrap();
            let rendered = prop.to_string();
            assert!(rendered.contains("syNm"));
            assert!(rendered.contains("Device name"));
            assert!(rendered.contains("Attic"));
        }
    }
}
