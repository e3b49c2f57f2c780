//! CFLBinaryPList: the CoreFoundation-lite binary plist dialect used for
//! structured ACP payloads.
//!
//! The wire format is a tagged tree. The high nibble of each tag byte selects
//! the type; variable-length payloads carry a size-of-size prefix (`0x10 | k`
//! followed by `2^k` big-endian size bytes). Arrays carry an element count and
//! a zero terminator; dictionaries are terminated only.
//!
//! Composer and parser run the obfuscation keystream in lockstep from the
//! first byte of the blob: every structural byte is XOR-masked until the first
//! payload region (string or data contents) begins, after which masking stops
//! for the remainder of the blob.

use crate::keystream::Keystream;
use acp_core::error::PlistError;

const TAG_NULL: u8 = 0x00;
const TAG_FALSE: u8 = 0x08;
const TAG_TRUE: u8 = 0x09;
const TAG_INT: u8 = 0x10;
const TAG_REAL32: u8 = 0x22;
const TAG_REAL64: u8 = 0x23;
const TAG_DATE: u8 = 0x33;
const TAG_DATA: u8 = 0x4f;
const TAG_STRING_ASCII: u8 = 0x5f;
const TAG_STRING_UTF16: u8 = 0x6f;
const TAG_ARRAY: u8 = 0xaf;
const TAG_DICT: u8 = 0xdf;
const TAG_END: u8 = 0x00;

/// A CFLBinaryPList value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    /// Seconds since 2001-01-01 00:00:00 UTC.
    Date(f64),
    Data(Vec<u8>),
    String(String),
    Array(Vec<Value>),
    /// Order-preserving key/value pairs.
    Dict(Vec<(String, Value)>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            Value::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a key in a dictionary value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Data(v)
    }
}

struct MaskedWriter {
    out: Vec<u8>,
    stream: Keystream,
    masking: bool,
}

impl MaskedWriter {
    fn new() -> Self {
        Self {
            out: Vec::new(),
            stream: Keystream::new(),
            masking: true,
        }
    }

    fn put(&mut self, byte: u8) {
        let b = if self.masking {
            byte ^ self.stream.next_byte()
        } else {
            byte
        };
        self.out.push(b);
    }

    fn put_all(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.put(b);
        }
    }

    /// Write a payload region; masking stops here for good.
    fn put_payload(&mut self, bytes: &[u8]) {
        self.masking = false;
        self.out.extend_from_slice(bytes);
    }
}

struct MaskedReader<'a> {
    data: &'a [u8],
    pos: usize,
    stream: Keystream,
    masking: bool,
}

impl<'a> MaskedReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            stream: Keystream::new(),
            masking: true,
        }
    }

    fn next(&mut self) -> Result<u8, PlistError> {
        let &b = self
            .data
            .get(self.pos)
            .ok_or(PlistError::UnexpectedEof(self.pos))?;
        self.pos += 1;
        Ok(if self.masking {
            b ^ self.stream.next_byte()
        } else {
            b
        })
    }

    fn take(&mut self, n: usize) -> Result<Vec<u8>, PlistError> {
        (0..n).map(|_| self.next()).collect()
    }

    /// Read a payload region; masking stops here for good.
    fn take_payload(&mut self, n: usize) -> Result<&'a [u8], PlistError> {
        self.masking = false;
        if n > self.data.len() - self.pos {
            return Err(PlistError::SizeOverrun(n));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

/// Serialize a value tree to an obfuscated blob.
pub fn compose(value: &Value) -> Vec<u8> {
    let mut writer = MaskedWriter::new();
    compose_object(value, &mut writer);
    writer.out
}

/// Parse an obfuscated blob back into a value tree.
pub fn parse(data: &[u8]) -> Result<Value, PlistError> {
    let mut reader = MaskedReader::new(data);
    let value = parse_object(&mut reader)?;
    if reader.remaining() > 0 {
        return Err(PlistError::TrailingData(reader.remaining()));
    }
    Ok(value)
}

fn compose_object(value: &Value, w: &mut MaskedWriter) {
    match value {
        Value::Null => w.put(TAG_NULL),
        Value::Bool(false) => w.put(TAG_FALSE),
        Value::Bool(true) => w.put(TAG_TRUE),
        Value::Int(v) => compose_int(*v, w),
        Value::Real(v) => {
            w.put(TAG_REAL64);
            w.put_all(&v.to_bits().to_be_bytes());
        }
        Value::Date(seconds) => {
            w.put(TAG_DATE);
            w.put_all(&seconds.to_bits().to_be_bytes());
        }
        Value::Data(bytes) => {
            w.put(TAG_DATA);
            compose_size(bytes.len() as u64, w);
            w.put_payload(bytes);
        }
        Value::String(s) => compose_string(s, w),
        Value::Array(items) => {
            w.put(TAG_ARRAY);
            compose_size(items.len() as u64, w);
            for item in items {
                compose_object(item, w);
            }
            w.put(TAG_END);
        }
        Value::Dict(entries) => {
            w.put(TAG_DICT);
            for (key, val) in entries {
                compose_string(key, w);
                compose_object(val, w);
            }
            w.put(TAG_END);
        }
    }
}

/// Smallest power-of-two byte width holding `v`, widened one step when the
/// top bit of that width is set (the producer is signed).
fn int_width_exponent(v: i64) -> u8 {
    if v < 0 {
        return 3;
    }
    let u = v as u64;
    let mut k: u8 = if u <= 0xff {
        0
    } else if u <= 0xffff {
        1
    } else if u <= 0xffff_ffff {
        2
    } else {
        3
    };
    while k < 3 {
        let top_bit = 1u64 << ((8u32 << k) - 1);
        if u & top_bit == 0 {
            break;
        }
        k += 1;
    }
    k
}

fn compose_int(v: i64, w: &mut MaskedWriter) {
    let k = int_width_exponent(v);
    let width = 1usize << k;
    w.put(TAG_INT | k);
    let bytes = (v as u64).to_be_bytes();
    w.put_all(&bytes[8 - width..]);
}

fn compose_size(n: u64, w: &mut MaskedWriter) {
    let k: u8 = if n <= 0xff {
        0
    } else if n <= 0xffff {
        1
    } else if n <= 0xffff_ffff {
        2
    } else {
        3
    };
    let width = 1usize << k;
    w.put(0x10 | k);
    w.put_all(&n.to_be_bytes()[8 - width..]);
}

fn compose_string(s: &str, w: &mut MaskedWriter) {
    if s.is_ascii() {
        w.put(TAG_STRING_ASCII);
        compose_size(s.len() as u64, w);
        w.put_payload(s.as_bytes());
    } else {
        let units: Vec<u16> = s.encode_utf16().collect();
        w.put(TAG_STRING_UTF16);
        compose_size(units.len() as u64, w);
        let mut bytes = Vec::with_capacity(units.len() * 2);
        for unit in &units {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        w.put_payload(&bytes);
    }
}

fn parse_object(r: &mut MaskedReader<'_>) -> Result<Value, PlistError> {
    let tag = r.next()?;
    parse_tagged(tag, r)
}

fn parse_tagged(tag: u8, r: &mut MaskedReader<'_>) -> Result<Value, PlistError> {
    match tag {
        TAG_NULL => Ok(Value::Null),
        TAG_FALSE => Ok(Value::Bool(false)),
        TAG_TRUE => Ok(Value::Bool(true)),
        t if t & 0xf0 == TAG_INT && t & 0x0f <= 3 => parse_int(t & 0x0f, r),
        TAG_REAL32 => {
            let bytes = r.take(4)?;
            let bits = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            Ok(Value::Real(f32::from_bits(bits) as f64))
        }
        TAG_REAL64 => Ok(Value::Real(parse_f64(r)?)),
        TAG_DATE => Ok(Value::Date(parse_f64(r)?)),
        TAG_DATA => {
            let size = parse_size(r)?;
            Ok(Value::Data(r.take_payload(size)?.to_vec()))
        }
        TAG_STRING_ASCII => {
            let size = parse_size(r)?;
            let bytes = r.take_payload(size)?;
            if !bytes.is_ascii() {
                return Err(PlistError::InvalidAscii);
            }
            Ok(Value::String(
                String::from_utf8(bytes.to_vec()).map_err(|_| PlistError::InvalidAscii)?,
            ))
        }
        TAG_STRING_UTF16 => {
            let units = parse_size(r)?;
            let bytes = r.take_payload(units * 2)?;
            let codeunits: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            Ok(Value::String(
                String::from_utf16(&codeunits).map_err(|_| PlistError::InvalidUtf16)?,
            ))
        }
        TAG_ARRAY => {
            let count = parse_size(r)?;
            let mut items = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                items.push(parse_object(r)?);
            }
            if r.next()? != TAG_END {
                return Err(PlistError::MissingTerminator);
            }
            Ok(Value::Array(items))
        }
        TAG_DICT => {
            let mut entries = Vec::new();
            loop {
                let key_tag = r.next()?;
                if key_tag == TAG_END {
                    break;
                }
                let key = match parse_tagged(key_tag, r)? {
                    Value::String(s) => s,
                    _ => return Err(PlistError::NonStringKey),
                };
                let value = parse_object(r)?;
                entries.push((key, value));
            }
            Ok(Value::Dict(entries))
        }
        other => Err(PlistError::UnknownTag {
            tag: other,
            offset: r.pos - 1,
        }),
    }
}

fn parse_int(k: u8, r: &mut MaskedReader<'_>) -> Result<Value, PlistError> {
    let width = 1usize << k;
    let bytes = r.take(width)?;
    let mut buf = [0u8; 8];
    buf[8 - width..].copy_from_slice(&bytes);
    // Widths below 8 are zero-extended; 8-byte ints are two's complement.
    Ok(Value::Int(u64::from_be_bytes(buf) as i64))
}

fn parse_f64(r: &mut MaskedReader<'_>) -> Result<f64, PlistError> {
    let bytes = r.take(8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes);
    Ok(f64::from_bits(u64::from_be_bytes(buf)))
}

fn parse_size(r: &mut MaskedReader<'_>) -> Result<usize, PlistError> {
    let prefix = r.next()?;
    if prefix & 0xf0 != 0x10 || prefix & 0x0f > 3 {
        return Err(PlistError::InvalidSizePrefix(prefix));
    }
    let width = 1usize << (prefix & 0x0f);
    let bytes = r.take(width)?;
    let mut buf = [0u8; 8];
    buf[8 - width..].copy_from_slice(&bytes);
    usize::try_from(u64::from_be_bytes(buf)).map_err(|_| PlistError::SizeOverrun(usize::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Object encoding with the XOR mask disabled, for byte-level assertions.
    fn unmasked(value: &Value) -> Vec<u8> {
        let mut writer = MaskedWriter {
            out: Vec::new(),
            stream: Keystream::new(),
            masking: false,
        };
        compose_object(value, &mut writer);
        writer.out
    }

    fn roundtrip(value: Value) {
        let blob = compose(&value);
        assert_eq!(parse(&blob).unwrap(), value, "blob {blob:02x?}");
    }

    mod integers {
        use super::*;

        #[test]
        fn minimal_width_encoding() {
            assert_eq!(unmasked(&Value::Int(1)), vec![0x10, 0x01]);
            assert_eq!(unmasked(&Value::Int(256)), vec![0x11, 0x01, 0x00]);
            assert_eq!(
                unmasked(&Value::Int(65537)),
                vec![0x12, 0x00, 0x01, 0x00, 0x01]
            );
        }

        #[test]
        fn widens_when_top_bit_set() {
            assert_eq!(unmasked(&Value::Int(255)), vec![0x11, 0x00, 0xff]);
            assert_eq!(
                unmasked(&Value::Int(0xffff)),
                vec![0x12, 0x00, 0x00, 0xff, 0xff]
            );
        }

        #[test]
        fn negative_uses_full_width() {
            assert_eq!(
                unmasked(&Value::Int(-1)),
                vec![0x13, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
            );
        }

        #[test]
        fn roundtrips_at_native_width() {
            for v in [0i64, 1, 127, 128, 255, 256, 65535, 65537, -1, -12345, i64::MAX, i64::MIN] {
                roundtrip(Value::Int(v));
            }
        }
    }

    mod structure {
        use super::*;

        #[test]
        fn dict_wire_shape() {
            let dict = Value::Dict(vec![("state".to_string(), Value::Int(1))]);
            assert_eq!(
                unmasked(&dict),
                vec![0xdf, 0x5f, 0x10, 0x05, b's', b't', b'a', b't', b'e', 0x10, 0x01, 0x00]
            );
        }

        #[test]
        fn array_carries_count_and_terminator() {
            let array = Value::Array(vec![Value::Int(1), Value::Bool(true)]);
            assert_eq!(
                unmasked(&array),
                vec![0xaf, 0x10, 0x02, 0x10, 0x01, 0x09, 0x00]
            );
        }

        #[test]
        fn empty_collections() {
            assert_eq!(unmasked(&Value::Dict(vec![])), vec![0xdf, 0x00]);
            assert_eq!(unmasked(&Value::Array(vec![])), vec![0xaf, 0x10, 0x00, 0x00]);
            roundtrip(Value::Dict(vec![]));
            roundtrip(Value::Array(vec![]));
        }

        #[test]
        fn scalar_tags() {
            assert_eq!(unmasked(&Value::Null), vec![0x00]);
            assert_eq!(unmasked(&Value::Bool(false)), vec![0x08]);
            assert_eq!(unmasked(&Value::Bool(true)), vec![0x09]);
        }
    }

    mod masking {
        use super::*;

        #[test]
        fn structural_prefix_is_masked_until_first_payload() {
            let dict = Value::Dict(vec![("state".to_string(), Value::Int(1))]);
            let raw = unmasked(&dict);
            let blob = compose(&dict);
            let mask = Keystream::new().take(4);

            // Tag, string tag, and size bytes are masked.
            for n in 0..4 {
                assert_eq!(blob[n], raw[n] ^ mask[n]);
            }
            // The key payload and everything after it is in the clear.
            assert_eq!(&blob[4..9], b"state");
            assert_eq!(&blob[4..], &raw[4..]);
        }

        #[test]
        fn fully_structural_blob_is_masked_throughout() {
            let raw = unmasked(&Value::Int(1));
            let blob = compose(&Value::Int(1));
            let mask = Keystream::new().take(raw.len());
            for n in 0..raw.len() {
                assert_eq!(blob[n], raw[n] ^ mask[n]);
            }
        }

        #[test]
        fn parser_unmasks_in_lockstep() {
            roundtrip(Value::Dict(vec![
                ("state".to_string(), Value::Int(1)),
                ("username".to_string(), Value::String("admin".to_string())),
            ]));
        }
    }

    mod strings {
        use super::*;

        #[test]
        fn ascii_strings_use_0x5f() {
            let raw = unmasked(&Value::String("abc".to_string()));
            assert_eq!(raw, vec![0x5f, 0x10, 0x03, b'a', b'b', b'c']);
        }

        #[test]
        fn non_ascii_strings_use_utf16be_codeunits() {
            let raw = unmasked(&Value::String("é".to_string()));
            assert_eq!(raw, vec![0x6f, 0x10, 0x01, 0x00, 0xe9]);
        }

        #[test]
        fn roundtrips() {
            roundtrip(Value::String(String::new()));
            roundtrip(Value::String("admin".to_string()));
            roundtrip(Value::String("héllo wörld".to_string()));
            roundtrip(Value::String("\u{1F30D}".to_string()));
        }
    }

    mod reals_and_dates {
        use super::*;

        #[test]
        fn real64_roundtrips() {
            roundtrip(Value::Real(0.0));
            roundtrip(Value::Real(-273.15));
            roundtrip(Value::Real(f64::MAX));
        }

        #[test]
        fn real32_parses_to_real() {
            let mut blob = vec![TAG_REAL32];
            blob.extend_from_slice(&2.5f32.to_bits().to_be_bytes());
            let mask = Keystream::new().take(blob.len());
            for (b, m) in blob.iter_mut().zip(mask) {
                *b ^= m;
            }
            assert_eq!(parse(&blob).unwrap(), Value::Real(2.5));
        }

        #[test]
        fn dates_keep_their_epoch() {
            // 2021-01-01 00:00:00 UTC in seconds since 2001-01-01.
            roundtrip(Value::Date(631_152_000.0));
        }

        #[test]
        fn date_and_real_are_distinct() {
            let blob = compose(&Value::Date(1.0));
            assert_eq!(parse(&blob).unwrap(), Value::Date(1.0));
            let blob = compose(&Value::Real(1.0));
            assert_eq!(parse(&blob).unwrap(), Value::Real(1.0));
        }
    }

    mod nesting {
        use super::*;

        #[test]
        fn deep_trees_roundtrip() {
            let mut value = Value::Dict(vec![
                ("name".to_string(), Value::String("leaf".to_string())),
                ("payload".to_string(), Value::Data(vec![0xde, 0xad, 0xbe, 0xef])),
            ]);
            for depth in 0..8 {
                value = Value::Dict(vec![
                    (format!("level{depth}"), value),
                    ("count".to_string(), Value::Int(depth)),
                ]);
            }
            roundtrip(value);
        }

        #[test]
        fn mixed_collections_roundtrip() {
            roundtrip(Value::Array(vec![
                Value::Null,
                Value::Bool(true),
                Value::Int(42),
                Value::Real(1.5),
                Value::Data(vec![1, 2, 3]),
                Value::String("x".to_string()),
                Value::Array(vec![Value::Int(-7)]),
                Value::Dict(vec![("k".to_string(), Value::Int(1))]),
            ]));
        }
    }

    mod errors {
        use super::*;

        #[test]
        fn truncated_input() {
            let blob = compose(&Value::Int(65537));
            assert!(matches!(
                parse(&blob[..2]),
                Err(PlistError::UnexpectedEof(_))
            ));
        }

        #[test]
        fn trailing_data_rejected() {
            let mut blob = compose(&Value::Int(1));
            blob.push(0x00);
            assert!(matches!(parse(&blob), Err(PlistError::TrailingData(1))));
        }

        #[test]
        fn unknown_tag_rejected() {
            let mask = Keystream::new().next_byte();
            let blob = [0x77u8 ^ mask];
            assert!(matches!(
                parse(&blob),
                Err(PlistError::UnknownTag { tag: 0x77, .. })
            ));
        }

        #[test]
        fn non_string_dict_key_rejected() {
            // dict tag, then an int where a key tag belongs
            let raw = [TAG_DICT, 0x10, 0x01, 0x10, 0x01, TAG_END];
            let mask = Keystream::new().take(raw.len());
            let blob: Vec<u8> = raw.iter().zip(mask).map(|(b, m)| b ^ m).collect();
            assert!(matches!(parse(&blob), Err(PlistError::NonStringKey)));
        }

        #[test]
        fn array_missing_terminator() {
            let raw = [TAG_ARRAY, 0x10, 0x01, 0x10, 0x01, 0x42];
            let mask = Keystream::new().take(raw.len());
            let blob: Vec<u8> = raw.iter().zip(mask).map(|(b, m)| b ^ m).collect();
            assert!(matches!(parse(&blob), Err(PlistError::MissingTerminator)));
        }

        #[test]
        fn oversized_payload_rejected() {
            let raw = [TAG_DATA, 0x10, 0x20, 0xaa];
            let mask = Keystream::new().take(raw.len());
            let blob: Vec<u8> = raw.iter().zip(mask).map(|(b, m)| b ^ m).collect();
            assert!(matches!(parse(&blob), Err(PlistError::SizeOverrun(0x20))));
        }
    }

    mod accessors {
        use super::*;

        #[test]
        fn dict_get_finds_keys() {
            let dict = Value::Dict(vec![
                ("salt".to_string(), Value::Data(vec![1, 2])),
                ("state".to_string(), Value::Int(2)),
            ]);
            assert_eq!(dict.get("state").and_then(Value::as_int), Some(2));
            assert_eq!(
                dict.get("salt").and_then(Value::as_data),
                Some(&[1u8, 2][..])
            );
            assert!(dict.get("missing").is_none());
        }
    }
}
