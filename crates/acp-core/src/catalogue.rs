//! Static catalogue of ACP property tags.
//!
//! Every property exchanged with a base station is identified by a 4-character
//! tag. The catalogue maps each tag to its semantic type, a short description
//! used for display, and an optional validator applied to the encoded value at
//! construction time. The table is immutable; the property codec takes it as a
//! leaf dependency.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Semantic type of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// UTF-8 text.
    Str,
    /// 32-bit unsigned integer, displayed in decimal.
    Dec,
    /// 32-bit unsigned integer, displayed in hex.
    Hex,
    /// Device log text.
    Log,
    /// 6-byte MAC address.
    Mac,
    /// CFLBinaryPList-encoded tree.
    Cfb,
    /// Opaque bytes.
    Bin,
    /// 8-bit unsigned integer.
    U8,
    /// 16-bit unsigned integer, big-endian.
    U16,
    /// 32-bit unsigned integer, big-endian.
    U32,
    /// Variable-width unsigned integer, big-endian.
    Ui8,
    /// IPv4 address, 4 bytes.
    Ip4,
    /// IPv6 address, 16 bytes.
    Ip6,
    /// 16-byte UUID.
    Uid,
    /// Boolean, single byte.
    Boo,
    /// Standard binary plist, passed through opaque.
    Bpl,
}

/// Validator applied to the encoded value of a property.
pub enum Validator {
    /// Big-endian integer value must fall within `[lo, hi]` inclusive.
    Range(i64, i64),
    /// Big-endian integer value must be one of the listed values.
    OneOf(&'static [i64]),
    /// Arbitrary predicate over the encoded bytes.
    Custom(fn(&[u8]) -> bool),
}

impl Validator {
    /// Check an encoded value against this validator.
    pub fn accepts(&self, encoded: &[u8]) -> bool {
        match self {
            Validator::Range(lo, hi) => match be_int(encoded) {
                Some(v) => v >= *lo && v <= *hi,
                None => false,
            },
            Validator::OneOf(set) => match be_int(encoded) {
                Some(v) => set.contains(&v),
                None => false,
            },
            Validator::Custom(predicate) => predicate(encoded),
        }
    }
}

/// Decode a big-endian unsigned integer of up to 8 bytes.
fn be_int(encoded: &[u8]) -> Option<i64> {
    if encoded.is_empty() || encoded.len() > 8 {
        return None;
    }
    let mut buf = [0u8; 8];
    buf[8 - encoded.len()..].copy_from_slice(encoded);
    i64::try_from(u64::from_be_bytes(buf)).ok()
}

/// One catalogue entry.
pub struct Entry {
    pub kind: Kind,
    pub description: &'static str,
    pub validator: Option<Validator>,
}

fn all_zero(encoded: &[u8]) -> bool {
    !encoded.is_empty() && encoded.iter().all(|&b| b == 0)
}

macro_rules! entry {
    ($tag:literal, $kind:ident, $desc:literal) => {
        ($tag, Entry { kind: Kind::$kind, description: $desc, validator: None })
    };
    ($tag:literal, $kind:ident, $desc:literal, $validator:expr) => {
        ($tag, Entry { kind: Kind::$kind, description: $desc, validator: Some($validator) })
    };
}

static TABLE: &[(&str, Entry)] = &[
    entry!("syNm", Str, "Device name"),
    entry!("syPW", Str, "Administrator password"),
    entry!("syAP", Dec, "Apple product ID"),
    entry!("sySN", Str, "Serial number"),
    entry!("syUT", U32, "Uptime (seconds)"),
    entry!("raMA", Mac, "Radio MAC address"),
    entry!("raPo", Str, "Transmit Power"),
    entry!("waIP", Ip4, "WAN IP address"),
    entry!("waSM", Ip4, "WAN subnet mask"),
    entry!("waRA", Ip4, "WAN router address"),
    entry!("waMA", Mac, "WAN MAC address"),
    entry!("waDN", Str, "WAN domain name"),
    entry!("waDC", Str, "WAN DHCP client ID"),
    entry!("laIP", Ip4, "LAN IP address"),
    entry!("laSM", Ip4, "LAN subnet mask"),
    entry!("laMA", Mac, "LAN MAC address"),
    entry!("dhBg", Ip4, "DHCP range start"),
    entry!("dhEn", Ip4, "DHCP range end"),
    entry!("dhSN", Ip4, "DHCP subnet mask"),
    entry!("dhLe", U32, "DHCP lease time (seconds)", Validator::Range(60, 604_800)),
    entry!("DRes", Cfb, "DHCP reservation list"),
    entry!("dhSL", Cfb, "DHCP static lease table"),
    entry!("naFl", Hex, "NAT configuration flags"),
    entry!("nDMZ", Ip4, "NAT default host (DMZ)"),
    entry!("tACL", Cfb, "Timed access control entries"),
    entry!("ntSV", Str, "NTP server"),
    entry!("slvl", Dec, "Syslog level", Validator::Range(0, 7)),
    entry!("logm", Log, "Device log"),
    entry!("usrd", Cfb, "Disk sharing user records"),
    entry!("uuid", Uid, "Device UUID"),
    entry!("feat", Cfb, "Feature flags"),
    entry!("prop", Cfb, "Supported property list"),
    entry!("acRB", Dec, "Reboot trigger", Validator::Custom(all_zero)),
    entry!("acRN", Dec, "WAN lease renew trigger"),
    entry!("acRF", Dec, "Factory defaults trigger"),
    entry!("auHK", Bin, "Stored HomeKit pairing data"),
    entry!("auHE", Bin, "Auth host entropy"),
    entry!("auNP", Dec, "Auth pairing policy"),
    entry!("auRR", Dec, "Auth credential rotation trigger"),
    entry!("6aut", Dec, "IPv6 configuration mode"),
    entry!("6cfg", Hex, "IPv6 configuration flags"),
    entry!("6Wad", Ip6, "IPv6 WAN address"),
    entry!("6Wgw", Ip6, "IPv6 WAN gateway"),
    entry!("6Lad", Ip6, "IPv6 LAN address"),
    entry!("6Lfx", Dec, "IPv6 LAN prefix length", Validator::Range(0, 128)),
    entry!("6sfw", Boo, "IPv6 simple firewall"),
    entry!("6trd", Cfb, "IPv6 tunnel parameters"),
    entry!("6fwl", Cfb, "IPv6 firewall rules"),
    entry!("6NS1", Ip6, "IPv6 name server 1"),
    entry!("6NS2", Ip6, "IPv6 name server 2"),
    entry!("6NS3", Ip6, "IPv6 name server 3"),
    entry!("APID", Dec, "Access point ID"),
    entry!("LEDc", Dec, "LED mode", Validator::OneOf(&[0, 1, 2, 3])),
    entry!("leAc", Dec, "LED action"),
    entry!("isAC", Boo, "Running on AC power"),
    entry!("GPIs", Bin, "GPIO pin states"),
    entry!("SUEn", Boo, "Firmware update checks enabled"),
    entry!("SUFq", U32, "Firmware update check interval (seconds)", Validator::Range(3_600, 2_592_000)),
    entry!("wbEn", Boo, "Remote configuration enabled"),
    entry!("wbHN", Str, "Remote configuration host"),
    entry!("wbHU", Str, "Remote configuration user"),
    entry!("wbHP", Str, "Remote configuration password"),
    entry!("wbAC", Str, "Remote configuration access code"),
    entry!("iCld", Boo, "Back to My Mac enabled"),
    entry!("iCLH", Str, "Back to My Mac host"),
];

fn index() -> &'static HashMap<&'static str, &'static Entry> {
    static INDEX: OnceLock<HashMap<&'static str, &'static Entry>> = OnceLock::new();
    INDEX.get_or_init(|| TABLE.iter().map(|(tag, entry)| (*tag, entry)).collect())
}

/// Look up a tag in the catalogue.
pub fn lookup(tag: &str) -> Option<&'static Entry> {
    index().get(tag).copied()
}

/// All known tags, in catalogue order.
pub fn tags() -> impl Iterator<Item = &'static str> {
    TABLE.iter().map(|(tag, _)| *tag)
}
