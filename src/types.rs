//! Set descriptors, entries and the error type.

use std::error::Error as StdError;
use std::fmt::{self, Formatter};
use std::net::AddrParseError;
use std::num::ParseIntError;
use std::str::FromStr;

use derive_more::{Display, From, Into};
use ipset_derive::TypeName;

use crate::constant::{
    IPSET_ERR_PRIVATE, IPSET_ERR_SKBINFO, IPSET_MAXNAMELEN, NFPROTO_IPV4, NFPROTO_IPV6,
    NFPROTO_UNSPEC,
};

/// A trait mapping set types onto the kernel's literal type names,
/// `method:datatype[,datatype[,datatype]]`.
pub trait TypeName {
    fn name(&self) -> &'static str;
    fn from_name(s: &str) -> Option<Self>
    where
        Self: Sized;
}

/// A set type comprises the storage method by which the data is stored and
/// the data type(s) which are stored in the set. The kernel knows the
/// combinations below; each one fixes the shape of an [`Entry`].
#[derive(TypeName, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SetType {
    /// Uses a memory range to store IPv4 host or network addresses, up to
    /// 65536 entries.
    BitmapIp,
    /// Uses a memory range to store IPv4 and MAC address pairs.
    BitmapIpMac,
    /// Uses a memory range to store port numbers.
    BitmapPort,
    /// Uses a hash to store IP host addresses. Zero valued IP addresses
    /// cannot be stored.
    HashIp,
    /// Uses a hash to store MAC addresses. Zero valued MAC addresses cannot
    /// be stored.
    HashMac,
    /// Uses a hash to store IP and MAC address pairs.
    HashIpMac,
    /// Uses a hash to store different sized IP network addresses. A network
    /// address with zero prefix size cannot be stored.
    HashNet,
    /// Uses a hash to store pairs of different sized IP network addresses.
    /// The first parameter has precedence over the second.
    HashNetNet,
    /// Uses a hash to store IP address and port number pairs. The port is
    /// interpreted together with a protocol, default TCP.
    HashIpPort,
    /// Uses a hash to store IP network address and port pairs.
    HashNetPort,
    /// Uses a hash to store IP address, port number and a second IP address
    /// triples.
    HashIpPortIp,
    /// Uses a hash to store IP address, port number and IP network address
    /// triples.
    HashIpPortNet,
    /// Uses a hash to store IP address and packet mark pairs.
    HashIpMark,
    /// Behaves like hash:ip,port,net but accepts a cidr value for both the
    /// first and the last parameter.
    HashNetPortNet,
    /// Uses a hash to store IP network address and interface name pairs.
    HashNetIface,
    /// A simple list in which set names are stored.
    ListSet,
}

impl fmt::Display for SetType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SetType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| Error::UnknownTypeName(s.to_string()))
    }
}

/// Address protocol family of set members. Hash and bitmap sets default to
/// [`Family::Inet`]; the MAC-only type is the one family-less set type.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum Family {
    #[default]
    Unspec,
    Inet,
    Inet6,
}

impl Family {
    /// The netfilter family constant carried in the FAMILY attribute.
    pub fn nfproto(self) -> u8 {
        match self {
            Family::Unspec => NFPROTO_UNSPEC,
            Family::Inet => NFPROTO_IPV4,
            Family::Inet6 => NFPROTO_IPV6,
        }
    }

    /// Inverse of [`Family::nfproto`]; unknown values map to `Unspec` the way
    /// the list reply parser treats them.
    pub fn from_nfproto(value: u8) -> Family {
        match value {
            NFPROTO_IPV4 => Family::Inet,
            NFPROTO_IPV6 => Family::Inet6,
            _ => Family::Unspec,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Family::Unspec => Ok(()),
            Family::Inet => f.write_str("inet"),
            Family::Inet6 => f.write_str("inet6"),
        }
    }
}

/// Mac address, `[u8; 6]`.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, From, Into)]
pub struct MacAddr {
    mac: [u8; 6],
}

impl MacAddr {
    pub fn octets(&self) -> [u8; 6] {
        self.mac
    }
}

impl FromStr for MacAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mac: Vec<u8> = s
            .split(':')
            .filter_map(|s| u8::from_str_radix(s, 16).ok())
            .collect();
        if mac.len() != 6 {
            Err(Error::BadMac(s.into()))
        } else {
            let mut out = [0u8; 6];
            out.copy_from_slice(mac.as_slice());
            Ok(MacAddr { mac: out })
        }
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let data = self.mac.map(|d| format!("{:02x}", d)).join(":");
        write!(f, "{}", data)
    }
}

/// Describes one named set for the create, add and del commands. The library
/// holds it only for the duration of a single call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IPSet {
    /// The set name: printable, NUL free, at most 31 bytes.
    pub name: String,
    /// The kernel data structure backing the set.
    pub set_type: SetType,
    /// Protocol family of the addresses stored in the set. Left unspecified
    /// it defaults to `inet` for everything but `hash:mac`.
    pub family: Family,
    /// Initial hash table size for the hash types. The kernel rounds it up
    /// to a power of two.
    pub hash_size: Option<u32>,
    /// Maximal number of elements storable in the set, default 65536.
    pub max_elem: Option<u32>,
    /// Port range of a bitmap:port set. Declared for completeness; the
    /// create command currently rejects it.
    pub port_range: Option<String>,
    /// Comment extension. Declared for completeness; the create command
    /// currently rejects it.
    pub comment: Option<String>,
    /// Explicit type revision. Checked against the range the kernel
    /// advertises; left unset, the kernel maximum is used.
    pub revision: Option<u8>,
}

impl IPSet {
    pub fn new(name: impl Into<String>, set_type: SetType) -> IPSet {
        IPSet {
            name: name.into(),
            set_type,
            family: Family::Unspec,
            hash_size: None,
            max_elem: None,
            port_range: None,
            comment: None,
            revision: None,
        }
    }
}

/// One element of a set. Which fields matter depends on the set type; unused
/// fields keep their zero value.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Primary IP address, dotted-quad or colon-hex literal.
    pub ip: String,
    /// Prefix length paired with `ip`.
    pub cidr: Option<u8>,
    /// Port, or the lower bound of a port range when `port_to` is set.
    pub port: u16,
    /// Upper bound of a port range; zero means no range.
    pub port_to: u16,
    /// L4 protocol number. Zero falls back to TCP when a port is sent.
    pub proto: u8,
    /// Second IP address for the three-tuple types.
    pub ip2: String,
    /// Prefix length paired with `ip2`.
    pub cidr2: Option<u8>,
    /// Mac address for the mac-carrying types.
    pub mac: Option<MacAddr>,
}

/// One decoded set from a list reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    pub set: IPSet,
    pub entries: Vec<Entry>,
}

/// Errors defined in this crate.
#[derive(Debug, Display, From)]
pub enum Error {
    /// A command that needs a set name got an empty one.
    #[from(ignore)]
    #[display("invalid {_0} command: missing setname")]
    MissingName(&'static str),
    /// Set name with an interior NUL or longer than the wire allows.
    #[from(ignore)]
    #[display("invalid set name: {_0:?}")]
    BadName(String),
    /// Add/del entries are not implemented for this set type.
    #[from(ignore)]
    #[display("adding entries for set type {_0} not supported")]
    UnsupportedSetType(SetType),
    /// A declared create parameter the builder does not transmit.
    #[from(ignore)]
    #[display("create parameter {_0} not supported")]
    UnsupportedOption(&'static str),
    #[from(ignore)]
    #[display("invalid add command: bad ip: {_0}")]
    BadIp(String),
    #[from(ignore)]
    #[display("invalid add command: bad mac: {_0}")]
    BadMac(String),
    /// Caller-supplied revision outside the kernel-advertised range.
    #[from(ignore)]
    #[display("revision {_0} outside supported range [{_1}, {_2}]")]
    Revision(u8, u8, u8),
    #[from(ignore)]
    #[display("unknown set type name {_0:?}")]
    UnknownTypeName(String),
    /// The kernel speaks a protocol range this library does not cover.
    #[from(ignore)]
    #[display("unsupported kernel ipset protocol {_0}")]
    Protocol(u8),
    /// Kernel-reported error number, surfaced as `errno <n>` so callers can
    /// classify it with [`try_convert_errno`].
    #[from(ignore)]
    #[display("errno {_0}")]
    Errno(i32),
    Io(std::io::Error),
    /// Short frame or malformed attribute length in the numbered reply
    /// frame.
    #[from(ignore)]
    #[display("possible corrupt msg at frame {_0}")]
    CorruptMessage(usize),
    /// Unexpected attribute inside an ADT entry of the numbered reply frame.
    #[from(ignore)]
    #[display("unknown attr {_1} in frame {_0}")]
    UnknownAttr(usize, u16),
    AddrParse(AddrParseError),
    ParseInt(ParseIntError),
}

impl StdError for Error {}

/// Parse a kernel error number out of `err`. Returns the number iff the
/// error renders as `errno <decimal>` and the value lies within the ip_set
/// private error range.
pub fn try_convert_errno(err: &Error) -> Option<i32> {
    let msg = err.to_string();
    let no: i32 = msg.strip_prefix("errno ")?.parse().ok()?;
    if (IPSET_ERR_PRIVATE..=IPSET_ERR_SKBINFO).contains(&no) {
        Some(no)
    } else {
        None
    }
}

/// Wire invariants for set names: non-empty, no interior NUL, at most 31
/// bytes before the terminator.
pub(crate) fn validate_name(name: &str, cmd: &'static str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::MissingName(cmd));
    }
    if name.contains('\0') || name.len() >= IPSET_MAXNAMELEN {
        return Err(Error::BadName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::{IPSET_ERR_EXIST, IPSET_ERR_INVALID_FAMILY};

    #[test]
    fn test_type_name() {
        assert_eq!(SetType::HashIp.name(), "hash:ip");
        assert_eq!(SetType::HashNetIface.name(), "hash:net,iface");
        assert_eq!(SetType::HashNetNet.name(), "hash:net,net");
        assert_eq!(SetType::HashNetPort.name(), "hash:net,port");
        assert_eq!(SetType::HashNet.name(), "hash:net");
        assert_eq!(SetType::HashIpPort.name(), "hash:ip,port");
        assert_eq!(SetType::HashIpMark.name(), "hash:ip,mark");
        assert_eq!(SetType::HashIpPortNet.name(), "hash:ip,port,net");
        assert_eq!(SetType::HashIpMac.name(), "hash:ip,mac");
        assert_eq!(SetType::HashIpPortIp.name(), "hash:ip,port,ip");
        assert_eq!(SetType::HashNetPortNet.name(), "hash:net,port,net");
        assert_eq!(SetType::HashMac.name(), "hash:mac");
        assert_eq!(SetType::ListSet.name(), "list:set");
        assert_eq!(SetType::BitmapPort.name(), "bitmap:port");
        assert_eq!(SetType::BitmapIp.name(), "bitmap:ip");
        assert_eq!(SetType::BitmapIpMac.name(), "bitmap:ip,mac");
    }

    #[test]
    fn test_from_name() {
        for set_type in [
            SetType::BitmapIp,
            SetType::BitmapIpMac,
            SetType::BitmapPort,
            SetType::HashIp,
            SetType::HashMac,
            SetType::HashIpMac,
            SetType::HashNet,
            SetType::HashNetNet,
            SetType::HashIpPort,
            SetType::HashNetPort,
            SetType::HashIpPortIp,
            SetType::HashIpPortNet,
            SetType::HashIpMark,
            SetType::HashNetPortNet,
            SetType::HashNetIface,
            SetType::ListSet,
        ] {
            assert_eq!(SetType::from_name(set_type.name()), Some(set_type));
            assert_eq!(set_type.name().parse::<SetType>().unwrap(), set_type);
        }
        assert!(SetType::from_name("hash:oops").is_none());
        assert!("hash:oops".parse::<SetType>().is_err());
    }

    #[test]
    fn test_mac() {
        let mac: MacAddr = [124u8, 24, 32, 129, 84, 223].into();
        assert_eq!("7c:18:20:81:54:df", format!("{}", mac));
        let mac: MacAddr = "00:15:5d:37:d9:2f".parse().unwrap();
        assert_eq!("00:15:5d:37:d9:2f", format!("{}", mac));
        assert!("00:15:5d".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_family() {
        assert_eq!(Family::Inet.nfproto(), 2);
        assert_eq!(Family::Inet6.nfproto(), 10);
        assert_eq!(Family::Unspec.nfproto(), 0);
        assert_eq!(Family::from_nfproto(2), Family::Inet);
        assert_eq!(Family::from_nfproto(10), Family::Inet6);
        assert_eq!(Family::from_nfproto(7), Family::Unspec);
        assert_eq!(format!("{}", Family::Inet), "inet");
        assert_eq!(format!("{}", Family::Unspec), "");
    }

    #[test]
    fn test_try_convert_errno() {
        assert_eq!(
            try_convert_errno(&Error::Errno(4106)),
            Some(IPSET_ERR_INVALID_FAMILY)
        );
        assert_eq!(
            try_convert_errno(&Error::Errno(IPSET_ERR_EXIST)),
            Some(IPSET_ERR_EXIST)
        );
        assert_eq!(try_convert_errno(&Error::Errno(-1)), None);
        assert_eq!(try_convert_errno(&Error::Errno(4095)), None);
        assert_eq!(try_convert_errno(&Error::Errno(4115)), None);
        assert_eq!(try_convert_errno(&Error::MissingName("create")), None);
        assert_eq!(try_convert_errno(&Error::BadIp("errno 4100".into())), None);
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("TestCreate-inet", "create").is_ok());
        assert!(matches!(
            validate_name("", "create"),
            Err(Error::MissingName("create"))
        ));
        assert!(matches!(
            validate_name("bad\0name", "add"),
            Err(Error::BadName(_))
        ));
        assert!(validate_name(&"a".repeat(31), "create").is_ok());
        assert!(matches!(
            validate_name(&"a".repeat(32), "create"),
            Err(Error::BadName(_))
        ));
    }

    #[test]
    fn test_entry_default() {
        let entry = Entry::default();
        assert_eq!(entry.port, 0);
        assert_eq!(entry.proto, 0);
        assert!(entry.ip.is_empty());
        assert!(entry.cidr.is_none());
        assert!(entry.mac.is_none());
    }
}
