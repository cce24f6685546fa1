//! Protocol constants of the kernel ip_set netlink interface.
//!
//! Values mirror `linux/netfilter/ipset/ip_set.h` and `linux/netfilter.h`;
//! they are spelled out here so the crate does not depend on kernel headers
//! being present at build time.

/// Netfilter netlink subsystem id carried in the high byte of the message type.
pub const NFNL_SUBSYS_IPSET: u16 = 6;

/// `nfgenmsg.version` for all requests.
pub const NFNETLINK_V0: u8 = 0;

/// Size of the generic netfilter message prelude (family, version, res_id).
pub const SIZEOF_NFGENMSG: usize = 4;

/// Wire protocol version this library implements.
pub const IPSET_PROTOCOL: u8 = 7;
/// Oldest wire protocol version this library accepts from a kernel.
pub const IPSET_PROTOCOL_MIN: u8 = 6;

/// Maximum set name length on the wire, including the NUL terminator.
pub const IPSET_MAXNAMELEN: usize = 32;
/// Maximum comment length accepted by the kernel.
pub const IPSET_MAX_COMMENT_SIZE: usize = 255;

// Netlink message header flags, linux/netlink.h.
pub const NLM_F_REQUEST: u16 = 0x0001;
pub const NLM_F_MULTI: u16 = 0x0002;
pub const NLM_F_ACK: u16 = 0x0004;
pub const NLM_F_ROOT: u16 = 0x0100;
pub const NLM_F_MATCH: u16 = 0x0200;
pub const NLM_F_DUMP: u16 = NLM_F_ROOT | NLM_F_MATCH;
pub const NLM_F_EXCL: u16 = 0x0200;
pub const NLM_F_CREATE: u16 = 0x0400;

// Netlink control message types.
pub const NLMSG_ERROR: u16 = 0x2;
pub const NLMSG_DONE: u16 = 0x3;

// Attribute type flag bits, linux/netlink.h.
pub const NLA_F_NESTED: u16 = 1 << 15;
pub const NLA_F_NET_BYTEORDER: u16 = 1 << 14;
pub const NLA_TYPE_MASK: u16 = !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);

/// Commands of the ip_set subsystem.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Cmd {
    None = 0,
    Protocol = 1,
    Create = 2,
    Destroy = 3,
    Flush = 4,
    Rename = 5,
    Swap = 6,
    List = 7,
    Save = 8,
    Add = 9,
    Del = 10,
    Test = 11,
    Header = 12,
    Type = 13,
    GetByname = 14,
    GetByindex = 15,
}

impl Cmd {
    /// Netlink header flags for this command, indexed as libipset's cmdflags
    /// table does.
    pub fn flags(self) -> u16 {
        match self {
            Cmd::Create => NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
            Cmd::Destroy | Cmd::Flush | Cmd::Rename | Cmd::Swap | Cmd::Test => {
                NLM_F_REQUEST | NLM_F_ACK
            }
            Cmd::List | Cmd::Save => NLM_F_REQUEST | NLM_F_ACK | NLM_F_DUMP,
            Cmd::Add | Cmd::Del => NLM_F_REQUEST | NLM_F_ACK | NLM_F_EXCL,
            Cmd::Header | Cmd::Type | Cmd::Protocol => NLM_F_REQUEST,
            Cmd::None | Cmd::GetByname | Cmd::GetByindex => NLM_F_REQUEST,
        }
    }

    /// Message type for the netlink header: command in the low byte, the
    /// ip_set subsystem id in the high byte.
    pub fn msg_type(self) -> u16 {
        self as u16 | (NFNL_SUBSYS_IPSET << 8)
    }
}

// Command-level attributes.
pub const IPSET_ATTR_PROTOCOL: u16 = 1;
pub const IPSET_ATTR_SETNAME: u16 = 2;
pub const IPSET_ATTR_TYPENAME: u16 = 3;
pub const IPSET_ATTR_SETNAME2: u16 = IPSET_ATTR_TYPENAME;
pub const IPSET_ATTR_REVISION: u16 = 4;
pub const IPSET_ATTR_FAMILY: u16 = 5;
pub const IPSET_ATTR_FLAGS: u16 = 6;
pub const IPSET_ATTR_DATA: u16 = 7;
pub const IPSET_ATTR_ADT: u16 = 8;
pub const IPSET_ATTR_LINENO: u16 = 9;
pub const IPSET_ATTR_PROTOCOL_MIN: u16 = 10;
pub const IPSET_ATTR_REVISION_MIN: u16 = IPSET_ATTR_PROTOCOL_MIN;
pub const IPSET_ATTR_INDEX: u16 = 11;

// CADT attributes, shared by create and add/del/test.
pub const IPSET_ATTR_IP: u16 = 1;
pub const IPSET_ATTR_IP_TO: u16 = 2;
pub const IPSET_ATTR_CIDR: u16 = 3;
pub const IPSET_ATTR_PORT: u16 = 4;
pub const IPSET_ATTR_PORT_TO: u16 = 5;
pub const IPSET_ATTR_TIMEOUT: u16 = 6;
pub const IPSET_ATTR_PROTO: u16 = 7;
pub const IPSET_ATTR_CADT_FLAGS: u16 = 8;
pub const IPSET_ATTR_CADT_MAX: u16 = 16;

// Create-only attributes.
pub const IPSET_ATTR_HASHSIZE: u16 = 18;
pub const IPSET_ATTR_MAXELEM: u16 = 19;
pub const IPSET_ATTR_NETMASK: u16 = 20;
pub const IPSET_ATTR_ELEMENTS: u16 = 24;
pub const IPSET_ATTR_REFERENCES: u16 = 25;
pub const IPSET_ATTR_MEMSIZE: u16 = 26;

// ADT-only attributes.
pub const IPSET_ATTR_ETHER: u16 = IPSET_ATTR_CADT_MAX + 1;
pub const IPSET_ATTR_NAME: u16 = 18;
pub const IPSET_ATTR_IP2: u16 = 20;
pub const IPSET_ATTR_CIDR2: u16 = 21;
pub const IPSET_ATTR_IP2_TO: u16 = 22;
pub const IPSET_ATTR_IFACE: u16 = 23;
pub const IPSET_ATTR_COMMENT: u16 = 26;

// Nested IP address attributes.
pub const IPSET_ATTR_IPADDR_IPV4: u16 = 1;
pub const IPSET_ATTR_IPADDR_IPV6: u16 = 2;

// Address families as netfilter spells them, linux/netfilter.h.
pub const NFPROTO_UNSPEC: u8 = 0;
pub const NFPROTO_IPV4: u8 = 2;
pub const NFPROTO_IPV6: u8 = 10;

// Kernel-side error numbers. The private range starts at 4096; type-specific
// errors start at 4352.
pub const IPSET_ERR_PRIVATE: i32 = 4096;
pub const IPSET_ERR_PROTOCOL: i32 = 4097;
pub const IPSET_ERR_FIND_TYPE: i32 = 4098;
pub const IPSET_ERR_MAX_SETS: i32 = 4099;
pub const IPSET_ERR_BUSY: i32 = 4100;
pub const IPSET_ERR_EXIST_SETNAME2: i32 = 4101;
pub const IPSET_ERR_TYPE_MISMATCH: i32 = 4102;
pub const IPSET_ERR_EXIST: i32 = 4103;
pub const IPSET_ERR_INVALID_CIDR: i32 = 4104;
pub const IPSET_ERR_INVALID_NETMASK: i32 = 4105;
pub const IPSET_ERR_INVALID_FAMILY: i32 = 4106;
pub const IPSET_ERR_TIMEOUT: i32 = 4107;
pub const IPSET_ERR_REFERENCED: i32 = 4108;
pub const IPSET_ERR_IPADDR_IPV4: i32 = 4109;
pub const IPSET_ERR_IPADDR_IPV6: i32 = 4110;
pub const IPSET_ERR_COUNTER: i32 = 4111;
pub const IPSET_ERR_COMMENT: i32 = 4112;
pub const IPSET_ERR_INVALID_MARKMASK: i32 = 4113;
pub const IPSET_ERR_SKBINFO: i32 = 4114;
pub const IPSET_ERR_TYPE_SPECIFIC: i32 = 4352;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_flags() {
        assert_eq!(Cmd::Create.flags(), 0x0001 | 0x0004 | 0x0400 | 0x0200);
        assert_eq!(Cmd::Destroy.flags(), 0x0005);
        assert_eq!(Cmd::List.flags(), 0x0001 | 0x0004 | 0x0300);
        assert_eq!(Cmd::Add.flags(), 0x0001 | 0x0004 | 0x0200);
        assert_eq!(Cmd::Protocol.flags(), 0x0001);
        assert_eq!(Cmd::Type.flags(), 0x0001);
    }

    #[test]
    fn test_msg_type() {
        assert_eq!(Cmd::Protocol.msg_type(), 0x0601);
        assert_eq!(Cmd::Add.msg_type(), 0x0609);
        assert_eq!(Cmd::Type.msg_type(), 0x060d);
    }

    #[test]
    fn test_attr_flag_bits() {
        assert_eq!(NLA_F_NESTED, 0x8000);
        assert_eq!(NLA_F_NET_BYTEORDER, 0x4000);
        assert_eq!(IPSET_ATTR_DATA | NLA_F_NESTED, 0x8007);
        assert_eq!(NLA_TYPE_MASK, 0x3fff);
    }
}
