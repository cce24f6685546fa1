//! Netlink framing and the netfilter attribute codec.
//!
//! Attributes are `[length: u16][type: u16][value, padded to 4]` in host byte
//! order, where length counts header plus value but not the padding. The two
//! high bits of the type are flags: `NLA_F_NESTED` marks a value that is
//! itself an attribute stream, `NLA_F_NET_BYTEORDER` marks a numeric payload
//! in network byte order. Readers mask the flags off for dispatch and keep
//! them around for interpretation.

use byteorder::{BigEndian, ByteOrder, NativeEndian};

use crate::constant::{NLA_TYPE_MASK, SIZEOF_NFGENMSG};

/// Netlink message header, 16 bytes in host byte order.
pub const NLMSG_HDRLEN: usize = 16;

/// Attribute header size.
pub const ATTR_HDRLEN: usize = 4;

/// Round `len` up to the 4-byte attribute alignment.
pub fn align(len: usize) -> usize {
    (len + 3) & !3
}

pub fn htons(val: u16) -> [u8; 2] {
    let mut buf = [0u8; 2];
    BigEndian::write_u16(&mut buf, val);
    buf
}

pub fn htonl(val: u32) -> [u8; 4] {
    let mut buf = [0u8; 4];
    BigEndian::write_u32(&mut buf, val);
    buf
}

pub fn ntohs(buf: &[u8]) -> u16 {
    BigEndian::read_u16(buf)
}

pub fn ntohl(buf: &[u8]) -> u32 {
    BigEndian::read_u32(buf)
}

pub fn native_u16(val: u16) -> [u8; 2] {
    let mut buf = [0u8; 2];
    NativeEndian::write_u16(&mut buf, val);
    buf
}

pub fn native_u32(val: u32) -> [u8; 4] {
    let mut buf = [0u8; 4];
    NativeEndian::write_u32(&mut buf, val);
    buf
}

pub fn read_native_u16(buf: &[u8]) -> u16 {
    NativeEndian::read_u16(buf)
}

pub fn read_native_u32(buf: &[u8]) -> u32 {
    NativeEndian::read_u32(buf)
}

/// The generic netfilter prelude every ip_set message starts with:
/// `{family, version, res_id}`, four bytes. The family here is always
/// `AF_INET` and has nothing to do with the address family of set members.
pub fn nfgenmsg(family: u8, version: u8) -> [u8; SIZEOF_NFGENMSG] {
    [family, version, 0, 0]
}

/// Encode one attribute: aligned buffer with the declared length covering
/// header and value only.
pub fn pack(atype: u16, flags: u16, value: &[u8]) -> Vec<u8> {
    let declared = ATTR_HDRLEN + value.len();
    let mut buf = vec![0u8; align(declared)];
    NativeEndian::write_u16(&mut buf[0..2], declared as u16);
    NativeEndian::write_u16(&mut buf[2..4], atype | flags);
    buf[4..4 + value.len()].copy_from_slice(value);
    buf
}

/// A decoded attribute borrowed from a reply buffer. `atype` has the flag
/// bits masked off; `flags` keeps them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr<'a> {
    pub atype: u16,
    pub flags: u16,
    pub len: u16,
    pub value: &'a [u8],
}

impl Attr<'_> {
    pub fn nested(&self) -> bool {
        self.flags & crate::constant::NLA_F_NESTED != 0
    }

    pub fn net_byteorder(&self) -> bool {
        self.flags & crate::constant::NLA_F_NET_BYTEORDER != 0
    }
}

/// Buffer too short for an attribute header, or a declared length that is
/// shorter than the header or runs past the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidBuffer;

/// Lazy walker over an attribute stream. Restartable: constructing a new one
/// over the same buffer yields the same sequence.
pub struct AttrIter<'a> {
    buf: &'a [u8],
}

impl<'a> AttrIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        AttrIter { buf }
    }
}

impl<'a> Iterator for AttrIter<'a> {
    type Item = Result<Attr<'a>, InvalidBuffer>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.len() < ATTR_HDRLEN {
            if self.buf.is_empty() {
                return None;
            }
            // Trailing padding shorter than a header terminates the walk.
            if self.buf.iter().all(|b| *b == 0) {
                self.buf = &[];
                return None;
            }
            self.buf = &[];
            return Some(Err(InvalidBuffer));
        }
        let len = NativeEndian::read_u16(&self.buf[0..2]) as usize;
        let raw_type = NativeEndian::read_u16(&self.buf[2..4]);
        if len < ATTR_HDRLEN || len > self.buf.len() {
            self.buf = &[];
            return Some(Err(InvalidBuffer));
        }
        let attr = Attr {
            atype: raw_type & NLA_TYPE_MASK,
            flags: raw_type & !NLA_TYPE_MASK,
            len: len as u16,
            value: &self.buf[ATTR_HDRLEN..len],
        };
        let advance = align(len).min(self.buf.len());
        self.buf = &self.buf[advance..];
        Some(Ok(attr))
    }
}

/// Decode a whole attribute stream.
pub fn parse_attrs(buf: &[u8]) -> Result<Vec<Attr<'_>>, InvalidBuffer> {
    AttrIter::new(buf).collect()
}

/// Builder for an attribute tree. Children are appended in order and the
/// declared lengths are fixed up at serialization time.
#[derive(Debug, Clone)]
pub struct NlAttr {
    atype: u16,
    value: Vec<u8>,
    children: Vec<NlAttr>,
}

impl NlAttr {
    pub fn new(atype: u16) -> Self {
        NlAttr {
            atype,
            value: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_value(atype: u16, value: &[u8]) -> Self {
        NlAttr {
            atype,
            value: value.to_vec(),
            children: Vec::new(),
        }
    }

    /// Append a child attribute, `RtAttr.AddChild` style.
    pub fn add(&mut self, child: NlAttr) {
        self.children.push(child);
    }

    /// Append a leaf child.
    pub fn add_bytes(&mut self, atype: u16, value: &[u8]) {
        self.children.push(NlAttr::with_value(atype, value));
    }

    /// Declared length: header plus value plus aligned children. A leaf's
    /// declared length does not include its own padding.
    pub fn len(&self) -> usize {
        if self.children.is_empty() {
            return ATTR_HDRLEN + self.value.len();
        }
        let mut len = align(ATTR_HDRLEN + self.value.len());
        for child in &self.children {
            len += align(child.len());
        }
        len
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty() && self.children.is_empty()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let declared = self.len();
        let mut buf = vec![0u8; align(declared)];
        NativeEndian::write_u16(&mut buf[0..2], declared as u16);
        NativeEndian::write_u16(&mut buf[2..4], self.atype);
        let mut off = ATTR_HDRLEN;
        buf[off..off + self.value.len()].copy_from_slice(&self.value);
        off = align(off + self.value.len());
        for child in &self.children {
            let bytes = child.serialize();
            buf[off..off + bytes.len()].copy_from_slice(&bytes);
            off += bytes.len();
        }
        buf
    }
}

/// Header of one netlink frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NlMsgHdr {
    pub len: u32,
    pub msg_type: u16,
    pub flags: u16,
    pub seq: u32,
    pub pid: u32,
}

impl NlMsgHdr {
    pub fn deserialize(buf: &[u8]) -> Option<NlMsgHdr> {
        if buf.len() < NLMSG_HDRLEN {
            return None;
        }
        Some(NlMsgHdr {
            len: NativeEndian::read_u32(&buf[0..4]),
            msg_type: NativeEndian::read_u16(&buf[4..6]),
            flags: NativeEndian::read_u16(&buf[6..8]),
            seq: NativeEndian::read_u32(&buf[8..12]),
            pid: NativeEndian::read_u32(&buf[12..16]),
        })
    }
}

/// One request message: type and flags fixed at construction, attributes
/// appended in order. Sequence and port id belong to the transport and are
/// stamped at serialization time.
#[derive(Debug, Clone)]
pub struct Request {
    msg_type: u16,
    flags: u16,
    payload: Vec<u8>,
}

impl Request {
    pub fn new(msg_type: u16, flags: u16) -> Self {
        Request {
            msg_type,
            flags,
            payload: Vec::new(),
        }
    }

    pub fn msg_type(&self) -> u16 {
        self.msg_type
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn add_data(&mut self, data: &[u8]) {
        self.payload.extend_from_slice(data);
    }

    pub fn add_attr(&mut self, attr: NlAttr) {
        self.payload.extend_from_slice(&attr.serialize());
    }

    pub fn serialize(&self, seq: u32, pid: u32) -> Vec<u8> {
        let total = NLMSG_HDRLEN + self.payload.len();
        let mut buf = vec![0u8; align(total)];
        NativeEndian::write_u32(&mut buf[0..4], total as u32);
        NativeEndian::write_u16(&mut buf[4..6], self.msg_type);
        NativeEndian::write_u16(&mut buf[6..8], self.flags);
        NativeEndian::write_u32(&mut buf[8..12], seq);
        NativeEndian::write_u32(&mut buf[12..16], pid);
        buf[NLMSG_HDRLEN..NLMSG_HDRLEN + self.payload.len()].copy_from_slice(&self.payload);
        buf
    }
}
