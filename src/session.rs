//! The client handle: protocol negotiation, the per-type revision cache and
//! the public commands.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::RwLock;

use log::debug;

use crate::constant::{
    Cmd, IPSET_ATTR_ADT, IPSET_ATTR_CIDR, IPSET_ATTR_CIDR2, IPSET_ATTR_DATA, IPSET_ATTR_ETHER,
    IPSET_ATTR_FAMILY, IPSET_ATTR_HASHSIZE, IPSET_ATTR_IP, IPSET_ATTR_IP2,
    IPSET_ATTR_IPADDR_IPV4, IPSET_ATTR_IPADDR_IPV6, IPSET_ATTR_LINENO, IPSET_ATTR_MAXELEM,
    IPSET_ATTR_PORT, IPSET_ATTR_PORT_TO, IPSET_ATTR_PROTO, IPSET_ATTR_PROTOCOL,
    IPSET_ATTR_PROTOCOL_MIN, IPSET_ATTR_REVISION, IPSET_ATTR_REVISION_MIN, IPSET_ATTR_SETNAME,
    IPSET_ATTR_TYPENAME, IPSET_PROTOCOL, IPSET_PROTOCOL_MIN, NFNETLINK_V0, NLA_F_NESTED,
    NLA_F_NET_BYTEORDER, SIZEOF_NFGENMSG,
};
use crate::netlink::{htonl, htons, nfgenmsg, ntohs, parse_attrs, Attr, NlAttr, Request};
use crate::transport::{NetlinkSocket, Transport};
use crate::types::{
    validate_name, Entry, Error, Family, IPSet, ListItem, MacAddr, SetType, TypeName,
};

/// Programs named kernel sets over one netlink channel. Construction
/// negotiates the wire protocol; afterwards the handle is immutable except
/// for the revision cache and can be shared between threads when the
/// transport allows it.
pub struct Handle<T = NetlinkSocket> {
    transport: T,
    protocol: u8,
    revisions: RwLock<HashMap<SetType, (u8, u8)>>,
}

impl Handle<NetlinkSocket> {
    /// Open the kernel channel and negotiate the protocol version.
    pub fn new() -> Result<Handle<NetlinkSocket>, Error> {
        Handle::with_transport(NetlinkSocket::new()?)
    }
}

impl<T: Transport> Handle<T> {
    /// Build a handle over an explicit transport and negotiate the protocol
    /// version with whatever is on the other end.
    pub fn with_transport(transport: T) -> Result<Handle<T>, Error> {
        let mut handle = Handle {
            transport,
            protocol: IPSET_PROTOCOL,
            revisions: RwLock::new(HashMap::new()),
        };
        let (max, min) = handle.probe_protocol()?;
        debug!("supported protocol {}, min supported {}", max, min);
        if max < IPSET_PROTOCOL_MIN {
            return Err(Error::Protocol(max));
        }
        handle.protocol = max.min(IPSET_PROTOCOL);
        Ok(handle)
    }

    /// The protocol version negotiated at construction.
    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    /// Create a named set. An unspecified family is normalized to `inet`
    /// for every type but `hash:mac`; the revision is taken from the kernel
    /// unless the descriptor pins one.
    pub fn create(&self, set: &IPSet) -> Result<(), Error> {
        validate_name(&set.name, "create")?;
        if set.port_range.is_some() {
            return Err(Error::UnsupportedOption("port_range"));
        }
        if set.comment.is_some() {
            return Err(Error::UnsupportedOption("comment"));
        }
        let family = match set.family {
            Family::Unspec if set.set_type != SetType::HashMac => Family::Inet,
            family => family,
        };
        let mut req = self.new_request(Cmd::Create);
        req.add_attr(NlAttr::with_value(
            IPSET_ATTR_SETNAME,
            &zero_terminated(&set.name),
        ));
        req.add_attr(NlAttr::with_value(
            IPSET_ATTR_TYPENAME,
            &zero_terminated(set.set_type.name()),
        ));
        self.fill_revision(&mut req, set.set_type, set.revision)?;
        fill_family(&mut req, family);
        fill_create_data(&mut req, set);
        debug!("create {:?}", req.payload());
        self.transport.send(&req)?;
        Ok(())
    }

    /// Remove a named set.
    pub fn destroy(&self, name: &str) -> Result<(), Error> {
        validate_name(name, "destroy")?;
        let mut req = self.new_request(Cmd::Destroy);
        req.add_attr(NlAttr::with_value(IPSET_ATTR_SETNAME, &zero_terminated(name)));
        self.transport.send(&req)?;
        Ok(())
    }

    /// Add an entry to a set.
    pub fn add(&self, set: &IPSet, entry: &Entry) -> Result<(), Error> {
        self.add_or_del(Cmd::Add, "add", set, entry)
    }

    /// Delete an entry from a set.
    pub fn del(&self, set: &IPSet, entry: &Entry) -> Result<(), Error> {
        self.add_or_del(Cmd::Del, "del", set, entry)
    }

    fn add_or_del(&self, cmd: Cmd, verb: &'static str, set: &IPSet, entry: &Entry) -> Result<(), Error> {
        validate_name(&set.name, verb)?;
        let mut req = self.new_request(cmd);
        req.add_attr(NlAttr::with_value(
            IPSET_ATTR_SETNAME,
            &zero_terminated(&set.name),
        ));
        let mut data = NlAttr::new(IPSET_ATTR_DATA | NLA_F_NESTED);
        fill_entries(&mut data, set.set_type, entry)?;
        req.add_attr(data);
        debug!("{} {:?}", verb, req.payload());
        self.transport.send(&req)?;
        Ok(())
    }

    /// Dump sets: every reply frame describes one set. An empty name dumps
    /// them all.
    pub fn list(&self, name: &str) -> Result<Vec<ListItem>, Error> {
        let mut req = self.new_request(Cmd::List);
        if !name.is_empty() {
            validate_name(name, "list")?;
            req.add_attr(NlAttr::with_value(IPSET_ATTR_SETNAME, &zero_terminated(name)));
        }
        let frames = self.transport.send(&req)?;
        let mut sets = Vec::new();
        for (k, frame) in frames.iter().enumerate() {
            debug!("receive msgs[{}]={:?}", k, frame);
            sets.push(parse_set_frame(k, frame)?);
        }
        Ok(sets)
    }

    /// Every request starts the same way: netfilter prelude, then the
    /// negotiated protocol attribute.
    fn new_request(&self, cmd: Cmd) -> Request {
        let mut req = Request::new(cmd.msg_type(), cmd.flags());
        req.add_data(&nfgenmsg(libc::AF_INET as u8, NFNETLINK_V0));
        req.add_attr(NlAttr::with_value(IPSET_ATTR_PROTOCOL, &[self.protocol]));
        req
    }

    fn probe_protocol(&self) -> Result<(u8, u8), Error> {
        let req = self.new_request(Cmd::Protocol);
        let frames = self.transport.send(&req)?;
        let mut min = 0u8;
        let mut max = 0u8;
        if let Some(frame) = frames.first() {
            if frame.len() < SIZEOF_NFGENMSG {
                return Err(Error::CorruptMessage(0));
            }
            let attrs =
                parse_attrs(&frame[SIZEOF_NFGENMSG..]).map_err(|_| Error::CorruptMessage(0))?;
            for attr in attrs {
                match attr.atype {
                    IPSET_ATTR_PROTOCOL => {
                        expect_len(&attr, 1, 0)?;
                        max = attr.value[0];
                        if min == 0 {
                            min = max;
                        }
                    }
                    IPSET_ATTR_PROTOCOL_MIN => {
                        expect_len(&attr, 1, 0)?;
                        min = attr.value[0];
                    }
                    _ => {}
                }
            }
        }
        Ok((max, min))
    }

    /// Look up the supported revision range of a set type, probing the
    /// kernel once per type. On a hit readers proceed in parallel; a miss
    /// performs the TYPE round-trip under the write lock so concurrent
    /// callers wait for one probe instead of racing their own.
    fn fill_revision(
        &self,
        req: &mut Request,
        set_type: SetType,
        revision: Option<u8>,
    ) -> Result<(), Error> {
        let cached = {
            let cache = self.revisions.read().unwrap_or_else(|e| e.into_inner());
            cache.get(&set_type).copied()
        };
        let (min, max) = match cached {
            Some(range) => range,
            None => {
                let mut cache = self.revisions.write().unwrap_or_else(|e| e.into_inner());
                match cache.get(&set_type).copied() {
                    Some(range) => range,
                    None => {
                        let range = self.probe_revision(set_type)?;
                        cache.insert(set_type, range);
                        range
                    }
                }
            }
        };
        let value = match revision {
            Some(revision) => {
                if revision < min || revision > max {
                    return Err(Error::Revision(revision, min, max));
                }
                revision
            }
            None => max,
        };
        req.add_attr(NlAttr::with_value(IPSET_ATTR_REVISION, &[value]));
        Ok(())
    }

    /// TYPE command: ask the kernel which revisions of `set_type` it speaks.
    fn probe_revision(&self, set_type: SetType) -> Result<(u8, u8), Error> {
        let mut req = self.new_request(Cmd::Type);
        req.add_attr(NlAttr::with_value(
            IPSET_ATTR_TYPENAME,
            &zero_terminated(set_type.name()),
        ));
        fill_family(&mut req, Family::Inet);
        debug!("type {:?}", req.payload());
        let frames = self.transport.send(&req)?;
        let mut min = 0u8;
        let mut max = 0u8;
        if let Some(frame) = frames.first() {
            if frame.len() < SIZEOF_NFGENMSG {
                return Err(Error::CorruptMessage(0));
            }
            let attrs =
                parse_attrs(&frame[SIZEOF_NFGENMSG..]).map_err(|_| Error::CorruptMessage(0))?;
            for attr in attrs {
                match attr.atype {
                    IPSET_ATTR_REVISION => {
                        expect_len(&attr, 1, 0)?;
                        max = attr.value[0];
                    }
                    IPSET_ATTR_REVISION_MIN => {
                        expect_len(&attr, 1, 0)?;
                        min = attr.value[0];
                    }
                    _ => {}
                }
            }
        }
        debug!("supported revision of {} is {}, min supported {}", set_type, max, min);
        Ok((min, max))
    }
}

fn zero_terminated(s: &str) -> Vec<u8> {
    let mut buf = s.as_bytes().to_vec();
    buf.push(0);
    buf
}

fn fill_family(req: &mut Request, family: Family) {
    req.add_attr(NlAttr::with_value(IPSET_ATTR_FAMILY, &[family.nfproto()]));
}

/// Create-time parameters ride in a nested DATA attribute; the nest is only
/// sent when at least one is present.
fn fill_create_data(req: &mut Request, set: &IPSet) {
    let mut data = NlAttr::new(IPSET_ATTR_DATA | NLA_F_NESTED);
    if let Some(hash_size) = set.hash_size {
        data.add_bytes(IPSET_ATTR_HASHSIZE | NLA_F_NET_BYTEORDER, &htonl(hash_size));
    }
    if let Some(max_elem) = set.max_elem {
        data.add_bytes(IPSET_ATTR_MAXELEM | NLA_F_NET_BYTEORDER, &htonl(max_elem));
    }
    if !data.is_empty() {
        req.add_attr(data);
    }
}

type FillFn = fn(&mut NlAttr, &Entry) -> Result<(), Error>;

/// Which attributes each set type needs, in wire order.
fn fill_funcs(set_type: SetType) -> Option<&'static [FillFn]> {
    use SetType::*;
    Some(match set_type {
        HashIp | HashNet => &[fill_ip],
        HashMac => &[fill_mac],
        HashIpMac => &[fill_ip, fill_mac],
        HashNetNet => &[fill_ip, fill_ip2],
        HashIpPort | HashNetPort => &[fill_ip, fill_port],
        HashIpPortIp | HashIpPortNet | HashNetPortNet => &[fill_ip, fill_port, fill_ip2],
        _ => return None,
    })
}

fn fill_entries(parent: &mut NlAttr, set_type: SetType, entry: &Entry) -> Result<(), Error> {
    let funcs = fill_funcs(set_type).ok_or(Error::UnsupportedSetType(set_type))?;
    for fill in funcs {
        fill(parent, entry)?;
    }
    fill_lineno(parent);
    Ok(())
}

fn fill_lineno(parent: &mut NlAttr) {
    parent.add_bytes(IPSET_ATTR_LINENO | NLA_F_NET_BYTEORDER, &htonl(0));
}

fn fill_addr(
    parent: &mut NlAttr,
    ip_attr: u16,
    cidr_attr: u16,
    literal: &str,
    cidr: Option<u8>,
) -> Result<(), Error> {
    let ip: IpAddr = literal
        .parse()
        .map_err(|_| Error::BadIp(literal.to_string()))?;
    let mut nest = NlAttr::new(ip_attr | NLA_F_NESTED);
    match ip {
        IpAddr::V4(v4) => nest.add_bytes(IPSET_ATTR_IPADDR_IPV4 | NLA_F_NET_BYTEORDER, &v4.octets()),
        IpAddr::V6(v6) => nest.add_bytes(IPSET_ATTR_IPADDR_IPV6 | NLA_F_NET_BYTEORDER, &v6.octets()),
    }
    parent.add(nest);
    if let Some(cidr) = cidr {
        parent.add_bytes(cidr_attr, &[cidr]);
    }
    Ok(())
}

fn fill_ip(parent: &mut NlAttr, entry: &Entry) -> Result<(), Error> {
    fill_addr(parent, IPSET_ATTR_IP, IPSET_ATTR_CIDR, &entry.ip, entry.cidr)
}

fn fill_ip2(parent: &mut NlAttr, entry: &Entry) -> Result<(), Error> {
    fill_addr(parent, IPSET_ATTR_IP2, IPSET_ATTR_CIDR2, &entry.ip2, entry.cidr2)
}

fn fill_port(parent: &mut NlAttr, entry: &Entry) -> Result<(), Error> {
    parent.add_bytes(IPSET_ATTR_PORT | NLA_F_NET_BYTEORDER, &htons(entry.port));
    if entry.port_to != 0 {
        parent.add_bytes(IPSET_ATTR_PORT_TO | NLA_F_NET_BYTEORDER, &htons(entry.port_to));
    }
    let proto = if entry.proto == 0 {
        libc::IPPROTO_TCP as u8
    } else {
        entry.proto
    };
    parent.add_bytes(IPSET_ATTR_PROTO, &[proto]);
    Ok(())
}

fn fill_mac(parent: &mut NlAttr, entry: &Entry) -> Result<(), Error> {
    let mac = entry
        .mac
        .ok_or_else(|| Error::BadMac("missing".to_string()))?;
    parent.add_bytes(IPSET_ATTR_ETHER, &mac.octets());
    Ok(())
}

/// `attr` must carry exactly `want` value bytes; anything else marks the
/// frame as corrupt.
fn expect_len(attr: &Attr<'_>, want: usize, frame: usize) -> Result<(), Error> {
    if attr.value.len() != want {
        return Err(Error::CorruptMessage(frame));
    }
    Ok(())
}

/// Decode one list frame into a set plus its entries.
fn parse_set_frame(frame: usize, buf: &[u8]) -> Result<ListItem, Error> {
    if buf.len() < SIZEOF_NFGENMSG {
        return Err(Error::CorruptMessage(frame));
    }
    let attrs = parse_attrs(&buf[SIZEOF_NFGENMSG..]).map_err(|_| Error::CorruptMessage(frame))?;
    let mut name = None;
    let mut set_type = None;
    let mut revision = None;
    let mut family = Family::Unspec;
    let mut entries = Vec::new();
    for attr in attrs {
        match attr.atype {
            IPSET_ATTR_PROTOCOL => expect_len(&attr, 1, frame)?,
            IPSET_ATTR_SETNAME => name = Some(read_string(&attr)),
            IPSET_ATTR_TYPENAME => {
                let text = read_string(&attr);
                set_type = Some(
                    SetType::from_name(&text).ok_or(Error::UnknownTypeName(text))?,
                );
            }
            IPSET_ATTR_REVISION => {
                expect_len(&attr, 1, frame)?;
                revision = Some(attr.value[0]);
            }
            IPSET_ATTR_FAMILY => {
                expect_len(&attr, 1, frame)?;
                family = Family::from_nfproto(attr.value[0]);
            }
            IPSET_ATTR_DATA if attr.nested() => {
                // Create-time statistics (elements, references, memsize)
                // are not surfaced.
            }
            IPSET_ATTR_ADT if attr.nested() => {
                entries.extend(parse_adt(frame, attr.value)?);
            }
            _ => {}
        }
    }
    let mut set = IPSet::new(
        name.ok_or(Error::CorruptMessage(frame))?,
        set_type.ok_or(Error::CorruptMessage(frame))?,
    );
    set.family = family;
    set.revision = revision;
    Ok(ListItem { set, entries })
}

/// Each direct child of the ADT nest is one DATA-nested entry.
fn parse_adt(frame: usize, buf: &[u8]) -> Result<Vec<Entry>, Error> {
    let children = parse_attrs(buf).map_err(|_| Error::CorruptMessage(frame))?;
    let mut entries = Vec::new();
    for child in children {
        if child.atype != IPSET_ATTR_DATA || !child.nested() {
            return Err(Error::UnknownAttr(frame, child.atype));
        }
        entries.push(parse_entry(frame, child.value)?);
    }
    Ok(entries)
}

fn parse_entry(frame: usize, buf: &[u8]) -> Result<Entry, Error> {
    let attrs = parse_attrs(buf).map_err(|_| Error::CorruptMessage(frame))?;
    let mut entry = Entry::default();
    for attr in attrs {
        match attr.atype {
            IPSET_ATTR_IP if attr.nested() => {
                entry.ip = parse_ip(frame, attr.value)?.to_string();
            }
            IPSET_ATTR_IP2 if attr.nested() => {
                entry.ip2 = parse_ip(frame, attr.value)?.to_string();
            }
            IPSET_ATTR_CIDR => {
                expect_len(&attr, 1, frame)?;
                entry.cidr = Some(attr.value[0]);
            }
            IPSET_ATTR_CIDR2 => {
                expect_len(&attr, 1, frame)?;
                entry.cidr2 = Some(attr.value[0]);
            }
            IPSET_ATTR_ETHER => {
                expect_len(&attr, 6, frame)?;
                let mut mac = [0u8; 6];
                mac.copy_from_slice(attr.value);
                entry.mac = Some(MacAddr::from(mac));
            }
            IPSET_ATTR_PORT => {
                expect_len(&attr, 2, frame)?;
                entry.port = ntohs(attr.value);
            }
            IPSET_ATTR_PROTO => {
                expect_len(&attr, 1, frame)?;
                entry.proto = attr.value[0];
            }
            unknown => return Err(Error::UnknownAttr(frame, unknown)),
        }
    }
    Ok(entry)
}

/// The IP and IP2 nests carry the raw address as one of the IPADDR types.
fn parse_ip(frame: usize, buf: &[u8]) -> Result<IpAddr, Error> {
    let attrs = parse_attrs(buf).map_err(|_| Error::CorruptMessage(frame))?;
    for attr in attrs {
        match attr.atype {
            IPSET_ATTR_IPADDR_IPV4 => {
                expect_len(&attr, 4, frame)?;
                let mut octets = [0u8; 4];
                octets.copy_from_slice(attr.value);
                return Ok(IpAddr::V4(Ipv4Addr::from(octets)));
            }
            IPSET_ATTR_IPADDR_IPV6 => {
                expect_len(&attr, 16, frame)?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(attr.value);
                return Ok(IpAddr::V6(Ipv6Addr::from(octets)));
            }
            _ => {}
        }
    }
    Err(Error::CorruptMessage(frame))
}

/// NUL-terminated string attribute.
fn read_string(attr: &Attr<'_>) -> String {
    let bytes = attr.value.strip_suffix(&[0u8]).unwrap_or(attr.value);
    String::from_utf8_lossy(bytes).into_owned()
}
