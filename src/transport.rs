//! The kernel configuration channel.
//!
//! The command layer talks through the [`Transport`] trait: one request out,
//! every reply frame back, already stripped of its netlink header. The stock
//! implementation is [`NetlinkSocket`] over `AF_NETLINK`/`NETLINK_NETFILTER`;
//! tests substitute an in-memory transport.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Mutex;

use crate::constant::{NLMSG_DONE, NLMSG_ERROR, NLM_F_MULTI};
use crate::netlink::{align, NlMsgHdr, Request, NLMSG_HDRLEN};
use crate::types::Error;

const NETLINK_NETFILTER: libc::c_int = 12;
const RECV_BUF_LEN: usize = 65536;

/// A blocking request/reply channel to the kernel.
pub trait Transport {
    /// Execute one request: send it, then collect reply payloads until the
    /// terminating ACK, DONE or error frame. Payloads start with the
    /// four-byte nfgenmsg prelude.
    fn send(&self, req: &Request) -> Result<Vec<Vec<u8>>, Error>;
}

/// Netlink socket bound to the netfilter protocol. One in-flight request at
/// a time: the sequence counter lock is held for the whole round-trip, which
/// serializes concurrent callers.
pub struct NetlinkSocket {
    fd: OwnedFd,
    pid: u32,
    seq: Mutex<u32>,
}

impl NetlinkSocket {
    pub fn new() -> Result<NetlinkSocket, Error> {
        let fd = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                NETLINK_NETFILTER,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const _ as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }

        // The kernel assigns the port id during bind; read it back.
        let mut len = mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockname(
                fd.as_raw_fd(),
                &mut addr as *mut _ as *mut libc::sockaddr,
                &mut len,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }

        Ok(NetlinkSocket {
            fd,
            pid: addr.nl_pid,
            seq: Mutex::new(0),
        })
    }
}

impl Transport for NetlinkSocket {
    fn send(&self, req: &Request) -> Result<Vec<Vec<u8>>, Error> {
        let mut seq = self.seq.lock().unwrap_or_else(|e| e.into_inner());
        *seq += 1;
        let msg = req.serialize(*seq, self.pid);

        let mut dest: libc::sockaddr_nl = unsafe { mem::zeroed() };
        dest.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        let rc = unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                msg.as_ptr() as *const libc::c_void,
                msg.len(),
                0,
                &dest as *const _ as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }

        let mut frames = Vec::new();
        let mut buf = vec![0u8; RECV_BUF_LEN];
        loop {
            let n = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                )
            };
            if n < 0 {
                return Err(io::Error::last_os_error().into());
            }
            if n == 0 {
                return Err(channel_err("netlink socket closed"));
            }
            if demux(&buf[..n as usize], *seq, self.pid, &mut frames)? {
                return Ok(frames);
            }
        }
    }
}

fn channel_err(msg: &str) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::InvalidData, msg.to_string()))
}

/// Walk the netlink frames in one received datagram. Appends data payloads
/// to `frames` and reports whether the reply set is complete: an ACK or DONE
/// frame, or a data frame without the multipart flag, terminates it. A
/// kernel-reported failure becomes [`Error::Errno`].
fn demux(buf: &[u8], seq: u32, pid: u32, frames: &mut Vec<Vec<u8>>) -> Result<bool, Error> {
    let mut rest = buf;
    while !rest.is_empty() {
        let hdr = NlMsgHdr::deserialize(rest).ok_or_else(|| channel_err("short netlink frame"))?;
        let total = hdr.len as usize;
        if total < NLMSG_HDRLEN || total > rest.len() {
            return Err(channel_err("malformed netlink frame length"));
        }
        if hdr.seq != seq {
            return Err(channel_err("netlink sequence mismatch"));
        }
        if hdr.pid != pid {
            rest = &rest[align(total).min(rest.len())..];
            continue;
        }
        match hdr.msg_type {
            NLMSG_ERROR => {
                if total < NLMSG_HDRLEN + 4 {
                    return Err(channel_err("short netlink error frame"));
                }
                let errno = i32::from_ne_bytes([
                    rest[NLMSG_HDRLEN],
                    rest[NLMSG_HDRLEN + 1],
                    rest[NLMSG_HDRLEN + 2],
                    rest[NLMSG_HDRLEN + 3],
                ]);
                if errno == 0 {
                    return Ok(true);
                }
                return Err(Error::Errno(-errno));
            }
            NLMSG_DONE => return Ok(true),
            _ => {
                frames.push(rest[NLMSG_HDRLEN..total].to_vec());
                if hdr.flags & NLM_F_MULTI == 0 {
                    return Ok(true);
                }
            }
        }
        rest = &rest[align(total).min(rest.len())..];
    }
    Ok(false)
}
