//! A netlink client for the kernel ip_set facility.
//! Supports the following commands:
//! * create
//! * destroy
//! * list
//! * add
//! * del
//!
//! Commands are issued through a [`Handle`], which negotiates the ip_set
//! wire protocol once at construction and caches the revision range the
//! kernel advertises per set type.
//!
//! # Example
//! ```no_run
//! use ipset::{Entry, Handle, IPSet, SetType};
//!
//! fn main() -> Result<(), ipset::Error> {
//!     let handle = Handle::new()?;
//!     let set = IPSet::new("test", SetType::HashIp);
//!     handle.create(&set)?;
//!
//!     let entry = Entry {
//!         ip: "192.168.0.1".to_string(),
//!         ..Default::default()
//!     };
//!     handle.add(&set, &entry)?;
//!
//!     for item in handle.list("test")? {
//!         for entry in &item.entries {
//!             println!("{}", entry.ip);
//!         }
//!     }
//!
//!     handle.del(&set, &entry)?;
//!     handle.destroy("test")?;
//!     Ok(())
//! }
//! ```

pub use netlink::{pack, parse_attrs, Attr, AttrIter, InvalidBuffer, NlAttr, Request};
pub use session::Handle;
pub use transport::{NetlinkSocket, Transport};
pub use types::{
    try_convert_errno, Entry, Error, Family, IPSet, ListItem, MacAddr, SetType, TypeName,
};

pub mod constant;
mod netlink;
mod session;
mod transport;
mod types;
