//! End-to-end tests against a live kernel. They need root and the ip_set
//! module, so they are ignored by default; run them with
//! `cargo test -- --ignored` on a suitable machine. Set membership is
//! cross-checked with the ipset command line tool.

use std::process::Command;

use ipset::constant::{IPSET_ERR_FIND_TYPE, IPSET_ERR_PROTOCOL, IPSET_PROTOCOL, IPSET_PROTOCOL_MIN};
use ipset::{try_convert_errno, Entry, Error, Family, Handle, IPSet, SetType};

fn list_members(set: &str) -> Result<Vec<String>, String> {
    let output = Command::new("ipset")
        .args(["list", set])
        .output()
        .map_err(|e| e.to_string())?;
    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).into_owned());
    }
    let data = String::from_utf8_lossy(&output.stdout);
    let mut members = false;
    let mut entries = Vec::new();
    for line in data.split('\n') {
        if members && !line.is_empty() {
            entries.push(line.to_string());
        }
        if line.starts_with("Members:") {
            members = true;
        }
    }
    Ok(entries)
}

fn check_first_member(set: &str, expect: &str) {
    let members = list_members(set).unwrap();
    assert!(!members.is_empty(), "expect first member {:?}, got none", expect);
    assert_eq!(members[0], expect);
}

/// Some set types need kernel modules that may be absent; those show up as
/// PROTOCOL or FIND_TYPE errors and are skipped, everything else fails the
/// test.
fn skippable(err: &Error) -> bool {
    matches!(
        try_convert_errno(err),
        Some(IPSET_ERR_PROTOCOL) | Some(IPSET_ERR_FIND_TYPE)
    )
}

fn all_set_types() -> Vec<SetType> {
    vec![
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
    ]
}

#[test]
#[ignore = "requires root and the ip_set kernel module"]
fn test_protocol() {
    let handle = Handle::new().unwrap();
    let proto = handle.protocol();
    assert!(
        (IPSET_PROTOCOL_MIN..=IPSET_PROTOCOL).contains(&proto),
        "negotiated protocol {}",
        proto
    );
}

#[test]
#[ignore = "requires root and the ip_set kernel module"]
fn test_create_destroy() {
    let handle = Handle::new().unwrap();

    let set = IPSet::new("TestCreate-inet", SetType::HashIp);
    handle.create(&set).unwrap();
    handle.destroy("TestCreate-inet").unwrap();

    let mut set = IPSet::new("TestCreate-inet6", SetType::HashIp);
    set.family = Family::Inet6;
    handle.create(&set).unwrap();
    handle.destroy("TestCreate-inet6").unwrap();

    for set_type in all_set_types() {
        let name = format!("TestCreate{}", set_type);
        match handle.create(&IPSet::new(name.clone(), set_type)) {
            Ok(()) => handle.destroy(&name).unwrap(),
            Err(err) => {
                assert!(skippable(&err), "create {} failed: {}", set_type, err);
                eprintln!("skip creating set type {}: {}", set_type, err);
            }
        }
    }
}

#[test]
#[ignore = "requires root and the ip_set kernel module"]
fn test_add_del_hash_ip() {
    let handle = Handle::new().unwrap();
    let set = IPSet::new("TestAddDelHashIP", SetType::HashIp);
    handle.create(&set).unwrap();
    let entry = Entry {
        ip: "192.168.0.1".to_string(),
        ..Default::default()
    };
    handle.add(&set, &entry).unwrap();
    check_first_member(&set.name, "192.168.0.1");
    handle.del(&set, &entry).unwrap();
    handle.destroy(&set.name).unwrap();
}

#[test]
#[ignore = "requires root and the ip_set kernel module"]
fn test_list() {
    let handle = Handle::new().unwrap();
    let set = IPSet::new("TestList", SetType::HashIp);
    handle.create(&set).unwrap();
    let entry1 = Entry {
        ip: "192.168.0.1".to_string(),
        ..Default::default()
    };
    handle.add(&set, &entry1).unwrap();

    let sets = handle.list("").unwrap();
    let item = sets
        .iter()
        .find(|item| item.set.name == set.name)
        .expect("TestList missing from dump");
    assert_eq!(item.set.set_type, SetType::HashIp);
    assert_eq!(item.set.family, Family::Inet);
    assert_eq!(item.entries, vec![entry1.clone()]);

    let entry2 = Entry {
        ip: "192.168.0.2".to_string(),
        ..Default::default()
    };
    handle.add(&set, &entry2).unwrap();
    let sets = handle.list(&set.name).unwrap();
    assert_eq!(sets.len(), 1);
    let mut got = sets[0].entries.clone();
    sort_entries(&mut got);
    assert_eq!(got, vec![entry1, entry2]);

    handle.destroy(&set.name).unwrap();
}

fn sort_entries(entries: &mut [Entry]) {
    entries.sort_by(|a, b| {
        a.ip.cmp(&b.ip)
            .then_with(|| a.cidr.cmp(&b.cidr))
            .then_with(|| a.port.cmp(&b.port))
            .then_with(|| a.proto.cmp(&b.proto))
            .then_with(|| a.ip2.cmp(&b.ip2))
            .then_with(|| a.cidr2.cmp(&b.cidr2))
    });
}

struct AddDelCase {
    set: IPSet,
    entry: Entry,
    expect_members: Vec<&'static str>,
    expect_entries: Vec<Entry>,
}

#[test]
#[ignore = "requires root and the ip_set kernel module"]
fn test_add_del_list() {
    let handle = Handle::new().unwrap();
    let mac = "01:23:45:67:89:ab".parse().unwrap();
    let udp = libc::IPPROTO_UDP as u8;
    let tcp = libc::IPPROTO_TCP as u8;
    let cases = vec![
        AddDelCase {
            set: IPSet::new("TestAddDelHashIP", SetType::HashIp),
            entry: Entry {
                ip: "192.168.0.1".into(),
                ..Default::default()
            },
            expect_members: vec!["192.168.0.1"],
            expect_entries: vec![Entry {
                ip: "192.168.0.1".into(),
                ..Default::default()
            }],
        },
        AddDelCase {
            set: IPSet::new("TestAddDelHashMac", SetType::HashMac),
            entry: Entry {
                mac: Some(mac),
                ..Default::default()
            },
            expect_members: vec!["01:23:45:67:89:AB"],
            expect_entries: vec![Entry {
                mac: Some(mac),
                ..Default::default()
            }],
        },
        AddDelCase {
            set: IPSet::new("TestAddDelHashIPMac", SetType::HashIpMac),
            entry: Entry {
                ip: "192.168.0.1".into(),
                mac: Some(mac),
                ..Default::default()
            },
            expect_members: vec!["192.168.0.1,01:23:45:67:89:AB"],
            expect_entries: vec![Entry {
                ip: "192.168.0.1".into(),
                mac: Some(mac),
                ..Default::default()
            }],
        },
        AddDelCase {
            set: IPSet::new("TestAddDelHashNet", SetType::HashNet),
            entry: Entry {
                ip: "192.168.0.1".into(),
                cidr: Some(24),
                ..Default::default()
            },
            expect_members: vec!["192.168.0.0/24"],
            expect_entries: vec![Entry {
                ip: "192.168.0.0".into(),
                cidr: Some(24),
                ..Default::default()
            }],
        },
        AddDelCase {
            set: IPSet::new("TestAddDelHashNetNet", SetType::HashNetNet),
            entry: Entry {
                ip: "192.168.0.1".into(),
                cidr: Some(24),
                ip2: "192.168.0.2".into(),
                cidr2: Some(24),
                ..Default::default()
            },
            expect_members: vec!["192.168.0.0/24,192.168.0.0/24"],
            expect_entries: vec![Entry {
                ip: "192.168.0.0".into(),
                cidr: Some(24),
                ip2: "192.168.0.0".into(),
                cidr2: Some(24),
                ..Default::default()
            }],
        },
        AddDelCase {
            set: IPSet::new("TestAddDelHashIPPort", SetType::HashIpPort),
            entry: Entry {
                ip: "192.168.0.1".into(),
                port: 34,
                ..Default::default()
            },
            expect_members: vec!["192.168.0.1,tcp:34"],
            expect_entries: vec![Entry {
                ip: "192.168.0.1".into(),
                port: 34,
                proto: tcp,
                ..Default::default()
            }],
        },
        AddDelCase {
            set: IPSet::new("TestAddDelHashIPPort-Range", SetType::HashIpPort),
            entry: Entry {
                ip: "192.168.0.1".into(),
                port: 34,
                port_to: 35,
                proto: udp,
                ..Default::default()
            },
            expect_members: vec!["192.168.0.1,udp:34", "192.168.0.1,udp:35"],
            expect_entries: vec![
                Entry {
                    ip: "192.168.0.1".into(),
                    port: 34,
                    proto: udp,
                    ..Default::default()
                },
                Entry {
                    ip: "192.168.0.1".into(),
                    port: 35,
                    proto: udp,
                    ..Default::default()
                },
            ],
        },
        AddDelCase {
            set: IPSet::new("TestAddDelHashNetPort", SetType::HashNetPort),
            entry: Entry {
                ip: "192.168.0.1".into(),
                cidr: Some(24),
                port: 34,
                proto: udp,
                ..Default::default()
            },
            expect_members: vec!["192.168.0.0/24,udp:34"],
            expect_entries: vec![Entry {
                ip: "192.168.0.0".into(),
                cidr: Some(24),
                port: 34,
                proto: udp,
                ..Default::default()
            }],
        },
        AddDelCase {
            set: IPSet::new("TestAddDelHashIPPortIP", SetType::HashIpPortIp),
            entry: Entry {
                ip: "192.168.0.1".into(),
                port: 34,
                proto: udp,
                ip2: "192.168.0.2".into(),
                ..Default::default()
            },
            expect_members: vec!["192.168.0.1,udp:34,192.168.0.2"],
            expect_entries: vec![Entry {
                ip: "192.168.0.1".into(),
                port: 34,
                proto: udp,
                ip2: "192.168.0.2".into(),
                ..Default::default()
            }],
        },
        AddDelCase {
            set: IPSet::new("TestAddDelHashIPPortNet", SetType::HashIpPortNet),
            entry: Entry {
                ip: "192.168.0.1".into(),
                port: 34,
                proto: udp,
                ip2: "192.168.1.2".into(),
                cidr2: Some(24),
                ..Default::default()
            },
            expect_members: vec!["192.168.0.1,udp:34,192.168.1.0/24"],
            expect_entries: vec![Entry {
                ip: "192.168.0.1".into(),
                port: 34,
                proto: udp,
                ip2: "192.168.1.0".into(),
                cidr2: Some(24),
                ..Default::default()
            }],
        },
        AddDelCase {
            set: IPSet::new("TestAddDelHashNetPortNet", SetType::HashNetPortNet),
            entry: Entry {
                ip: "192.168.0.1".into(),
                cidr: Some(24),
                port: 34,
                proto: udp,
                ip2: "192.168.1.2".into(),
                cidr2: Some(24),
                ..Default::default()
            },
            expect_members: vec!["192.168.0.0/24,udp:34,192.168.1.0/24"],
            expect_entries: vec![Entry {
                ip: "192.168.0.0".into(),
                cidr: Some(24),
                port: 34,
                proto: udp,
                ip2: "192.168.1.0".into(),
                cidr2: Some(24),
                ..Default::default()
            }],
        },
    ];
    for case in cases {
        if let Err(err) = handle.create(&case.set) {
            assert!(skippable(&err), "create {} failed: {}", case.set.set_type, err);
            eprintln!("skip set type {}: {}", case.set.set_type, err);
            continue;
        }
        handle.add(&case.set, &case.entry).unwrap();

        let mut members = list_members(&case.set.name).unwrap();
        members.sort();
        let mut expect_members: Vec<String> =
            case.expect_members.iter().map(|s| s.to_string()).collect();
        expect_members.sort();
        assert_eq!(members, expect_members, "case {}", case.set.name);

        let items = handle.list(&case.set.name).unwrap();
        assert_eq!(items.len(), 1, "case {}", case.set.name);
        let mut got = items[0].entries.clone();
        sort_entries(&mut got);
        let mut expect = case.expect_entries.clone();
        sort_entries(&mut expect);
        assert_eq!(got, expect, "case {}", case.set.name);

        handle.del(&case.set, &case.entry).unwrap();
        handle.destroy(&case.set.name).unwrap();
    }
}
