use ipset::{Entry, Handle, IPSet, SetType};

fn main() {
    let handle = Handle::new().unwrap();
    println!("protocol {}", handle.protocol());

    let set = IPSet::new("test", SetType::HashIp);
    handle.create(&set).unwrap();

    let entry = Entry {
        ip: "192.168.3.2".to_string(),
        ..Default::default()
    };
    handle.add(&set, &entry).unwrap();
    for item in handle.list("test").unwrap() {
        for entry in &item.entries {
            println!("{}", entry.ip);
        }
    }

    handle.del(&set, &entry).unwrap();
    let items = handle.list("test").unwrap();
    for item in items {
        println!("after delete: {} entries", item.entries.len());
    }
    handle.destroy("test").unwrap();
}
