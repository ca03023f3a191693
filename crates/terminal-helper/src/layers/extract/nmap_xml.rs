use protocol::{Host, ScanSummary};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Parses an nmap XML report.
///
/// Hosts are the root's direct `<host>` children. For each host the first
/// `address` with `addrtype="ipv4"` / `addrtype="mac"` supplies `ip` / `mac`,
/// and every non-empty `hostnames/hostname@name` is kept in document order.
pub(crate) fn parse_nmap_xml(xml: &str) -> anyhow::Result<ScanSummary> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut current: Option<Host> = None;
    let mut hosts = Vec::new();
    let mut saw_root = false;

    loop {
        match reader.read_event()? {
            Event::Start(element) => {
                path.push(element.name().as_ref().to_vec());
                saw_root = true;
                visit_element(&path, &element, &mut current)?;
            }
            Event::Empty(element) => {
                path.push(element.name().as_ref().to_vec());
                saw_root = true;
                visit_element(&path, &element, &mut current)?;
                close_element(&path, &mut current, &mut hosts);
                path.pop();
            }
            Event::End(_) => {
                close_element(&path, &mut current, &mut hosts);
                path.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        anyhow::bail!("document has no root element");
    }
    if !path.is_empty() {
        anyhow::bail!("document ended inside <{}>", String::from_utf8_lossy(&path[path.len() - 1]));
    }
    Ok(ScanSummary { hosts })
}

fn visit_element(
    path: &[Vec<u8>],
    element: &BytesStart<'_>,
    current: &mut Option<Host>,
) -> anyhow::Result<()> {
    match path {
        [_, host] if host.as_slice() == b"host" => {
            *current = Some(Host::default());
        }
        [_, host, address] if host.as_slice() == b"host" && address.as_slice() == b"address" => {
            let Some(entry) = current.as_mut() else {
                return Ok(());
            };
            let addrtype = attribute(element, b"addrtype")?;
            let addr = attribute(element, b"addr")?;
            match addrtype.as_deref() {
                Some("ipv4") if entry.ip.is_none() => entry.ip = addr,
                Some("mac") if entry.mac.is_none() => entry.mac = addr,
                _ => {}
            }
        }
        [_, host, hostnames, hostname]
            if host.as_slice() == b"host"
                && hostnames.as_slice() == b"hostnames"
                && hostname.as_slice() == b"hostname" =>
        {
            let Some(entry) = current.as_mut() else {
                return Ok(());
            };
            if let Some(name) = attribute(element, b"name")?.filter(|name| !name.is_empty()) {
                entry.hostnames.push(name);
            }
        }
        _ => {}
    }
    Ok(())
}

fn close_element(path: &[Vec<u8>], current: &mut Option<Host>, hosts: &mut Vec<Host>) {
    if let [_, host] = path {
        if host.as_slice() == b"host" {
            if let Some(entry) = current.take() {
                hosts.push(entry);
            }
        }
    }
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> anyhow::Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWEEP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" args="nmap -sn 192.168.1.0/24">
  <host>
    <status state="up"/>
    <address addr="192.168.1.1" addrtype="ipv4"/>
    <address addr="AA:BB:CC:DD:EE:FF" addrtype="mac" vendor="Acme"/>
    <hostnames>
      <hostname name="router.lan" type="PTR"/>
      <hostname name="gateway" type="user"/>
      <hostname name="" type="PTR"/>
    </hostnames>
  </host>
  <host>
    <address addr="192.168.1.20" addrtype="ipv4"/>
    <hostnames/>
  </host>
  <host>
    <address addr="fe80::1" addrtype="ipv6"/>
  </host>
  <runstats><finished time="1"/></runstats>
</nmaprun>
"#;

    #[test]
    fn parses_addresses_and_hostnames_in_order() {
        let summary = parse_nmap_xml(SWEEP).expect("parse");
        assert_eq!(summary.hosts.len(), 3);

        let first = &summary.hosts[0];
        assert_eq!(first.ip.as_deref(), Some("192.168.1.1"));
        assert_eq!(first.mac.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(first.hostnames, vec!["router.lan", "gateway"]);

        let second = &summary.hosts[1];
        assert_eq!(second.ip.as_deref(), Some("192.168.1.20"));
        assert_eq!(second.mac, None);
        assert!(second.hostnames.is_empty());

        let third = &summary.hosts[2];
        assert_eq!(third.ip, None);
        assert_eq!(third.mac, None);
    }

    #[test]
    fn ignores_nested_host_elements() {
        let xml = r#"<nmaprun><prescript><host><address addr="1.1.1.1" addrtype="ipv4"/></host></prescript></nmaprun>"#;
        let summary = parse_nmap_xml(xml).expect("parse");
        assert!(summary.hosts.is_empty());
    }

    #[test]
    fn rejects_truncated_document() {
        let xml = r#"<nmaprun><host><address addr="1.1.1.1" addrtype="ipv4"/>"#;
        assert!(parse_nmap_xml(xml).is_err());
    }

    #[test]
    fn rejects_mismatched_tags() {
        assert!(parse_nmap_xml("<nmaprun><host></hosts></nmaprun>").is_err());
    }

    #[test]
    fn rejects_empty_input() {
        assert!(parse_nmap_xml("   ").is_err());
    }
}
