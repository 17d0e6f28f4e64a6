//! WireGuard client config validation and repair
//!
//! The upstream panel occasionally hands back a server-oriented config.
//! That text must never be delivered to an end user as their personal
//! client config, so the check is deliberately asymmetric: client markers
//! must be present AND server-only directives must be absent.

/// Directives that only appear in server-side configs
const SERVER_DIRECTIVES: &[&str] = &["ListenPort", "PostUp", "PostDown", "SaveConfig"];

/// Optional lines inserted when missing
#[derive(Debug, Clone, Default)]
pub struct NormalizeOptions {
    pub endpoint: Option<String>,
    pub allowed_ips: Option<String>,
    pub dns: Option<String>,
}

/// True iff the text looks like a WireGuard *client* config: an interface
/// section with a private key, a peer section with a public key, and none
/// of the server-only directives anywhere.
pub fn is_client_config(text: &str) -> bool {
    if text.trim().is_empty() {
        return false;
    }
    if !text.contains("[Interface]") || !text.contains("[Peer]") {
        return false;
    }

    let mut section = Section::None;
    let mut interface_private_key = false;
    let mut peer_public_key = false;

    for line in text.lines() {
        if let Some(s) = parse_section_header(line) {
            section = s;
            continue;
        }
        let Some(key) = assignment_key(line) else {
            continue;
        };
        if SERVER_DIRECTIVES.contains(&key) {
            return false;
        }
        match section {
            Section::Interface if key == "PrivateKey" => interface_private_key = true,
            Section::Peer if key == "PublicKey" => peer_public_key = true,
            _ => {}
        }
    }

    interface_private_key && peer_public_key
}

/// Validate and repair a downloaded client config.
///
/// Rejects non-client text. Preserves line order and content; inserts
/// Endpoint/AllowedIPs into the peer section and DNS into the interface
/// section when supplied and missing. Output ends with exactly one newline.
pub fn normalize(raw: &str, options: &NormalizeOptions) -> Option<String> {
    let config = raw.trim();
    if config.is_empty() || !is_client_config(config) {
        return None;
    }

    let mut lines: Vec<String> = Vec::new();
    let mut section = Section::None;
    let mut has_dns = false;
    let mut has_allowed_ips = false;
    let mut has_endpoint = false;

    for line in config.lines() {
        if let Some(s) = parse_section_header(line) {
            section = s;
            lines.push(
                match s {
                    Section::Interface => "[Interface]",
                    Section::Peer => "[Peer]",
                    Section::None => unreachable!(),
                }
                .to_string(),
            );
            continue;
        }
        if let Some(key) = assignment_key(line) {
            match section {
                Section::Interface if key == "DNS" => has_dns = true,
                Section::Peer if key == "AllowedIPs" => has_allowed_ips = true,
                Section::Peer if key == "Endpoint" => has_endpoint = true,
                _ => {}
            }
        }
        lines.push(line.to_string());
    }

    let endpoint = options.endpoint.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let allowed_ips = options.allowed_ips.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let dns = options.dns.as_deref().map(str::trim).filter(|s| !s.is_empty());

    if let Some(endpoint) = endpoint {
        if !has_endpoint {
            if let Some(pos) = lines.iter().position(|l| l.trim() == "[Peer]") {
                lines.insert(pos + 1, format!("Endpoint = {}", endpoint));
                has_endpoint = true;
            }
        }
    }

    if let Some(allowed_ips) = allowed_ips {
        if !has_allowed_ips {
            if let Some(pos) = lines.iter().position(|l| l.trim() == "[Peer]") {
                let insert_at = if has_endpoint { pos + 2 } else { pos + 1 };
                lines.insert(insert_at, format!("AllowedIPs = {}", allowed_ips));
            }
        }
    }

    if let Some(dns) = dns {
        if !has_dns {
            if let Some(pos) = lines.iter().position(|l| l.trim() == "[Interface]") {
                lines.insert(pos + 1, format!("DNS = {}", dns));
            }
        }
    }

    Some(format!("{}\n", lines.join("\n").trim()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Interface,
    Peer,
}

fn parse_section_header(line: &str) -> Option<Section> {
    match line.trim() {
        "[Interface]" => Some(Section::Interface),
        "[Peer]" => Some(Section::Peer),
        _ => None,
    }
}

/// The key of a `Key = value` assignment line, if any
fn assignment_key(line: &str) -> Option<&str> {
    let (key, _value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}
