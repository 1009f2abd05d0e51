//! Process-wide configuration: `<config_dir>/janus.plugin.nosip.cfg` (§6.4).
//!
//! The file uses the source plugin's own INI-ish grammar (`[section]` headers,
//! `key = value` lines, `;`/`#` comments) rather than the teacher's TOML, since
//! TOML can't express this grammar without changing the on-disk format the
//! rest of the ecosystem around this plugin already expects.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Default minimum of the RTP port range, mirroring the source plugin.
pub const DEFAULT_RTP_RANGE_MIN: u16 = 10000;
/// Default maximum of the RTP port range, mirroring the source plugin.
pub const DEFAULT_RTP_RANGE_MAX: u16 = 60000;

/// Process-wide configuration (§3, §6.4).
#[derive(Debug, Clone)]
pub struct Config {
    /// Local bind address for allocated RTP/RTCP sockets and for `c=` lines
    /// written into host-facing SDP.
    pub local_ip: IpAddr,
    /// Inclusive RTP port range; `min <= max` is enforced at load time.
    pub rtp_range_min: u16,
    pub rtp_range_max: u16,
    /// Whether `notify_event` callbacks should fire (§6.1).
    pub notify_events: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            local_ip: IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            rtp_range_min: DEFAULT_RTP_RANGE_MIN,
            rtp_range_max: DEFAULT_RTP_RANGE_MAX,
            notify_events: true,
        }
    }
}

impl Config {
    /// Path of the config file under a host-supplied config directory.
    pub fn config_path(config_dir: &Path) -> PathBuf {
        config_dir.join("janus.plugin.nosip.cfg")
    }

    /// Load configuration from `<config_dir>/janus.plugin.nosip.cfg`.
    ///
    /// A missing file is not an error: the source plugin runs fine with
    /// compiled-in defaults, so we do too.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = Self::config_path(config_dir);
        if !path.exists() {
            tracing::info!(path = %path.display(), "no nosip config file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Parse the `[general]` section out of INI-ish config text.
    fn parse(content: &str) -> Result<Self> {
        let general = parse_ini(content).remove("general").unwrap_or_default();

        let mut config = Config::default();

        if let Some(ip) = general.get("local_ip") {
            config.local_ip = resolve_local_ip(ip)
                .with_context(|| format!("local_ip '{}' is not a local interface address", ip))?;
        }

        if let Some(range) = general.get("rtp_port_range") {
            let (min, max) = parse_port_range(range)
                .with_context(|| format!("invalid rtp_port_range '{}'", range))?;
            config.rtp_range_min = min;
            config.rtp_range_max = max;
        }

        if let Some(events) = general.get("events") {
            config.notify_events = parse_bool(events)
                .with_context(|| format!("invalid boolean for events: '{}'", events))?;
        }

        Ok(config)
    }
}

/// Parse `min-max`, normalising a reversed range and treating `max == 0` as
/// "up to 65535" per §6.4.
fn parse_port_range(s: &str) -> Result<(u16, u16)> {
    let (min_s, max_s) = s
        .split_once('-')
        .context("expected 'min-max' format")?;
    let mut min: u16 = min_s.trim().parse().context("bad range minimum")?;
    let mut max: u16 = max_s.trim().parse().context("bad range maximum")?;
    if max == 0 {
        max = u16::MAX;
    }
    if min > max {
        std::mem::swap(&mut min, &mut max);
    }
    Ok((min, max))
}

fn parse_bool(s: &str) -> Result<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" | "on" => Ok(true),
        "no" | "false" | "0" | "off" => Ok(false),
        other => bail!("not a boolean: '{}'", other),
    }
}

/// Verify `ip` names one of this host's interface addresses and parse it.
fn resolve_local_ip(ip: &str) -> Result<IpAddr> {
    let parsed: IpAddr = ip.trim().parse().context("not an IP address")?;
    let interfaces = local_interface_addrs().unwrap_or_default();
    if interfaces.is_empty() || interfaces.contains(&parsed) {
        Ok(parsed)
    } else {
        bail!("address is not bound to any local interface");
    }
}

/// Best-effort enumeration of this host's own addresses, used only to
/// sanity-check `local_ip`. `std` has no interface-listing API, so this binds
/// a UDP socket to a public address and reads back the local endpoint chosen
/// by the routing table — enough to validate the common case.
fn local_interface_addrs() -> Result<Vec<IpAddr>> {
    use std::net::UdpSocket;
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    let mut addrs = vec![IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)];
    if socket.connect("8.8.8.8:80").is_ok() {
        if let Ok(local) = socket.local_addr() {
            addrs.push(local.ip());
        }
    }
    Ok(addrs)
}

/// Minimal `[section]` / `key = value` reader; no ecosystem INI crate is in
/// the teacher's dependency stack and `toml` doesn't model this grammar.
fn parse_ini(content: &str) -> HashMap<String, HashMap<String, String>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current = String::from("general");

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            current = name.trim().to_string();
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            sections
                .entry(current.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_missing() {
        let config = Config::load(Path::new("/nonexistent/path/nosip-test")).unwrap();
        assert_eq!(config.rtp_range_min, DEFAULT_RTP_RANGE_MIN);
        assert_eq!(config.rtp_range_max, DEFAULT_RTP_RANGE_MAX);
        assert!(config.notify_events);
    }

    #[test]
    fn parses_general_section() {
        let text = "[general]\nlocal_ip = 127.0.0.1\nrtp_port_range = 20000-20100\nevents = no\n";
        let config = Config::parse(text).unwrap();
        assert_eq!(config.local_ip, IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
        assert_eq!(config.rtp_range_min, 20000);
        assert_eq!(config.rtp_range_max, 20100);
        assert!(!config.notify_events);
    }

    #[test]
    fn normalises_reversed_range() {
        assert_eq!(parse_port_range("50-10").unwrap(), (10, 50));
    }

    #[test]
    fn zero_max_means_65535() {
        assert_eq!(parse_port_range("10000-0").unwrap(), (10000, 65535));
    }

    #[test]
    fn rejects_malformed_range() {
        assert!(parse_port_range("not-a-range").is_err());
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let text = "; comment\n\n[general]\n# also a comment\nevents = yes\n";
        let config = Config::parse(text).unwrap();
        assert!(config.notify_events);
    }
}
