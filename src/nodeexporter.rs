//! Scraping a Prometheus `node_exporter`.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::header::ACCEPT;

use crate::client::Http;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

/// One sample line of the text exposition format.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Sample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

impl Sample {
    fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

/// Parses the Prometheus text format. Comment lines (`# HELP`, `# TYPE`)
/// and timestamps are skipped.
pub(crate) fn parse(text: &str) -> Result<Vec<Sample>> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(i, line)| parse_line(line).with_context(|| format!("metrics line {}", i + 1)))
        .collect()
}

fn parse_line(line: &str) -> Result<Sample> {
    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .ok_or_else(|| anyhow!("no value in {line:?}"))?;
    let name = line[..name_end].to_string();
    let mut rest = &line[name_end..];

    let mut labels = BTreeMap::new();
    if let Some(inner) = rest.strip_prefix('{') {
        rest = parse_labels(inner, &mut labels)?;
    }

    let value = rest
        .split_whitespace()
        .next()
        .ok_or_else(|| anyhow!("no value for {name}"))?;
    let value = match value {
        "+Inf" => f64::INFINITY,
        "-Inf" => f64::NEG_INFINITY,
        v => v
            .parse()
            .with_context(|| format!("bad value {v:?} for {name}"))?,
    };
    Ok(Sample {
        name,
        labels,
        value,
    })
}

/// Consumes `key="value",...}` and returns what follows the closing brace.
fn parse_labels<'a>(mut s: &'a str, labels: &mut BTreeMap<String, String>) -> Result<&'a str> {
    loop {
        s = s.trim_start_matches([' ', ',']);
        if let Some(rest) = s.strip_prefix('}') {
            return Ok(rest);
        }
        let (key, after) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("label without value"))?;
        let mut chars = after
            .strip_prefix('"')
            .ok_or_else(|| anyhow!("unquoted label value for {key}"))?
            .char_indices();
        let mut value = String::new();
        let end = loop {
            match chars.next() {
                Some((_, '\\')) => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, c)) => value.push(c),
                    None => bail!("unterminated label value for {key}"),
                },
                Some((i, '"')) => break i,
                Some((_, c)) => value.push(c),
                None => bail!("unterminated label value for {key}"),
            }
        };
        labels.insert(key.trim().to_string(), value);
        s = &after[1 + end + 1..];
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct NodeMetrics {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
    pub filesystem_avail_bytes: u64,
    pub filesystem_size_bytes: u64,
    pub memory_free_bytes: u64,
    pub memory_total_bytes: u64,
    pub memory_swap_free_bytes: u64,
    pub memory_swap_total_bytes: u64,
    pub boot_time_seconds: u64,
    pub time_seconds: u64,
    pub network_receive_bytes: u64,
    pub network_transmit_bytes: u64,
    pub hostname: String,
    pub kernel: String,
}

fn is_virtual_device(device: &str) -> bool {
    ["br-", "docker", "lo", "veth"]
        .iter()
        .any(|prefix| device.starts_with(prefix))
}

impl NodeMetrics {
    pub fn from_samples(samples: &[Sample]) -> Self {
        let first = |name: &str| samples.iter().find(|s| s.name == name).map(|s| s.value);
        let gauge = |name: &str| first(name).unwrap_or_default();
        let bytes = |name: &str| gauge(name) as u64;
        let root_fs = |name: &str| {
            samples
                .iter()
                .find(|s| s.name == name && s.label("mountpoint").map_or(true, |m| m == "/"))
                .map_or(0, |s| s.value as u64)
        };
        let network = |name: &str| {
            samples
                .iter()
                .find(|s| s.name == name && !s.label("device").is_some_and(is_virtual_device))
                .map_or(0, |s| s.value as u64)
        };

        let mut m = NodeMetrics {
            load1: gauge("node_load1"),
            load5: gauge("node_load5"),
            load15: gauge("node_load15"),
            filesystem_avail_bytes: root_fs("node_filesystem_avail_bytes"),
            filesystem_size_bytes: root_fs("node_filesystem_size_bytes"),
            memory_free_bytes: bytes("node_memory_MemFree_bytes"),
            memory_total_bytes: bytes("node_memory_MemTotal_bytes"),
            memory_swap_free_bytes: bytes("node_memory_SwapFree_bytes"),
            memory_swap_total_bytes: bytes("node_memory_SwapTotal_bytes"),
            boot_time_seconds: bytes("node_boot_time_seconds"),
            time_seconds: bytes("node_time_seconds"),
            network_receive_bytes: network("node_network_receive_bytes_total"),
            network_transmit_bytes: network("node_network_transmit_bytes_total"),
            ..Default::default()
        };
        for sample in samples.iter().filter(|s| s.name == "node_uname_info") {
            if let Some(nodename) = sample.label("nodename") {
                m.hostname = nodename.to_string();
            }
            if let Some(release) = sample.label("release") {
                m.kernel = release.to_string();
            }
        }
        m
    }

    /// `26h3m4s` style below two days, fractional days above.
    pub fn uptime(&self) -> String {
        let secs = self.time_seconds.saturating_sub(self.boot_time_seconds);
        if secs < 48 * 3600 {
            let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
            if h > 0 {
                format!("{h}h{m}m{s}s")
            } else if m > 0 {
                format!("{m}m{s}s")
            } else {
                format!("{s}s")
            }
        } else {
            format!("{:.1}d", secs as f64 / 86400.0)
        }
    }
}

pub(crate) fn scrape(http: &Http, url: &str) -> Result<NodeMetrics> {
    let text = http
        .send(http.client().get(url).header(ACCEPT, TEXT_FORMAT))
        .with_context(|| format!("cannot scrape {url}"))?
        .error_for_status()
        .with_context(|| format!("cannot scrape {url}"))?
        .text()
        .context("metrics body is not text")?;
    Ok(NodeMetrics::from_samples(&parse(&text)?))
}
