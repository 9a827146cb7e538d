//! A toot summarizing the health of a host.

use std::fmt::Write;

use tracing::{debug, error};

use crate::error::Result;
use crate::nodeexporter::NodeMetrics;
use crate::store::Store;

pub(crate) const APP_NAME: &str = "nodemetrics";

const SYSTEM_TIME: &str = "systemTime";
const NETWORK_RX: &str = "networkRx";
const NETWORK_TX: &str = "networkTx";

/// `1536` -> `1 KiB`. Truncates rather than rounds.
pub(crate) fn si_bytes(mut n: u64) -> String {
    const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    let mut unit = 0;
    while n >= 1024 && unit < UNITS.len() - 1 {
        n /= 1024;
        unit += 1;
    }
    format!("{n} {}", UNITS[unit])
}

/// What the previous run saw, to turn counters into rates.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Observation {
    pub system_time: u64,
    pub network_rx: u64,
    pub network_tx: u64,
}

impl Observation {
    pub fn of(m: &NodeMetrics) -> Self {
        Self {
            system_time: m.time_seconds,
            network_rx: m.network_receive_bytes,
            network_tx: m.network_transmit_bytes,
        }
    }

    /// The last saved observation. All zero when there is none.
    pub fn load(store: &Store, instance: &str) -> Result<Self> {
        let Some(system_time) = store.get_value(instance, APP_NAME, SYSTEM_TIME)? else {
            return Ok(Self::default());
        };
        let counter = |key: &str| -> Result<u64> {
            Ok(store
                .get_value(instance, APP_NAME, key)?
                .and_then(|v| v.parse().ok())
                .unwrap_or_default())
        };
        Ok(Self {
            system_time: system_time.parse().unwrap_or_default(),
            network_rx: counter(NETWORK_RX)?,
            network_tx: counter(NETWORK_TX)?,
        })
    }

    /// Failures are logged: the toot is already out by now.
    pub fn save(&self, store: &Store, instance: &str) {
        for (key, value) in [
            (SYSTEM_TIME, self.system_time),
            (NETWORK_RX, self.network_rx),
            (NETWORK_TX, self.network_tx),
        ] {
            if let Err(e) = store.set_value(instance, APP_NAME, key, &value.to_string()) {
                error!(key, error = %e, "failed to save node metrics state");
            }
        }
    }

    /// Bytes per second received and transmitted since `prev`, if the
    /// counters only went up.
    fn rates_since(&self, prev: &Observation) -> Option<(u64, u64)> {
        if prev.system_time == 0 {
            return None;
        }
        let elapsed = self.system_time.checked_sub(prev.system_time)?;
        let rx = self.network_rx.checked_sub(prev.network_rx)?;
        let tx = self.network_tx.checked_sub(prev.network_tx)?;
        if elapsed == 0 {
            return None;
        }
        let per_second = |bytes: u64| (bytes as f64 / elapsed as f64).round() as u64;
        Some((per_second(rx), per_second(tx)))
    }
}

pub(crate) fn render(m: &NodeMetrics, prev: &Observation) -> String {
    let mut text = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(text, "{}", m.hostname);
    if !m.kernel.is_empty() {
        let _ = writeln!(text, "Kernel: {}", m.kernel);
    }
    let _ = writeln!(text, "Load: {:.2} {:.2} {:.2}", m.load1, m.load5, m.load15);
    let _ = writeln!(
        text,
        "RAM: {} of {} free",
        si_bytes(m.memory_free_bytes),
        si_bytes(m.memory_total_bytes)
    );
    let _ = writeln!(
        text,
        "SWAP: {} of {} free",
        si_bytes(m.memory_swap_free_bytes),
        si_bytes(m.memory_swap_total_bytes)
    );
    let _ = writeln!(
        text,
        "Root FS: {} of {} available",
        si_bytes(m.filesystem_avail_bytes),
        si_bytes(m.filesystem_size_bytes)
    );
    match Observation::of(m).rates_since(prev) {
        Some((rx, tx)) => {
            let _ = writeln!(text, "Network I/O: {}ps | {}ps", si_bytes(rx), si_bytes(tx));
        }
        None => debug!(?prev, "no usable previous observation, skipping network rates"),
    }
    let _ = write!(text, "Uptime: {}", m.uptime());
    text
}
