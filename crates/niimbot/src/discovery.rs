//! Time-boxed scan for Niimbot printers.

use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::lock::normalize_device_id;
use crate::protocol::ModelProfile;
use crate::transport::{Advertisement, Transport};

/// Advertised-name prefixes of supported printers.
pub const NAME_PREFIXES: &[&str] = &["B1", "B21", "D11", "D110", "Niimbot"];

/// A printer seen during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub name: String,
    pub address: String,
    /// Strongest RSSI observed, in dBm.
    pub signal_strength: i16,
    /// Model identifier inferred from the name, when it maps to a known profile.
    pub model: Option<&'static str>,
}

/// Discovery over a transport. Every call re-scans from zero.
pub struct Discovery<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
}

impl<'a, T: Transport + ?Sized> Discovery<'a, T> {
    pub fn new(transport: &'a mut T) -> Self {
        Self { transport }
    }

    /// Scan for `timeout` and return printers strongest-first, one per address.
    ///
    /// Finding nothing is not an error.
    pub async fn discover(&mut self, timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
        self.discover_until(timeout, &CancellationToken::new()).await
    }

    /// Like [`discover`](Self::discover), but stops early when `cancel` fires,
    /// returning what was seen so far.
    pub async fn discover_until(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredDevice>> {
        let mut adverts = self.transport.scan(timeout).await?;
        let mut found: HashMap<String, DiscoveredDevice> = HashMap::new();

        loop {
            let advert = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = adverts.next() => match next {
                    Some(advert) => advert,
                    None => break,
                },
            };
            let Some(device) = to_printer(advert) else {
                continue;
            };
            let key = normalize_device_id(&device.address);
            match found.get_mut(&key) {
                Some(existing) if existing.signal_strength >= device.signal_strength => {}
                Some(existing) => {
                    tracing::trace!(address = %device.address, rssi = device.signal_strength, "Stronger signal");
                    *existing = device;
                }
                None => {
                    tracing::info!(name = %device.name, address = %device.address, "Found printer");
                    found.insert(key, device);
                }
            }
        }

        let mut devices: Vec<_> = found.into_values().collect();
        devices.sort_by(|a, b| {
            b.signal_strength
                .cmp(&a.signal_strength)
                .then_with(|| a.address.cmp(&b.address))
        });
        tracing::info!(count = devices.len(), "Discovery complete");
        Ok(devices)
    }
}

fn matches_known_prefix(name: &str) -> bool {
    let upper = name.trim().to_ascii_uppercase();
    NAME_PREFIXES
        .iter()
        .any(|prefix| upper.starts_with(&prefix.to_ascii_uppercase()))
}

fn to_printer(advert: Advertisement) -> Option<DiscoveredDevice> {
    let name = advert.name?;
    if !matches_known_prefix(&name) {
        return None;
    }
    Some(DiscoveredDevice {
        model: ModelProfile::infer_from_device_name(&name),
        name,
        address: advert.address,
        signal_strength: advert.rssi.unwrap_or(i16::MIN),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;

    fn advert(name: Option<&str>, address: &str, rssi: Option<i16>) -> Advertisement {
        Advertisement {
            name: name.map(str::to_string),
            address: address.to_string(),
            rssi,
        }
    }

    fn fake_with(adverts: Vec<Advertisement>) -> FakeTransport {
        let mut fake = FakeTransport::new(|_| Vec::new());
        fake.advertisements = adverts;
        fake
    }

    #[tokio::test]
    async fn dedups_by_address_keeping_strongest() {
        let mut fake = fake_with(vec![
            advert(Some("B1-H8131"), "AA:BB:CC:DD:EE:01", Some(-80)),
            advert(Some("D110-F2"), "AA:BB:CC:DD:EE:02", Some(-70)),
            advert(Some("B1-H8131"), "aa:bb:cc:dd:ee:01", Some(-50)),
            advert(Some("B1-H8131"), "AA:BB:CC:DD:EE:01", Some(-90)),
        ]);

        let devices = Discovery::new(&mut fake)
            .discover(Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "B1-H8131");
        assert_eq!(devices[0].signal_strength, -50);
        assert_eq!(devices[0].model, Some("b1"));
        assert_eq!(devices[1].address, "AA:BB:CC:DD:EE:02");
        assert_eq!(devices[1].model, Some("d110"));
    }

    #[tokio::test]
    async fn filters_unknown_and_unnamed_devices() {
        let mut fake = fake_with(vec![
            advert(Some("JBL Flip"), "11:11:11:11:11:11", Some(-30)),
            advert(None, "22:22:22:22:22:22", Some(-40)),
            advert(Some("niimbot-x"), "33:33:33:33:33:33", None),
            advert(Some("B21-C2B"), "44:44:44:44:44:44", Some(-60)),
        ]);

        let devices = Discovery::new(&mut fake)
            .discover(Duration::from_secs(5))
            .await
            .unwrap();

        let names: Vec<_> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["B21-C2B", "niimbot-x"]);
        assert_eq!(devices[0].model, None);
        assert_eq!(devices[1].signal_strength, i16::MIN);
    }

    #[tokio::test]
    async fn empty_scan_is_not_an_error() {
        let mut fake = fake_with(Vec::new());
        let devices = Discovery::new(&mut fake)
            .discover(Duration::from_secs(1))
            .await
            .unwrap();
        assert!(devices.is_empty());
    }

    #[tokio::test]
    async fn each_call_rescans() {
        let mut fake = fake_with(vec![advert(Some("B1"), "AA:AA:AA:AA:AA:AA", Some(-40))]);
        let log = fake.log();
        let mut discovery = Discovery::new(&mut fake);
        discovery.discover(Duration::from_secs(1)).await.unwrap();
        discovery.discover(Duration::from_secs(1)).await.unwrap();
        assert_eq!(log.lock().unwrap().scans, 2);
    }

    #[tokio::test]
    async fn cancelled_discovery_returns_early() {
        let mut fake = fake_with(vec![advert(Some("B1"), "AA:AA:AA:AA:AA:AA", Some(-40))]);
        let token = CancellationToken::new();
        token.cancel();
        let devices = Discovery::new(&mut fake)
            .discover_until(Duration::from_secs(1), &token)
            .await
            .unwrap();
        assert!(devices.is_empty());
    }
}
