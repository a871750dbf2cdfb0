//! BLE transport using btleplug.
//!
//! Provides scanning, connecting, chunked writes and notification reads for
//! Niimbot printers. Both families expose a single characteristic that
//! accepts writes and emits notifications.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream};
use futures::{FutureExt, StreamExt};
use uuid::Uuid;

use crate::lock::normalize_device_id;
use crate::transport::{Advertisement, Transport};
use crate::{ConnectionError, NiimbotError, Result};

/// Write + notify characteristic shared by the B1 and D110 families.
pub const PRINTER_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0xbef8d6c9_9c21_4c9e_b632_bd58c1009f9f);

/// Largest write sent in one GATT operation (185 MTU - 3).
const DEFAULT_CHUNK_SIZE: usize = 182;

/// Delay between BLE write chunks of one packet.
const CHUNK_WRITE_DELAY: Duration = Duration::from_millis(20);

/// Pause after each packet so the printer can digest it.
const PACKET_WRITE_DELAY: Duration = Duration::from_millis(10);

/// Adapter init attempts while CoreBluetooth powers up, and the pause between them.
const ADAPTER_RETRY_COUNT: usize = 6;
const ADAPTER_RETRY_DELAY: Duration = Duration::from_millis(500);

type Notifications = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// Manages a BLE connection to a single label printer.
pub struct BleConnection {
    adapter: Adapter,
    peripheral: Option<Peripheral>,
    characteristic: Option<Characteristic>,
    notifications: Option<Notifications>,
    chunk_size: usize,
}

impl BleConnection {
    /// Create a new BLE connection manager.
    ///
    /// Initializes the platform BLE adapter (first available), retrying while
    /// the OS Bluetooth stack is still powering up.
    pub async fn new() -> Result<Self> {
        let mut attempt = 0;
        loop {
            match Self::init_adapter().await {
                Ok(adapter) => {
                    return Ok(Self {
                        adapter,
                        peripheral: None,
                        characteristic: None,
                        notifications: None,
                        chunk_size: DEFAULT_CHUNK_SIZE,
                    });
                }
                Err(err) if attempt + 1 < ADAPTER_RETRY_COUNT && adapter_powering_up(&err) => {
                    attempt += 1;
                    tracing::debug!(attempt, error = %err, "BLE adapter not ready, retrying");
                    tokio::time::sleep(ADAPTER_RETRY_DELAY).await;
                }
                Err(err) => return Err(with_permission_hint(err)),
            }
        }
    }

    async fn init_adapter() -> Result<Adapter> {
        let manager = Manager::new()
            .await
            .map_err(|e| NiimbotError::Adapter(e.to_string()))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| NiimbotError::Adapter(e.to_string()))?;

        adapters
            .into_iter()
            .next()
            .ok_or_else(|| NiimbotError::Adapter("No BLE adapter found".into()))
    }

    /// Check whether a printer link is fully set up.
    pub fn is_connected(&self) -> bool {
        self.peripheral.is_some() && self.characteristic.is_some()
    }

    /// Find the peripheral for `address`, scanning until it shows up.
    async fn locate(adapter: &Adapter, address: &str) -> Result<Peripheral> {
        let wanted = normalize_device_id(address);

        // Already known to the stack from an earlier scan.
        if let Ok(known) = adapter.peripherals().await {
            for peripheral in known {
                if peripheral_address(&peripheral).await.is_some_and(|a| normalize_device_id(&a) == wanted) {
                    return Ok(peripheral);
                }
            }
        }

        let mut events = adapter.events().await.map_err(scan_refused)?;
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(scan_refused)?;
        let scan = ScanGuard::new(adapter);

        let found = loop {
            match events.next().await {
                Some(CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) => {
                    let Ok(peripheral) = adapter.peripheral(&id).await else {
                        continue;
                    };
                    if peripheral_address(&peripheral).await.is_some_and(|a| normalize_device_id(&a) == wanted) {
                        break Some(peripheral);
                    }
                }
                Some(_) => {}
                None => break None,
            }
        };

        scan.stop().await;
        found.ok_or_else(|| ConnectionError::NotFound(address.to_string()).into())
    }

    async fn connect_inner(&mut self, address: &str) -> Result<()> {
        let peripheral = Self::locate(&self.adapter, address).await?;
        let characteristic = establish(&mut self.peripheral, peripheral.clone()).await?;

        let notifications = peripheral
            .notifications()
            .await
            .map_err(|e| ConnectionError::Rejected(e.to_string()))?;

        self.notifications = Some(notifications);
        self.characteristic = Some(characteristic);
        Ok(())
    }
}

/// GATT operations needed to bring up a printer link.
#[async_trait]
trait GattLink: Send + Sync {
    async fn open(&self) -> Result<()>;
    async fn discover_characteristics(&self) -> Result<Vec<Characteristic>>;
    async fn enable_notify(&self, characteristic: &Characteristic) -> Result<()>;
    async fn close(&self);
}

#[async_trait]
impl GattLink for Peripheral {
    async fn open(&self) -> Result<()> {
        self.connect()
            .await
            .map_err(|e| classify_connect_error(&e.to_string()))
    }

    async fn discover_characteristics(&self) -> Result<Vec<Characteristic>> {
        self.discover_services()
            .await
            .map_err(|e| ConnectionError::Rejected(e.to_string()))?;
        Ok(btleplug::api::Peripheral::characteristics(self)
            .into_iter()
            .collect())
    }

    async fn enable_notify(&self, characteristic: &Characteristic) -> Result<()> {
        self.subscribe(characteristic)
            .await
            .map_err(|e| ConnectionError::Rejected(e.to_string()).into())
    }

    async fn close(&self) {
        if let Err(e) = self.disconnect().await {
            tracing::warn!(error = %e, "BLE disconnect failed");
        }
    }
}

/// Connect `link` and subscribe to the printer characteristic.
///
/// The link goes into `slot` before the connect attempt, so a failed or
/// abandoned setup can still be torn down through [`release`].
async fn establish<L: GattLink + Clone>(slot: &mut Option<L>, link: L) -> Result<Characteristic> {
    *slot = Some(link.clone());
    link.open().await?;

    let characteristic = link
        .discover_characteristics()
        .await?
        .into_iter()
        .find(|c| c.uuid == PRINTER_CHARACTERISTIC)
        .ok_or_else(|| {
            ConnectionError::NotFound(format!("characteristic {PRINTER_CHARACTERISTIC}"))
        })?;

    if characteristic.properties.contains(CharPropFlags::NOTIFY) {
        link.enable_notify(&characteristic).await?;
    }
    Ok(characteristic)
}

async fn release<L: GattLink>(slot: &mut Option<L>) {
    if let Some(link) = slot.take() {
        tracing::info!("Disconnecting BLE device");
        link.close().await;
    }
}

/// Stops an adapter scan when dropped, unless [`stop`](Self::stop) ran first.
struct ScanGuard {
    stop: Option<BoxFuture<'static, ()>>,
}

impl ScanGuard {
    fn new(adapter: &Adapter) -> Self {
        let adapter = adapter.clone();
        Self::with_stop(
            async move {
                if let Err(e) = adapter.stop_scan().await {
                    tracing::debug!(error = %e, "Failed to stop scan");
                }
            }
            .boxed(),
        )
    }

    fn with_stop(stop: BoxFuture<'static, ()>) -> Self {
        Self { stop: Some(stop) }
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            stop.await;
        }
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        let Some(stop) = self.stop.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            tracing::debug!("Scan abandoned, stopping");
            handle.spawn(stop);
        }
    }
}

#[async_trait]
impl Transport for BleConnection {
    /// Scan for advertisements until `timeout` elapses.
    async fn scan(&mut self, timeout: Duration) -> Result<BoxStream<'static, Advertisement>> {
        tracing::info!("Starting BLE scan ({:?} timeout)", timeout);

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| NiimbotError::Scan(e.to_string()))?;
        let scan = ScanGuard::new(&self.adapter);

        let events = self
            .adapter
            .events()
            .await
            .map_err(|e| NiimbotError::Scan(e.to_string()))?;

        let deadline = tokio::time::Instant::now() + timeout;
        let adapter = self.adapter.clone();

        let stream = futures::stream::unfold(Some((adapter, events, scan)), move |state| async move {
            let (adapter, mut events, scan) = state?;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    event = events.next() => match event {
                        Some(CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) => {
                            if let Some(adv) = advertisement_for(&adapter, &id).await {
                                return Some((adv, Some((adapter, events, scan))));
                            }
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
            scan.stop().await;
            tracing::info!("BLE scan complete");
            None
        });

        Ok(stream.boxed())
    }

    /// Connect to `address` and subscribe to printer notifications.
    async fn connect(&mut self, address: &str, timeout: Duration) -> Result<()> {
        tracing::info!(address = %address, "Connecting to device");

        match tokio::time::timeout(timeout, self.connect_inner(address)).await {
            Ok(Ok(())) => {
                tracing::info!(
                    chunk_size = self.chunk_size,
                    "Connected and discovered characteristic"
                );
                Ok(())
            }
            Ok(Err(err)) => {
                self.disconnect().await;
                Err(err)
            }
            Err(_) => {
                self.disconnect().await;
                Err(ConnectionError::Timeout(timeout).into())
            }
        }
    }

    /// Write one packet in MTU-sized chunks.
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let peripheral = self
            .peripheral
            .as_ref()
            .ok_or_else(|| NiimbotError::Write("not connected".into()))?;
        let characteristic = self
            .characteristic
            .as_ref()
            .ok_or_else(|| NiimbotError::Write("missing characteristic".into()))?;

        let chunks: Vec<&[u8]> = data.chunks(self.chunk_size).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            peripheral
                .write(characteristic, chunk, WriteType::WithoutResponse)
                .await
                .map_err(|e| {
                    NiimbotError::Write(format!("chunk {}/{}: {}", i + 1, chunks.len(), e))
                })?;
            if i + 1 < chunks.len() {
                tokio::time::sleep(CHUNK_WRITE_DELAY).await;
            }
        }
        tokio::time::sleep(PACKET_WRITE_DELAY).await;

        Ok(())
    }

    async fn read_notification(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let notifications = self
            .notifications
            .as_mut()
            .ok_or_else(|| NiimbotError::Write("not connected".into()))?;

        loop {
            match tokio::time::timeout(timeout, notifications.next()).await {
                Err(_) => return Err(NiimbotError::Timeout(timeout)),
                Ok(None) => {
                    return Err(NiimbotError::Write("notification stream closed".into()));
                }
                Ok(Some(n)) if n.uuid == PRINTER_CHARACTERISTIC => {
                    tracing::trace!(len = n.value.len(), "Notification received");
                    return Ok(n.value);
                }
                Ok(Some(_)) => {}
            }
        }
    }

    /// Disconnect from the currently connected peripheral.
    async fn disconnect(&mut self) {
        self.notifications = None;
        self.characteristic = None;
        release(&mut self.peripheral).await;
    }

    fn clear_notifications(&mut self) {
        if let Some(notifications) = self.notifications.as_mut() {
            while let Some(Some(stale)) = notifications.next().now_or_never() {
                tracing::debug!(len = stale.value.len(), "Dropping stale notification");
            }
        }
    }
}

impl Drop for BleConnection {
    fn drop(&mut self) {
        let Some(peripheral) = self.peripheral.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = peripheral.disconnect().await {
                    tracing::warn!(error = %e, "BLE disconnect on drop failed");
                }
            });
        }
    }
}

/// Platform address of a peripheral: the MAC where the stack exposes one,
/// otherwise the platform identifier (macOS hides MACs).
async fn peripheral_address(peripheral: &Peripheral) -> Option<String> {
    let props = peripheral.properties().await.ok().flatten()?;
    if props.address == BDAddr::default() {
        Some(peripheral.id().to_string())
    } else {
        Some(props.address.to_string())
    }
}

async fn advertisement_for(adapter: &Adapter, id: &PeripheralId) -> Option<Advertisement> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let props = peripheral.properties().await.ok().flatten()?;
    let address = if props.address == BDAddr::default() {
        id.to_string()
    } else {
        props.address.to_string()
    };
    Some(Advertisement {
        name: props.local_name,
        address,
        rssi: props.rssi,
    })
}

/// CoreBluetooth reports state 0 (unknown) while it is still powering up.
fn adapter_powering_up(err: &NiimbotError) -> bool {
    #[cfg(target_os = "macos")]
    {
        if let NiimbotError::Adapter(msg) = err {
            let msg = msg.to_ascii_lowercase();
            return msg.contains("central manager has invalid state") && msg.contains("have=0");
        }
    }
    #[cfg(not(target_os = "macos"))]
    let _ = err;

    false
}

fn with_permission_hint(err: NiimbotError) -> NiimbotError {
    #[cfg(target_os = "macos")]
    {
        if let NiimbotError::Adapter(msg) = &err {
            if msg.to_ascii_lowercase().contains("central manager has invalid state") {
                return NiimbotError::Adapter(format!(
                    "{msg} (macOS: turn Bluetooth on and allow this app under System Settings > Privacy & Security > Bluetooth)"
                ));
            }
        }
    }

    err
}

/// A failed scan while locating a device means the stack refused the connect.
fn scan_refused(err: btleplug::Error) -> NiimbotError {
    ConnectionError::Rejected(format!("scan failed: {err}")).into()
}

/// The stack reports a device held by another central as a refusal.
fn classify_connect_error(msg: &str) -> NiimbotError {
    let lower = msg.to_ascii_lowercase();
    let not_found = ["not found", "unknown device", "does not exist"];
    if not_found.iter().any(|p| lower.contains(p)) {
        ConnectionError::NotFound(msg.to_string()).into()
    } else {
        ConnectionError::Rejected(msg.to_string()).into()
    }
}
