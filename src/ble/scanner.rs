//! Discovery of nearby Pokit devices.
//!
//! A peripheral counts as a Pokit device when its advertisement names one of
//! the per-product Status services, either in the service list or as a
//! service-data key. Everything else the adapter reports is ignored.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::products::ProductVariant;

/// A Pokit device seen while scanning.
#[derive(Debug, Clone)]
pub struct PokitDiscoveryEvent {
    /// Platform identifier of the peripheral, as text.
    pub identifier: String,
    /// Handle to hand to [`PeripheralTransport::new`](crate::PeripheralTransport::new).
    pub peripheral: Peripheral,
    pub product: ProductVariant,
    /// Advertised local name.
    pub local_name: Option<String>,
    /// Received signal strength, in dBm.
    pub rssi: Option<i16>,
}

type DiscoveredMap = Arc<RwLock<HashMap<PeripheralId, PokitDiscoveryEvent>>>;

/// Watches one adapter for Pokit advertisements.
pub struct PokitScanner {
    adapter: Adapter,
    /// Latest sighting of each device, keyed by peripheral.
    discovered: DiscoveredMap,
    events: broadcast::Sender<PokitDiscoveryEvent>,
    /// Background task draining adapter events.
    scan: ScanSlot,
}

/// Ownership of the single background scan task.
///
/// The slot is reserved before any await so concurrent starts cannot both
/// spawn a listener.
#[derive(Default)]
struct ScanSlot {
    active: AtomicBool,
    task: RwLock<Option<JoinHandle<()>>>,
}

impl ScanSlot {
    /// Claim the slot; `false` if a scan is already running or starting.
    fn reserve(&self) -> bool {
        !self.active.swap(true, Ordering::SeqCst)
    }

    /// Store the task of a reserved scan. Aborts it instead if the scan was
    /// released in the meantime.
    fn install(&self, task: JoinHandle<()>) {
        let mut slot = self.task.write();
        if !self.active.load(Ordering::SeqCst) {
            task.abort();
            return;
        }
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    /// Give up the slot, aborting any running task. `false` if no scan was
    /// active.
    fn release(&self) -> bool {
        let mut slot = self.task.write();
        if let Some(task) = slot.take() {
            task.abort();
        }
        self.active.swap(false, Ordering::SeqCst)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl PokitScanner {
    /// Scanner on the system's first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BluetoothUnavailable`] if there is no usable adapter.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await.map_err(|e| {
            warn!("Bluetooth manager unavailable: {}", e);
            Error::BluetoothUnavailable
        })?;
        let Some(adapter) = manager.adapters().await?.into_iter().next() else {
            return Err(Error::BluetoothUnavailable);
        };
        debug!("Scanning with adapter {:?}", adapter.adapter_info().await.ok());
        Ok(Self::with_adapter(adapter))
    }

    /// Scanner on a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            discovered: Arc::default(),
            events: broadcast::channel(32).0,
            scan: ScanSlot::default(),
        }
    }

    /// Begin scanning in the background. Does nothing if already scanning.
    pub async fn start_scanning(&self) -> Result<()> {
        if !self.scan.reserve() {
            return Ok(());
        }

        let started = async {
            let central_events = self.adapter.events().await?;
            self.adapter.start_scan(ScanFilter::default()).await?;
            Ok::<_, Error>(central_events)
        };
        let mut central_events = match started.await {
            Ok(events) => events,
            Err(e) => {
                self.scan.release();
                return Err(e);
            }
        };
        info!("Scanning for Pokit devices");

        let adapter = self.adapter.clone();
        let discovered = self.discovered.clone();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id)
                    | CentralEvent::DeviceUpdated(id)
                    | CentralEvent::ServicesAdvertisement { id, .. }
                    | CentralEvent::ServiceDataAdvertisement { id, .. } => id,
                    _ => continue,
                };
                if let Some(found) = identify(&adapter, &id).await {
                    record(&discovered, &events, id, found);
                }
            }
            debug!("Adapter event stream closed");
        });

        self.scan.install(task);
        Ok(())
    }

    /// Stop a scan started with [`start_scanning`](Self::start_scanning).
    pub async fn stop_scanning(&self) -> Result<()> {
        if !self.scan.release() {
            return Ok(());
        }
        self.adapter.stop_scan().await?;
        info!("Scan stopped; {} Pokit device(s) seen", self.discovered.read().len());
        Ok(())
    }

    /// Scan for `duration`, then return every device seen, strongest signal
    /// first.
    pub async fn scan_for(&self, duration: Duration) -> Result<Vec<PokitDiscoveryEvent>> {
        self.start_scanning().await?;
        tokio::time::sleep(duration).await;
        self.stop_scanning().await?;

        let mut found: Vec<_> = self.discovered.read().values().cloned().collect();
        found.sort_by_key(|d| std::cmp::Reverse(d.rssi.unwrap_or(i16::MIN)));
        Ok(found)
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.is_active()
    }

    /// Every Pokit device seen so far, by identifier.
    pub fn discovered(&self) -> HashMap<String, PokitDiscoveryEvent> {
        self.discovered
            .read()
            .values()
            .map(|d| (d.identifier.clone(), d.clone()))
            .collect()
    }

    /// Subscribe to sightings as they happen.
    pub fn subscribe(&self) -> broadcast::Receiver<PokitDiscoveryEvent> {
        self.events.subscribe()
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }
}

impl Drop for PokitScanner {
    fn drop(&mut self) {
        self.scan.release();
    }
}

/// Product advertised by a peripheral, if it is a Pokit device.
pub fn classify(properties: &PeripheralProperties) -> Option<ProductVariant> {
    ProductVariant::from_service_uuids(&properties.services)
        .or_else(|| ProductVariant::from_service_uuids(properties.service_data.keys()))
}

async fn identify(adapter: &Adapter, id: &PeripheralId) -> Option<PokitDiscoveryEvent> {
    let peripheral = adapter
        .peripheral(id)
        .await
        .map_err(|e| trace!("Peripheral {:?} vanished: {}", id, e))
        .ok()?;
    let properties = peripheral.properties().await.ok()??;
    let product = classify(&properties)?;

    Some(PokitDiscoveryEvent {
        identifier: id.to_string(),
        peripheral,
        product,
        local_name: properties.local_name,
        rssi: properties.rssi,
    })
}

fn record(
    discovered: &RwLock<HashMap<PeripheralId, PokitDiscoveryEvent>>,
    events: &broadcast::Sender<PokitDiscoveryEvent>,
    id: PeripheralId,
    found: PokitDiscoveryEvent,
) {
    let previous = discovered.write().insert(id, found.clone());
    if previous.is_none() {
        info!(
            "Found {} {} ({}, {:?} dBm)",
            found.product,
            found.local_name.as_deref().unwrap_or("(unnamed)"),
            found.identifier,
            found.rssi
        );
    }
    let _ = events.send(found);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::{
        MULTIMETER_SERVICE_UUID, STATUS_SERVICE_UUID_METER, STATUS_SERVICE_UUID_PRO,
    };

    async fn settles(task: &tokio::task::AbortHandle) -> bool {
        for _ in 0..100 {
            if task.is_finished() {
                return true;
            }
            tokio::task::yield_now().await;
        }
        false
    }

    #[tokio::test]
    async fn test_concurrent_starts_share_one_scan() {
        let slot = ScanSlot::default();
        assert!(slot.reserve());
        assert!(!slot.reserve());

        let first = tokio::spawn(std::future::pending::<()>());
        let replaced = first.abort_handle();
        slot.install(first);
        slot.install(tokio::spawn(std::future::pending::<()>()));
        assert!(slot.is_active());
        assert!(settles(&replaced).await);

        assert!(slot.release());
        assert!(!slot.is_active());
        assert!(!slot.release());
        assert!(slot.reserve());
    }

    #[tokio::test]
    async fn test_scan_released_while_starting_is_aborted() {
        let slot = ScanSlot::default();
        assert!(slot.reserve());
        assert!(slot.release());

        let task = tokio::spawn(std::future::pending::<()>());
        let abort = task.abort_handle();
        slot.install(task);
        assert!(settles(&abort).await);
        assert!(slot.task.read().is_none());
    }

    #[test]
    fn test_classify_by_service_list() {
        let properties = PeripheralProperties {
            services: vec![MULTIMETER_SERVICE_UUID, STATUS_SERVICE_UUID_PRO],
            ..Default::default()
        };
        assert_eq!(classify(&properties), Some(ProductVariant::PokitPro));
    }

    #[test]
    fn test_classify_by_service_data() {
        let mut properties = PeripheralProperties::default();
        properties
            .service_data
            .insert(STATUS_SERVICE_UUID_METER, vec![0x01]);
        assert_eq!(classify(&properties), Some(ProductVariant::PokitMeter));
    }

    #[test]
    fn test_other_devices_are_ignored() {
        let properties = PeripheralProperties {
            services: vec![MULTIMETER_SERVICE_UUID],
            local_name: Some("Thermometer".to_string()),
            ..Default::default()
        };
        assert_eq!(classify(&properties), None);
    }
}
