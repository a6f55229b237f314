//! # Radio Module
//!
//! The scan controller talks to the Bluetooth hardware only through the
//! `Radio` trait: start discovery with a sink for advertisements, stop
//! discovery. `BtleplugRadio` is the real implementation; tests use fakes.
//!
//! ## Threading
//! `BtleplugRadio` is driven from the scan service thread, which owns a Tokio
//! runtime. Start/stop block on that runtime briefly; advertisements are
//! forwarded from a spawned task into the sink, which posts them back onto
//! the scan thread's queue.

use crate::advertisement::PayloadBuilder;
use crate::device_registry::{Advertisement, RSSI_UNAVAILABLE};
use crate::error::ScanError;
use btleplug::api::{
    Central, CentralEvent, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::stream::{Stream, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Destination for advertisements observed by a radio.
///
/// `deliver` returns `false` once nobody is listening any more, which tells
/// the radio to stop forwarding.
#[derive(Clone)]
pub struct DiscoverySink {
    deliver: Arc<dyn Fn(Advertisement) -> bool + Send + Sync>,
}

impl DiscoverySink {
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(Advertisement) -> bool + Send + Sync + 'static,
    {
        Self { deliver: Arc::new(deliver) }
    }

    pub fn deliver(&self, advertisement: Advertisement) -> bool {
        (self.deliver)(advertisement)
    }
}

pub trait Radio {
    /// Begin discovery, delivering every observed advertisement to `sink`.
    fn start_discovery(&mut self, sink: DiscoverySink) -> Result<(), ScanError>;

    /// Halt discovery. Safe to call when not discovering.
    fn stop_discovery(&mut self);
}

/// BLE radio backed by btleplug.
///
/// The adapter is looked up on first use, so starting a scan again after
/// plugging in or enabling an adapter picks it up.
pub struct BtleplugRadio {
    runtime: Handle,
    adapter_index: usize,
    // Held so the adapter's backend session stays open.
    _manager: Option<Manager>,
    adapter: Option<Adapter>,
    forwarder: Option<JoinHandle<()>>,
}

impl BtleplugRadio {
    pub fn new(runtime: Handle, adapter_index: usize) -> Self {
        Self {
            runtime,
            adapter_index,
            _manager: None,
            adapter: None,
            forwarder: None,
        }
    }

    fn adapter(&mut self) -> Result<Adapter, ScanError> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }

        let index = self.adapter_index;
        let (manager, adapter) = self.runtime.block_on(async move {
            let manager = Manager::new().await.map_err(|e| {
                log::error!("Failed to create BLE manager: {}", e);
                ScanError::RadioUnavailable
            })?;
            let adapters = manager.adapters().await.map_err(|e| {
                log::error!("Failed to get adapters: {}", e);
                ScanError::RadioUnavailable
            })?;
            log::debug!("Found {} Bluetooth adapter(s)", adapters.len());
            let adapter = adapters.into_iter().nth(index).ok_or_else(|| {
                log::error!("No Bluetooth adapter at index {}", index);
                ScanError::RadioUnavailable
            })?;
            Ok::<_, ScanError>((manager, adapter))
        })?;

        self._manager = Some(manager);
        self.adapter = Some(adapter.clone());
        Ok(adapter)
    }
}

impl Radio for BtleplugRadio {
    fn start_discovery(&mut self, sink: DiscoverySink) -> Result<(), ScanError> {
        let adapter = self.adapter()?;

        let events = self
            .runtime
            .block_on(async {
                let events = adapter.events().await?;
                adapter.start_scan(ScanFilter::default()).await?;
                Ok::<_, btleplug::Error>(events)
            })
            .map_err(|e| ScanError::StartFailed(e.to_string()))?;

        if let Some(previous) = self.forwarder.take() {
            previous.abort();
        }
        self.forwarder = Some(self.runtime.spawn(forward_advertisements(adapter, events, sink)));
        Ok(())
    }

    fn stop_discovery(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if let Some(adapter) = &self.adapter {
            if let Err(e) = self.runtime.block_on(adapter.stop_scan()) {
                log::warn!("Failed to stop scan: {}", e);
            }
        }
    }
}

async fn forward_advertisements<S>(adapter: Adapter, mut events: S, sink: DiscoverySink)
where
    S: Stream<Item = CentralEvent> + Unpin,
{
    while let Some(event) = events.next().await {
        let id = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
            _ => continue,
        };

        match read_advertisement(&adapter, &id).await {
            Ok(Some(advertisement)) => {
                if !sink.deliver(advertisement) {
                    log::debug!("Discovery sink closed, no longer forwarding");
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => log::debug!("Could not read properties of {:?}: {}", id, e),
        }
    }
}

async fn read_advertisement(
    adapter: &Adapter,
    id: &PeripheralId,
) -> Result<Option<Advertisement>, btleplug::Error> {
    let peripheral = adapter.peripheral(id).await?;
    Ok(peripheral
        .properties()
        .await?
        .map(|props| advertisement_from_properties(format!("{:?}", id), props)))
}

/// Converts reported properties into an advertisement keyed on `id`.
///
/// `props.address` is kept for display only; CoreBluetooth reports it as all
/// zeroes for every peripheral.
pub fn advertisement_from_properties(id: String, props: PeripheralProperties) -> Advertisement {
    let services: Vec<u128> = props.services.iter().map(|uuid| uuid.as_u128()).collect();
    let manufacturer_data: BTreeMap<u16, Vec<u8>> = props.manufacturer_data.into_iter().collect();
    let payload = PayloadBuilder::new()
        .local_name(props.local_name.as_deref())
        .tx_power(props.tx_power_level)
        .services(&services)
        .manufacturer_data(&manufacturer_data)
        .build();

    Advertisement {
        id,
        address: props.address.to_string(),
        name: props.local_name,
        rssi: props.rssi.unwrap_or(RSSI_UNAVAILABLE),
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_sink_delivers_to_closure() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink = DiscoverySink::new(move |adv| {
            seen_clone.lock().unwrap().push(adv.id);
            true
        });

        let clone = sink.clone();
        assert!(clone.deliver(Advertisement {
            id: "AA".to_string(),
            address: "AA".to_string(),
            name: None,
            rssi: -50,
            payload: Vec::new(),
        }));
        assert_eq!(*seen.lock().unwrap(), vec!["AA".to_string()]);
    }

    #[test]
    fn test_sink_reports_closed_receiver() {
        let (sender, receiver) = crossbeam_channel::unbounded::<Advertisement>();
        let sink = DiscoverySink::new(move |adv| sender.send(adv).is_ok());
        drop(receiver);

        assert!(!sink.deliver(Advertisement {
            id: "AA".to_string(),
            address: "AA".to_string(),
            name: Some("x".to_string()),
            rssi: -50,
            payload: Vec::new(),
        }));
    }

    #[test]
    fn test_properties_without_address_keep_distinct_ids() {
        let props = PeripheralProperties {
            local_name: Some("Thermo".to_string()),
            rssi: Some(-61),
            ..Default::default()
        };

        let first = advertisement_from_properties("peripheral-1".to_string(), props.clone());
        let second = advertisement_from_properties("peripheral-2".to_string(), props);

        assert_eq!(first.address, second.address);
        assert_ne!(first.id, second.id);
        assert_eq!(first.name.as_deref(), Some("Thermo"));
        assert_eq!(first.rssi, -61);
        assert_eq!(first.payload[1], crate::advertisement::AD_COMPLETE_LOCAL_NAME);
    }

    #[test]
    fn test_missing_rssi_marked_unavailable() {
        let mut props = PeripheralProperties::default();
        props.manufacturer_data.insert(0x0059, vec![0x01]);

        let advertisement = advertisement_from_properties("peripheral-3".to_string(), props);
        assert_eq!(advertisement.rssi, RSSI_UNAVAILABLE);
        assert_eq!(advertisement.name, None);
        assert_eq!(advertisement.payload, vec![4, 0xFF, 0x59, 0x00, 0x01]);
    }
}
