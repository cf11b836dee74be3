//! Polling scanner for attached cameras.
//!
//! Each newly attached Seek camera is opened once and handed to every
//! registered handler. A device that disappears from the bus is forgotten, so
//! plugging it back in reports it again.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nusb::{MaybeFuture, list_devices};
use tracing::{debug, info, warn};

use crate::protocol::constants::{SEEK_VENDOR_ID, SUPPORTED_PIDS};
use crate::transport::NusbTransport;

/// Callback receiving a freshly opened camera.
pub type DeviceHandler = Box<dyn Fn(Arc<NusbTransport>) + Send + Sync>;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Whether a VID/PID pair is a camera this crate can drive.
pub fn is_supported(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == SEEK_VENDOR_ID && SUPPORTED_PIDS.contains(&product_id)
}

type DeviceKey = (String, u8);

pub struct DeviceDiscovery {
    handlers: Arc<Mutex<Vec<DeviceHandler>>>,
    running: Arc<AtomicBool>,
    interval: Duration,
    thread: Option<JoinHandle<()>>,
}

impl Default for DeviceDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceDiscovery {
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_POLL_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            handlers: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            interval,
            thread: None,
        }
    }

    pub fn add_handler<F>(&self, handler: F)
    where
        F: Fn(Arc<NusbTransport>) + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(Box::new(handler));
    }

    pub fn is_discovering(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start the polling thread. No-op if already running.
    pub fn start(&mut self) -> std::io::Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let running = Arc::clone(&self.running);
        let handlers = Arc::clone(&self.handlers);
        let interval = self.interval;

        let spawned = thread::Builder::new()
            .name("seek-discovery".into())
            .spawn(move || {
                let mut seen = HashSet::new();
                info!("Device discovery started");
                while running.load(Ordering::Acquire) {
                    poll(&mut seen, &handlers);
                    thread::sleep(interval);
                }
                info!("Device discovery stopped");
            });
        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Stop polling and wait for the thread to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take()
            && handle.join().is_err()
        {
            warn!("Discovery thread panicked");
        }
    }
}

impl Drop for DeviceDiscovery {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll(seen: &mut HashSet<DeviceKey>, handlers: &Mutex<Vec<DeviceHandler>>) {
    let devices = match list_devices().wait() {
        Ok(devices) => devices,
        Err(e) => {
            debug!(error = %e, "Device enumeration failed");
            return;
        }
    };

    let mut present = HashSet::new();
    for device_info in devices {
        if !is_supported(device_info.vendor_id(), device_info.product_id()) {
            continue;
        }
        let key = (device_info.bus_id().to_string(), device_info.device_address());
        present.insert(key.clone());
        if seen.contains(&key) {
            continue;
        }

        match NusbTransport::open_device_info(device_info) {
            Ok(transport) => {
                seen.insert(key);
                let transport = Arc::new(transport);
                for handler in handlers.lock().unwrap_or_else(|p| p.into_inner()).iter() {
                    handler(Arc::clone(&transport));
                }
            }
            // Retried on the next poll.
            Err(e) => warn!(error = %e, "Failed to open camera"),
        }
    }
    seen.retain(|key| present.contains(key));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::{SEEK_MOSAIC_PRODUCT_ID, SEEK_S104SP_PRODUCT_ID};

    #[test]
    fn test_supported_ids() {
        assert!(is_supported(SEEK_VENDOR_ID, SEEK_S104SP_PRODUCT_ID));
        assert!(is_supported(SEEK_VENDOR_ID, SEEK_MOSAIC_PRODUCT_ID));
        assert!(!is_supported(SEEK_VENDOR_ID, 0x0001));
        assert!(!is_supported(0x8086, SEEK_S104SP_PRODUCT_ID));
    }

    #[test]
    fn test_start_stop() {
        let mut discovery = DeviceDiscovery::with_interval(Duration::from_millis(10));
        discovery.add_handler(|_| {});
        assert!(!discovery.is_discovering());
        discovery.start().unwrap();
        assert!(discovery.is_discovering());
        discovery.start().unwrap();
        discovery.stop();
        assert!(!discovery.is_discovering());
    }
}
