//! USB hotplug watcher
//!
//! Registers a libusb hotplug callback for one VID/PID pair and forwards
//! attach/detach notifications as [`HotplugEvent`]s. The connection manager
//! drains the queue on its own thread; nothing here calls back into it.

use async_channel::{Sender, TrySendError};
use common::HotplugEvent;
use protocol::DeviceIdentity;
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long one libusb event wait may block before the stop flag is checked
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Hotplug callback handler
struct HotplugCallback {
    identity: DeviceIdentity,
    events: Sender<HotplugEvent>,
}

impl HotplugCallback {
    fn forward(&self, event: HotplugEvent) {
        // Runs inside libusb event handling; must not block.
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => warn!("Hotplug queue full, dropping {:?}", event),
            Err(TrySendError::Closed(_)) => debug!("Hotplug queue closed"),
        }
    }
}

impl<T: UsbContext> Hotplug<T> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<T>) {
        debug!(
            "Hot-plug callback: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        self.forward(HotplugEvent::Attached {
            identity: self.identity,
        });
    }

    fn device_left(&mut self, device: Device<T>) {
        debug!(
            "Hot-plug callback: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        self.forward(HotplugEvent::Detached {
            identity: self.identity,
        });
    }
}

/// Running hotplug registration and its event thread
pub struct HotplugWatcher {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl HotplugWatcher {
    /// Start watching `identity`
    ///
    /// Returns `Ok(None)` when the platform's libusb has no hotplug support.
    pub fn start(
        identity: DeviceIdentity,
        events: Sender<HotplugEvent>,
    ) -> Result<Option<Self>, rusb::Error> {
        if !rusb::has_hotplug() {
            warn!("libusb has no hotplug support; reconnect with 'connect' after replugging");
            return Ok(None);
        }

        let context = Context::new()?;
        let callback = HotplugCallback { identity, events };
        let registration: Registration<Context> = HotplugBuilder::new()
            .vendor_id(identity.vendor_id)
            .product_id(identity.product_id)
            .enumerate(false)
            .register(&context, Box::new(callback))?;

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let thread = std::thread::Builder::new()
            .name("hotplug-watcher".to_string())
            .spawn(move || {
                // Keep the callback registered for the life of the loop
                let _registration = registration;
                while !thread_stop.load(Ordering::SeqCst) {
                    match context.handle_events(Some(EVENT_POLL_INTERVAL)) {
                        Ok(()) => {}
                        Err(rusb::Error::Interrupted) => {
                            debug!("USB event handling interrupted");
                        }
                        Err(e) => {
                            warn!("Error handling USB events: {}", e);
                            std::thread::sleep(EVENT_POLL_INTERVAL);
                        }
                    }
                }
                debug!("Hotplug watcher stopped");
            })
            .map_err(|e| {
                error!("Failed to spawn hotplug watcher thread: {}", e);
                rusb::Error::Other
            })?;

        info!("Watching hotplug events for {}", identity);
        Ok(Some(Self {
            stop,
            thread: Some(thread),
        }))
    }

    /// Stop the event thread; safe to call more than once
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take()
            && let Err(e) = thread.join()
        {
            error!("Hotplug watcher thread panicked: {:?}", e);
        }
    }
}

impl Drop for HotplugWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
