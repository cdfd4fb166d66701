//! Async channel bridge between Tokio runtime and the device worker thread
//!
//! All device I/O is blocking, so it runs on one dedicated worker thread. The
//! async side submits [`DeviceCommand`]s over a bounded queue and awaits the
//! reply on a oneshot channel. The queue depth bounds how much work can pile
//! up behind a slow device; it never spawns extra workers.

use async_channel::{Receiver, Sender, bounded};
use bytes::Bytes;
use protocol::{
    ConnectError, ConnectionState, DeviceDescriptor, DeviceIdentity, Opcode, SensorKind,
    TransportError,
};
use std::time::Duration;
use tokio::sync::oneshot;

/// Queued commands allowed in front of the worker
pub const COMMAND_QUEUE_DEPTH: usize = 16;

/// Buffered hotplug notifications
pub const HOTPLUG_QUEUE_DEPTH: usize = 32;

/// Connection status snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub identity: DeviceIdentity,
    pub state: ConnectionState,
    /// Present only while connected
    pub descriptor: Option<DeviceDescriptor>,
}

/// Commands from Tokio runtime to the device worker
#[derive(Debug)]
pub enum DeviceCommand {
    /// Connect to the tracked device if not already connected
    Connect {
        response: oneshot::Sender<Result<(), ConnectError>>,
    },

    /// Report connection state and descriptor
    Status {
        response: oneshot::Sender<DeviceStatus>,
    },

    /// List every attached HID device
    ListDevices {
        response: oneshot::Sender<Result<Vec<DeviceDescriptor>, ConnectError>>,
    },

    /// Fire-and-forget command (one write, no read)
    Send {
        opcode: Opcode,
        payload: Vec<u8>,
        response: oneshot::Sender<Result<(), TransportError>>,
    },

    /// Write a command and wait for one report
    Exchange {
        opcode: Opcode,
        payload: Vec<u8>,
        timeout: Duration,
        response: oneshot::Sender<Result<Bytes, TransportError>>,
    },

    /// Sample one sensor; `None` when no reading is available
    ReadSensor {
        kind: SensorKind,
        response: oneshot::Sender<Option<f32>>,
    },

    /// Shutdown the worker thread gracefully
    Shutdown,
}

/// Attach/detach notification for a watched identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugEvent {
    Attached { identity: DeviceIdentity },
    Detached { identity: DeviceIdentity },
}

impl HotplugEvent {
    pub fn identity(&self) -> DeviceIdentity {
        match self {
            HotplugEvent::Attached { identity } | HotplugEvent::Detached { identity } => *identity,
        }
    }
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct DeviceBridge {
    cmd_tx: Sender<DeviceCommand>,
}

impl DeviceBridge {
    /// Send a command to the worker thread
    pub async fn send_command(&self, cmd: DeviceCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Submit a command and await its reply
    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> DeviceCommand,
    ) -> crate::Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send_command(build(tx)).await?;
        rx.await
            .map_err(|e| crate::Error::Channel(format!("Worker dropped reply: {}", e)))
    }

    pub async fn connect(&self) -> crate::Result<Result<(), ConnectError>> {
        self.call(|response| DeviceCommand::Connect { response })
            .await
    }

    pub async fn status(&self) -> crate::Result<DeviceStatus> {
        self.call(|response| DeviceCommand::Status { response })
            .await
    }

    pub async fn list_devices(&self) -> crate::Result<Result<Vec<DeviceDescriptor>, ConnectError>> {
        self.call(|response| DeviceCommand::ListDevices { response })
            .await
    }

    pub async fn send(
        &self,
        opcode: Opcode,
        payload: Vec<u8>,
    ) -> crate::Result<Result<(), TransportError>> {
        self.call(|response| DeviceCommand::Send {
            opcode,
            payload,
            response,
        })
        .await
    }

    pub async fn exchange(
        &self,
        opcode: Opcode,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> crate::Result<Result<Bytes, TransportError>> {
        self.call(|response| DeviceCommand::Exchange {
            opcode,
            payload,
            timeout,
            response,
        })
        .await
    }

    pub async fn read_sensor(&self, kind: SensorKind) -> crate::Result<Option<f32>> {
        self.call(|response| DeviceCommand::ReadSensor { kind, response })
            .await
    }

    /// Ask the worker to exit after the commands already queued
    pub async fn shutdown(&self) -> crate::Result<()> {
        self.send_command(DeviceCommand::Shutdown).await
    }

    /// Commands waiting in the queue
    pub fn pending(&self) -> usize {
        self.cmd_tx.len()
    }
}

/// Handle for the worker thread (blocking)
pub struct DeviceWorker {
    pub(crate) cmd_rx: Receiver<DeviceCommand>,
}

impl DeviceWorker {
    /// Receive a command from Tokio runtime (blocking)
    pub fn recv_command(&self) -> crate::Result<DeviceCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<DeviceCommand> {
        self.cmd_rx.try_recv().ok()
    }
}

/// Create the channel bridge between Tokio and the worker thread
///
/// Returns (DeviceBridge for Tokio, DeviceWorker for the worker thread)
pub fn create_device_bridge() -> (DeviceBridge, DeviceWorker) {
    let (cmd_tx, cmd_rx) = bounded(COMMAND_QUEUE_DEPTH);
    (DeviceBridge { cmd_tx }, DeviceWorker { cmd_rx })
}

/// Create the queue carrying hotplug notifications to the connection manager
pub fn create_hotplug_channel() -> (Sender<HotplugEvent>, Receiver<HotplugEvent>) {
    bounded(HOTPLUG_QUEUE_DEPTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_bridge() {
        let (bridge, worker) = create_device_bridge();

        // Spawn a thread to simulate the device worker
        let handle = std::thread::spawn(move || {
            let cmd = worker.recv_command().unwrap();
            match cmd {
                DeviceCommand::ReadSensor { kind, response } => {
                    let _ = response.send(Some(21.5));
                    kind == SensorKind::Temperature
                }
                _ => false,
            }
        });

        let value = bridge.read_sensor(SensorKind::Temperature).await.unwrap();
        assert_eq!(value, Some(21.5));
        assert!(handle.join().unwrap());
    }

    #[tokio::test]
    async fn test_dropped_worker_is_channel_error() {
        let (bridge, worker) = create_device_bridge();
        drop(worker);

        let result = bridge.status().await;
        assert!(matches!(result, Err(crate::Error::Channel(_))));
    }

    #[test]
    fn test_hotplug_identity() {
        let identity = DeviceIdentity::new(0x303A, 0x8000);
        assert_eq!(HotplugEvent::Attached { identity }.identity(), identity);
        assert_eq!(HotplugEvent::Detached { identity }.identity(), identity);
    }
}
