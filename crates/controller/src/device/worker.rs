//! Device worker thread
//!
//! Dedicated thread that executes [`DeviceCommand`]s submitted through a
//! [`DeviceBridge`](common::DeviceBridge). Device I/O blocks, so the Tokio
//! runtime never performs it directly; commands queue up in the bounded bridge
//! and run one after another here, behind the transport's own guard.

use crate::device::manager::ConnectionManager;
use crate::device::transport::CommandTransport;
use common::{DeviceCommand, DeviceWorker};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info};

/// Device worker thread
pub struct DeviceWorkerThread {
    manager: Arc<ConnectionManager>,
    transport: Arc<CommandTransport>,
    worker: DeviceWorker,
}

impl DeviceWorkerThread {
    pub fn new(worker: DeviceWorker, transport: Arc<CommandTransport>) -> Self {
        Self {
            manager: transport.manager().clone(),
            transport,
            worker,
        }
    }

    /// Process commands until `Shutdown` or until every bridge is dropped
    pub fn run(self) {
        info!("Device worker thread started");

        loop {
            match self.worker.recv_command() {
                Ok(DeviceCommand::Shutdown) => {
                    info!("Device worker shutting down");
                    break;
                }
                Ok(cmd) => self.handle_command(cmd),
                Err(e) => {
                    debug!("Command channel closed: {}", e);
                    break;
                }
            }
        }

        info!("Device worker thread stopped");
    }

    /// Handle a command from the Tokio runtime
    fn handle_command(&self, cmd: DeviceCommand) {
        // A panic here would otherwise take the worker down with it
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(e) = result {
            error!("Panic in device command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&self, cmd: DeviceCommand) {
        match cmd {
            DeviceCommand::Connect { response } => {
                let _ = response.send(self.manager.connect());
            }

            DeviceCommand::Status { response } => {
                let _ = response.send(self.manager.status());
            }

            DeviceCommand::ListDevices { response } => {
                let _ = response.send(self.manager.list_devices());
            }

            DeviceCommand::Send {
                opcode,
                payload,
                response,
            } => {
                let _ = response.send(self.transport.send_command(opcode, &payload));
            }

            DeviceCommand::Exchange {
                opcode,
                payload,
                timeout,
                response,
            } => {
                let result = self
                    .transport
                    .send_command_with_response(opcode, &payload, timeout);
                let _ = response.send(result);
            }

            DeviceCommand::ReadSensor { kind, response } => {
                let _ = response.send(self.transport.read_sensor(kind));
            }

            DeviceCommand::Shutdown => {
                // Handled in run()
            }
        }
    }
}

/// Spawn the device worker thread
///
/// The thread runs until a `Shutdown` command arrives or every bridge handle
/// is dropped.
pub fn spawn_device_worker(
    worker: DeviceWorker,
    transport: Arc<CommandTransport>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("device-worker".to_string())
        .spawn(move || DeviceWorkerThread::new(worker, transport).run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::transport::TransportSettings;
    use common::create_device_bridge;
    use common::test_utils::{MockBackend, MockDevice, create_mock_device_info};
    use protocol::{ConnectionState, DeviceIdentity, Opcode, SensorKind};

    const ID: DeviceIdentity = DeviceIdentity::new(0x303A, 0x8000);

    #[tokio::test]
    async fn test_worker_serves_bridge() {
        let backend = MockBackend::new();
        let device = backend.add_device(
            create_mock_device_info(ID, 1),
            MockDevice::firmware(22.0, 35.0),
        );
        let manager = Arc::new(ConnectionManager::new(ID, backend));
        let transport = Arc::new(CommandTransport::new(manager, TransportSettings::default()));

        let (bridge, worker) = create_device_bridge();
        let handle = spawn_device_worker(worker, transport).unwrap();

        assert_eq!(
            bridge.status().await.unwrap().state,
            ConnectionState::Disconnected
        );
        bridge.connect().await.unwrap().unwrap();
        assert_eq!(
            bridge.read_sensor(SensorKind::Humidity).await.unwrap(),
            Some(35.0)
        );
        bridge
            .send(Opcode::SetLedColor, vec![1, 2, 3])
            .await
            .unwrap()
            .unwrap();

        bridge.shutdown().await.unwrap();
        handle.join().unwrap();

        let writes = device.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(&writes[1][..5], &[0x00, 0x04, 1, 2, 3]);
    }

    #[test]
    fn test_worker_exits_when_bridge_dropped() {
        let manager = Arc::new(ConnectionManager::new(ID, MockBackend::new()));
        let transport = Arc::new(CommandTransport::new(manager, TransportSettings::default()));

        let (bridge, worker) = create_device_bridge();
        let handle = spawn_device_worker(worker, transport).unwrap();
        drop(bridge);
        handle.join().unwrap();
    }
}
