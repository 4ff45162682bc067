use log::{debug, warn};
use serialport::{SerialPortInfo, SerialPortType};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// e.g. "/dev/ttyACM0" or "COM3"
    pub path: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl DeviceDescriptor {
    /// Only adapters that report a manufacturer are offered for connecting.
    pub fn is_connectable(&self) -> bool {
        self.manufacturer.as_deref().is_some_and(|m| !m.is_empty())
    }
}

impl From<SerialPortInfo> for DeviceDescriptor {
    fn from(info: SerialPortInfo) -> Self {
        let (manufacturer, product, serial_number) = match info.port_type {
            SerialPortType::UsbPort(usb) => (usb.manufacturer, usb.product, usb.serial_number),
            _ => (None, None, None),
        };
        Self {
            path: info.port_name,
            manufacturer,
            product,
            serial_number,
        }
    }
}

pub fn connectable(devices: impl IntoIterator<Item = DeviceDescriptor>) -> Vec<DeviceDescriptor> {
    let mut out: Vec<_> = devices.into_iter().filter(|d| d.is_connectable()).collect();
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}

pub fn list_devices() -> Vec<DeviceDescriptor> {
    let ports = serialport::available_ports().unwrap_or_else(|e| {
        warn!("listing serial ports: {}", e);
        Vec::new()
    });
    connectable(ports.into_iter().map(DeviceDescriptor::from))
}

/// Periodic device scan on its own thread. Stops when dropped.
pub struct DevicePoller {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DevicePoller {
    /// Calls `scan` every `interval` and reports the list whenever it changes.
    pub fn spawn<S>(interval: Duration, scan: S) -> std::io::Result<(Self, Receiver<Vec<DeviceDescriptor>>)>
    where
        S: FnMut() -> Vec<DeviceDescriptor> + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel();
        let (list_tx, list_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("device-poll".into())
            .spawn(move || poll(interval, scan, stop_rx, list_tx))?;
        Ok((
            Self {
                stop: Some(stop_tx),
                handle: Some(handle),
            },
            list_rx,
        ))
    }

    pub fn cancel(&mut self) {
        // dropping the sender wakes the poll thread
        self.stop.take();
        if let Some(h) = self.handle.take()
            && h.join().is_err()
        {
            warn!("device poller panicked");
        }
    }
}

impl Drop for DevicePoller {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn poll<S>(interval: Duration, mut scan: S, stop: Receiver<()>, out: Sender<Vec<DeviceDescriptor>>)
where
    S: FnMut() -> Vec<DeviceDescriptor>,
{
    let mut last: Option<Vec<DeviceDescriptor>> = None;
    loop {
        let now = scan();
        if last.as_ref() != Some(&now) {
            debug!("device list changed: {} connectable", now.len());
            if out.send(now.clone()).is_err() {
                return;
            }
            last = Some(now);
        }
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
