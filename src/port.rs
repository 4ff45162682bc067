use log::{debug, error, warn};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, BufRead, BufReader, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

use crate::cli::SerialOpts;

const READ_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("open {dev}: {source}")]
    Open {
        dev: String,
        #[source]
        source: serialport::Error,
    },
    #[error("write: {0}")]
    Write(#[source] io::Error),
    #[error("close {dev}: {reason}")]
    Close { dev: String, reason: String },
    #[error("reader setup: {0}")]
    Reader(#[from] io::Error),
}

/// Write side of a line-oriented link. Received lines arrive separately.
#[cfg_attr(test, mockall::automock)]
pub trait LineTransport {
    /// Write one complete, already terminated line.
    fn write_line(&mut self, line: &str) -> Result<(), TransportError>;
    fn close(&mut self) -> Result<(), TransportError>;
}

pub fn open_port(opts: &SerialOpts) -> Result<Box<dyn SerialPort>, TransportError> {
    let builder = serialport::new(&opts.dev, opts.baud)
        .timeout(READ_TIMEOUT)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(if opts.rtscts {
            FlowControl::Hardware
        } else {
            FlowControl::None
        });

    let port = builder.open().map_err(|source| TransportError::Open {
        dev: opts.dev.clone(),
        source,
    })?;
    // Drop whatever the device printed before we attached (boot banners).
    if let Err(e) = port.clear(ClearBuffer::All) {
        warn!("{}: could not flush buffers: {}", opts.dev, e);
    }
    Ok(port)
}

/// Serial link with a background thread framing received bytes into lines.
pub struct SerialTransport {
    dev: String,
    port: Box<dyn SerialPort>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl SerialTransport {
    pub fn open(opts: &SerialOpts) -> Result<(Self, Receiver<String>), TransportError> {
        let port = open_port(opts)?;
        let read_half = port.try_clone().map_err(|source| TransportError::Open {
            dev: opts.dev.clone(),
            source,
        })?;
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let stop = Arc::clone(&stop);
            let dev = opts.dev.clone();
            thread::Builder::new()
                .name(format!("rx:{}", opts.dev))
                .spawn(move || read_lines(read_half, &dev, &stop, tx))?
        };
        Ok((
            Self {
                dev: opts.dev.clone(),
                port,
                stop,
                reader: Some(reader),
            },
            rx,
        ))
    }

    fn stop_reader(&mut self) -> Result<(), TransportError> {
        self.stop.store(true, Ordering::Relaxed);
        match self.reader.take() {
            Some(handle) => handle.join().map_err(|_| TransportError::Close {
                dev: self.dev.clone(),
                reason: "reader thread panicked".into(),
            }),
            None => Ok(()),
        }
    }
}

impl LineTransport for SerialTransport {
    fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.port
            .write_all(line.as_bytes())
            .and_then(|_| self.port.flush())
            .map_err(TransportError::Write)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.stop_reader()?;
        self.port
            .clear(ClearBuffer::Output)
            .map_err(|e| TransportError::Close {
                dev: self.dev.clone(),
                reason: e.to_string(),
            })
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn read_lines(
    port: Box<dyn SerialPort>,
    dev: &str,
    stop: &AtomicBool,
    tx: mpsc::Sender<String>,
) {
    let mut reader = BufReader::new(port);
    let mut buf = Vec::with_capacity(256);

    while !stop.load(Ordering::Relaxed) {
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => continue,
            Ok(_) if buf.ends_with(b"\n") => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                buf.clear();
                debug!("{} <- {:?}", dev, line);
                if tx.send(line).is_err() {
                    break; // receiver gone
                }
            }
            // partial line, keep accumulating
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("{}: read failed: {}", dev, e);
                break;
            }
        }
    }
    debug!("{}: reader stopped", dev);
}
