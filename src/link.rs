use anyhow::{Context, Result, bail};
use log::{info, warn};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::cli::{OptionsOpts, ProbeOpts, SerialOpts, SetOpts, WatchOpts};
use crate::discovery::{DeviceDescriptor, DevicePoller, list_devices};
use crate::negotiation::Phase;
use crate::port::SerialTransport;
use crate::proto::command::{Action, ActionSpec, Command, ConfigOption, Reply};
use crate::session::Session;

/// A connected session plus the lines its reader thread produces.
struct Link {
    dev: String,
    session: Session,
    lines: Receiver<String>,
    idle: Duration,
}

impl Link {
    fn open(opts: &SerialOpts) -> Result<Self> {
        let (transport, lines) = SerialTransport::open(opts)
            .with_context(|| format!("opening {}", opts.dev))?;
        let mut session = Session::new(opts.wire_style());
        session.connect(Box::new(transport))?;
        info!("connected to {} at {} baud", opts.dev, opts.baud);
        Ok(Self {
            dev: opts.dev.clone(),
            session,
            lines,
            idle: opts.idle_timeout(),
        })
    }

    /// Feed received lines into the session until `done` yields a value.
    fn drive_until<T>(&mut self, mut done: impl FnMut(&mut Session) -> Option<T>) -> Result<T> {
        loop {
            if let Some(v) = done(&mut self.session) {
                return Ok(v);
            }
            match self.lines.recv_timeout(self.idle) {
                Ok(line) => self.session.on_line(&line),
                Err(RecvTimeoutError::Timeout) => bail!(
                    "{}: no reply to {} within {} ms ({} commands pending, {:?})",
                    self.dev,
                    self.session
                        .outstanding()
                        .map_or("<nothing>", Command::keyword),
                    self.idle.as_millis(),
                    self.session.pending(),
                    self.session.phase()
                ),
                Err(RecvTimeoutError::Disconnected) => bail!("{}: link closed", self.dev),
            }
        }
    }

    fn probed(&mut self) -> Result<bool> {
        self.drive_until(|s| (s.phase() != Phase::Probing).then(|| s.bootloader_mode()))
    }

    /// Wait for the current enumeration round to finish.
    fn fetched(&mut self) -> Result<()> {
        let outcome = self.drive_until(|s| s.take_ready())?;
        outcome.with_context(|| format!("{}: reading options", self.dev))
    }

    /// Send REBOOT and wait for its own reply, not for the queue to drain.
    fn reboot(&mut self) -> Result<String> {
        let (tx, rx) = mpsc::channel();
        let action = Action::from(ActionSpec::reboot()).with_completion(move |reply| {
            if let Reply::Response(r) = reply {
                let _ = tx.send(r.to_string());
            }
        });
        self.session.submit(action)?;
        self.drive_until(|_| rx.try_recv().ok())
    }

    fn negotiate(&mut self) -> Result<()> {
        if !self.probed()? {
            bail!("{}: device is not in bootloader mode", self.dev);
        }
        self.fetched()
    }

    fn close(mut self) -> Result<()> {
        self.session.disconnect()?;
        Ok(())
    }
}

pub fn list() -> Result<()> {
    let devices = list_devices();
    if devices.is_empty() {
        eprintln!("no connectable devices");
    }
    print_devices(&devices);
    Ok(())
}

pub fn watch(opts: WatchOpts) -> Result<()> {
    let interval = Duration::from_millis(opts.interval_ms.max(50));
    let (_poller, updates): (DevicePoller, _) =
        DevicePoller::spawn(interval, list_devices).context("starting device poller")?;
    for devices in updates {
        println!("--- {} connectable", devices.len());
        print_devices(&devices);
    }
    Ok(())
}

pub fn probe(opts: ProbeOpts) -> Result<()> {
    let mut link = Link::open(&opts.ser)?;
    let mut bootloader = link.probed()?;
    for attempt in 1..=opts.retries {
        if bootloader {
            break;
        }
        info!("normal mode, probing again ({}/{})", attempt, opts.retries);
        thread::sleep(Duration::from_millis(opts.retry_ms));
        link.session.test_bootloader()?;
        bootloader = link.probed()?;
    }
    println!(
        "{}: {}",
        opts.ser.dev,
        if bootloader { "bootloader mode" } else { "normal mode" }
    );
    link.close()
}

pub fn options(opts: OptionsOpts) -> Result<()> {
    let mut link = Link::open(&opts.ser)?;
    link.negotiate()?;
    let mut shown = link.session.options().to_vec();
    print_options(&shown);

    let Some(every) = opts.watch_ms else {
        return link.close();
    };
    loop {
        thread::sleep(Duration::from_millis(every));
        link.session.get_config_options()?;
        link.fetched()?;
        if link.session.options() != shown.as_slice() {
            println!("---");
            shown = link.session.options().to_vec();
            print_options(&shown);
        }
    }
}

pub fn set(opts: SetOpts) -> Result<()> {
    let mut link = Link::open(&opts.ser)?;
    link.negotiate()?;
    if !link.session.options().iter().any(|o| o.name == opts.name) {
        warn!("device did not list option {:?}, sending anyway", opts.name);
    }
    link.session.save_config(&opts.name, &opts.value)?;
    link.fetched()?;

    let stored = link
        .session
        .options()
        .iter()
        .find(|o| o.name == opts.name)
        .and_then(|o| o.value.clone());
    if stored.as_deref() != Some(opts.value.as_str()) {
        warn!(
            "device reports {} = {}",
            opts.name,
            stored.as_deref().unwrap_or("<unset>")
        );
    }
    print_options(link.session.options());
    link.close()
}

pub fn reboot(opts: SerialOpts) -> Result<()> {
    let mut link = Link::open(&opts)?;
    link.probed()?;
    let reply = link
        .reboot()
        .with_context(|| format!("{}: reboot got no reply", opts.dev))?;
    println!("{}: reboot -> {}", opts.dev, reply);
    link.close()
}

/* -------------------- output -------------------- */

fn print_devices(devices: &[DeviceDescriptor]) {
    for d in devices {
        println!(
            "{}\t{}\t{}\t{}",
            d.path,
            d.manufacturer.as_deref().unwrap_or("-"),
            d.product.as_deref().unwrap_or("-"),
            d.serial_number.as_deref().unwrap_or("-"),
        );
    }
}

fn print_options(options: &[ConfigOption]) {
    for o in options {
        println!(
            "{}{} = {}\t# {}",
            if o.modified { "*" } else { "" },
            o.name,
            o.value.as_deref().unwrap_or("<unset>"),
            o.description.as_deref().unwrap_or(""),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{LineTransport, TransportError};
    use crate::proto::parser::WireStyle;
    use std::sync::mpsc::Sender;

    struct Sink;

    impl LineTransport for Sink {
        fn write_line(&mut self, _line: &str) -> Result<(), TransportError> {
            Ok(())
        }
        fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn attached() -> (Link, Sender<String>) {
        let mut session = Session::new(WireStyle::Clean);
        session.connect(Box::new(Sink)).unwrap();
        let (tx, lines) = mpsc::channel();
        let link = Link {
            dev: "/dev/ttyTEST".into(),
            session,
            lines,
            idle: Duration::from_millis(50),
        };
        (link, tx)
    }

    #[test]
    fn reboot_returns_on_its_reply_with_gets_queued() {
        let (mut link, tx) = attached();
        for line in ["BOOTLOADER_MODE", "a:x;b:y;", "REBOOTING"] {
            tx.send(line.to_string()).unwrap();
        }
        assert!(link.probed().unwrap());
        assert_eq!(link.reboot().unwrap(), "REBOOTING");
        assert_eq!(link.session.pending(), 2);
        link.close().unwrap();
    }

    #[test]
    fn silent_device_times_out() {
        let (mut link, _tx) = attached();
        let err = link.probed().unwrap_err();
        assert!(err.to_string().contains("no reply to test"));
    }
}
