use clap::{Args, Parser, Subcommand};
use std::time::Duration;

use crate::proto::parser::WireStyle;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "bootlink",
    about = "Configure a bootloader device over a serial line"
)]
pub struct Cli {
    /// Log wire traffic (same as RUST_LOG=debug)
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// List connectable serial adapters
    List,
    /// Keep listing adapters as they come and go
    Watch(WatchOpts),
    /// Connect and report whether the device is in bootloader mode
    Probe(ProbeOpts),
    /// Connect and print every configuration option
    Options(OptionsOpts),
    /// Write one option, then print the re-read configuration
    Set(SetOpts),
    /// Ask the device to reboot
    Reboot(SerialOpts),
}

#[derive(Args, Debug, Clone)]
pub struct SerialOpts {
    /// Serial device path
    #[arg(long, default_value = "/dev/ttyACM0")]
    pub dev: String,
    /// Baud rate
    #[arg(long, default_value_t = 115_200)]
    pub baud: u32,
    /// Enable RTS/CTS
    #[arg(long, default_value_t = false)]
    pub rtscts: bool,
    /// Give up after this many ms without a reply
    #[arg(long, default_value_t = 2_000)]
    pub timeout_ms: u64,
    /// Send "undefined" after parameter-less commands, as old host tools did
    #[arg(long, default_value_t = false)]
    pub legacy_wire: bool,
}

impl SerialOpts {
    pub fn wire_style(&self) -> WireStyle {
        if self.legacy_wire {
            WireStyle::Legacy
        } else {
            WireStyle::Clean
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for SerialOpts {
    fn default() -> Self {
        Self {
            dev: "/dev/ttyACM0".into(),
            baud: 115_200,
            rtscts: false,
            timeout_ms: 2_000,
            legacy_wire: false,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SetOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    /// Option name
    pub name: String,
    /// New value
    pub value: String,
}

#[derive(Args, Debug, Clone)]
pub struct ProbeOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    /// Probe again this many times while the device is in normal mode
    #[arg(long, default_value_t = 0)]
    pub retries: u32,
    /// Pause between probes in milliseconds
    #[arg(long, default_value_t = 500)]
    pub retry_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct OptionsOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    /// Re-read the configuration every N ms and print it when it changes
    #[arg(long)]
    pub watch_ms: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct WatchOpts {
    /// Scan interval in milliseconds
    #[arg(long, default_value_t = 1_000)]
    pub interval_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_set() {
        let cli = Cli::try_parse_from([
            "bootlink",
            "set",
            "--dev",
            "/dev/ttyUSB3",
            "--legacy-wire",
            "baud",
            "9600",
        ])
        .unwrap();
        match cli.cmd {
            Cmd::Set(opts) => {
                assert_eq!(opts.ser.dev, "/dev/ttyUSB3");
                assert_eq!(opts.ser.wire_style(), WireStyle::Legacy);
                assert_eq!(opts.name, "baud");
                assert_eq!(opts.value, "9600");
            }
            other => panic!("wrong subcommand {:?}", other),
        }
    }

    #[test]
    fn parse_probe_retries() {
        let cli = Cli::try_parse_from(["bootlink", "--debug", "probe", "--retries", "3"]).unwrap();
        assert!(cli.debug);
        match cli.cmd {
            Cmd::Probe(opts) => {
                assert_eq!(opts.retries, 3);
                assert_eq!(opts.retry_ms, 500);
            }
            other => panic!("wrong subcommand {:?}", other),
        }
    }

    #[test]
    fn defaults_match() {
        let cli = Cli::try_parse_from(["bootlink", "options"]).unwrap();
        match cli.cmd {
            Cmd::Options(OptionsOpts { ser: opts, watch_ms }) => {
                assert_eq!(watch_ms, None);
                let d = SerialOpts::default();
                assert_eq!(opts.dev, d.dev);
                assert_eq!(opts.baud, d.baud);
                assert_eq!(opts.idle_timeout(), Duration::from_millis(2_000));
                assert_eq!(opts.wire_style(), WireStyle::Clean);
            }
            other => panic!("wrong subcommand {:?}", other),
        }
    }
}
