use log::{debug, error, info, warn};
use thiserror::Error;

use crate::negotiation::{Effect, Event, Negotiation, Phase, transition};
use crate::port::LineTransport;
use crate::proto::command::{Action, Command, ConfigOption};
use crate::proto::parser::{ParseError, WireStyle};
use crate::queue::CommandQueue;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no device connected")]
    NotConnected,
    #[error("a device is already connected")]
    AlreadyConnected,
}

/// The one attached device: its link, command queue and configuration.
pub struct Session {
    transport: Option<Box<dyn LineTransport>>,
    queue: CommandQueue,
    negotiation: Negotiation,
    bootloader: bool,
    options: Vec<ConfigOption>,
    ready: Option<Result<(), ParseError>>,
}

impl Session {
    pub fn new(style: WireStyle) -> Self {
        Self {
            transport: None,
            queue: CommandQueue::new(style),
            negotiation: Negotiation::default(),
            bootloader: false,
            options: Vec::new(),
            ready: None,
        }
    }

    pub fn connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn bootloader_mode(&self) -> bool {
        self.bootloader
    }

    pub fn phase(&self) -> Phase {
        self.negotiation.phase
    }

    pub fn options(&self) -> &[ConfigOption] {
        &self.options
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Command currently on the wire, if any.
    pub fn outstanding(&self) -> Option<Command> {
        self.queue.outstanding().map(Action::command)
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    /// Outcome of the last finished enumeration round, if not yet taken.
    pub fn take_ready(&mut self) -> Option<Result<(), ParseError>> {
        self.ready.take()
    }

    /// Attach an opened link and start probing the device.
    pub fn connect(&mut self, transport: Box<dyn LineTransport>) -> Result<(), SessionError> {
        if self.connected() {
            return Err(SessionError::AlreadyConnected);
        }
        self.transport = Some(transport);
        self.ready = None;
        self.handle(Event::Connected);
        Ok(())
    }

    /// Detach from the device. Pending actions are cancelled and the
    /// configuration is dropped even if closing the link fails.
    pub fn disconnect(&mut self) -> Result<(), SessionError> {
        if !self.connected() {
            return Err(SessionError::NotConnected);
        }
        self.handle(Event::Disconnected);
        if let Some(mut transport) = self.transport.take()
            && let Err(e) = transport.close()
        {
            error!("closing link: {}", e);
        }
        info!("disconnected");
        Ok(())
    }

    pub fn test_bootloader(&mut self) -> Result<(), SessionError> {
        self.require_connected()?;
        self.handle(Event::ProbeRequested);
        Ok(())
    }

    pub fn get_config_options(&mut self) -> Result<(), SessionError> {
        self.require_connected()?;
        self.ready = None;
        self.handle(Event::OptionsRequested);
        Ok(())
    }

    /// Write one option, then re-read every option from the device.
    ///
    /// The local value is updated and marked modified straight away. Any GET
    /// reply that retires afterwards overwrites it, and the re-enumeration
    /// replaces it with whatever the device reports.
    pub fn save_config(&mut self, name: &str, value: &str) -> Result<(), SessionError> {
        self.require_connected()?;
        self.ready = None;
        self.handle(Event::SaveRequested {
            name: name.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    /// Queue an arbitrary action; its reply still flows through negotiation.
    pub fn submit(&mut self, action: Action) -> Result<(), SessionError> {
        let transport = self
            .transport
            .as_deref_mut()
            .ok_or(SessionError::NotConnected)?;
        self.queue.enqueue(transport, action);
        Ok(())
    }

    /// Feed one received line.
    pub fn on_line(&mut self, line: &str) {
        let Some(transport) = self.transport.as_deref_mut() else {
            warn!("line while disconnected: {:?}", line);
            return;
        };
        if let Some(retired) = self.queue.on_line(transport, line) {
            debug!("{} <- {:?}", retired.command, retired.response);
            self.handle(Event::Response {
                context: retired.context,
                line: retired.response,
            });
        }
    }

    fn require_connected(&self) -> Result<(), SessionError> {
        if self.connected() {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }

    fn handle(&mut self, event: Event) {
        let (next, effects) = transition(self.negotiation, event);
        if next.phase != self.negotiation.phase {
            debug!("{:?} -> {:?}", self.negotiation.phase, next.phase);
        }
        self.negotiation = next;
        for effect in effects {
            self.apply(effect);
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Enqueue(spec) => match self.transport.as_deref_mut() {
                Some(transport) => self.queue.enqueue(transport, spec.into()),
                None => warn!("dropping {} while disconnected", spec.command()),
            },
            Effect::SetBootloader(on) => self.bootloader = on,
            Effect::ReplaceOptions(options) => self.options = options,
            Effect::SetValue { index, value } => match self.options.get_mut(index) {
                Some(opt) => opt.value = Some(value),
                None => warn!("value for unknown option #{}", index),
            },
            Effect::MarkModified { name, value } => {
                if let Some(opt) = self.options.iter_mut().find(|o| o.name == name) {
                    opt.value = Some(value);
                    opt.modified = true;
                }
            }
            Effect::OptionsReady => {
                info!("{} options fetched", self.options.len());
                self.ready = Some(Ok(()));
            }
            Effect::OptionsFailed(e) => self.ready = Some(Err(e)),
            Effect::ClearOptions => self.options.clear(),
            Effect::CancelPending => {
                let n = self.queue.cancel_all();
                if n > 0 {
                    info!("cancelled {} pending commands", n);
                }
            }
        }
    }
}
