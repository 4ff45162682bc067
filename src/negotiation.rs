//! Probe → enumerate → fetch state machine.
//!
//! [`transition`] is pure: it never touches the queue or the transport. The
//! session applies the returned [`Effect`]s in order.

use log::{debug, info, warn};

use crate::proto::command::{ActionContext, ActionSpec, ConfigOption};
use crate::proto::parser::{ParseError, is_bootloader_reply, parse_options, trim_response};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Disconnected,
    /// TEST sent, waiting for the mode reply.
    Probing,
    /// Device answered TEST with something other than the bootloader sentinel.
    NormalMode,
    /// OPTIONS requested (bootloader confirmed or re-enumeration after a save).
    EnumeratingOptions,
    FetchingValues {
        pending: usize,
    },
    Ready,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Negotiation {
    pub phase: Phase,
    /// Bumped on every OPTIONS reply; GETs of older rounds are stale.
    pub round: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected,
    ProbeRequested,
    OptionsRequested,
    SaveRequested { name: String, value: String },
    Response { context: ActionContext, line: String },
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Enqueue(ActionSpec),
    SetBootloader(bool),
    ReplaceOptions(Vec<ConfigOption>),
    SetValue { index: usize, value: String },
    MarkModified { name: String, value: String },
    /// Every value of the current round has been fetched.
    OptionsReady,
    OptionsFailed(ParseError),
    ClearOptions,
    CancelPending,
}

pub fn transition(state: Negotiation, event: Event) -> (Negotiation, Vec<Effect>) {
    let at = |phase| Negotiation { phase, ..state };

    match event {
        Event::Connected | Event::ProbeRequested => {
            (at(Phase::Probing), vec![Effect::Enqueue(ActionSpec::test())])
        }
        Event::OptionsRequested => (
            at(Phase::EnumeratingOptions),
            vec![Effect::Enqueue(ActionSpec::options())],
        ),
        Event::SaveRequested { name, value } => {
            let set = ActionSpec::set(&name, &value);
            (
                at(Phase::EnumeratingOptions),
                vec![
                    Effect::Enqueue(set),
                    Effect::MarkModified { name, value },
                    Effect::Enqueue(ActionSpec::options()),
                ],
            )
        }
        Event::Disconnected => (
            Negotiation::default(),
            vec![
                Effect::CancelPending,
                Effect::SetBootloader(false),
                Effect::ClearOptions,
            ],
        ),
        Event::Response { context, line } => on_response(state, context, &line),
    }
}

fn on_response(state: Negotiation, context: ActionContext, line: &str) -> (Negotiation, Vec<Effect>) {
    match context {
        ActionContext::Test => {
            if is_bootloader_reply(line) {
                info!("device is in bootloader mode");
                (
                    Negotiation {
                        phase: Phase::EnumeratingOptions,
                        ..state
                    },
                    vec![
                        Effect::SetBootloader(true),
                        Effect::Enqueue(ActionSpec::options()),
                    ],
                )
            } else if state.phase == Phase::Probing {
                info!("device is in normal mode ({:?})", trim_response(line));
                (
                    Negotiation {
                        phase: Phase::NormalMode,
                        ..state
                    },
                    Vec::new(),
                )
            } else {
                debug!(
                    "ignoring test reply {:?} in {:?}",
                    trim_response(line),
                    state.phase
                );
                (state, Vec::new())
            }
        }
        ActionContext::Options => on_options(state, line),
        ActionContext::Get { index, round } => on_get(state, index, round, line),
        ActionContext::Set { name } => {
            info!("set {}: {}", name, trim_response(line));
            (state, Vec::new())
        }
        ActionContext::Reboot => {
            info!("reboot: {}", trim_response(line));
            (state, Vec::new())
        }
    }
}

/// Every OPTIONS reply starts a new round and replaces the whole collection,
/// including a reply that fails to parse.
fn on_options(state: Negotiation, line: &str) -> (Negotiation, Vec<Effect>) {
    let round = state.round.wrapping_add(1);
    let options = match parse_options(line) {
        Ok(options) => options,
        Err(e) => {
            warn!("bad options reply: {}", e);
            return (
                Negotiation {
                    phase: Phase::Ready,
                    round,
                },
                vec![Effect::ReplaceOptions(Vec::new()), Effect::OptionsFailed(e)],
            );
        }
    };

    let mut effects = Vec::with_capacity(options.len() + 2);
    let gets: Vec<Effect> = options
        .iter()
        .enumerate()
        .map(|(index, opt)| Effect::Enqueue(ActionSpec::get(&opt.name, index, round)))
        .collect();
    let pending = gets.len();
    effects.push(Effect::ReplaceOptions(options));
    effects.extend(gets);

    let phase = if pending == 0 {
        effects.push(Effect::OptionsReady);
        Phase::Ready
    } else {
        Phase::FetchingValues { pending }
    };
    (Negotiation { phase, round }, effects)
}

fn on_get(state: Negotiation, index: usize, round: u32, line: &str) -> (Negotiation, Vec<Effect>) {
    if round != state.round {
        return (state, Vec::new());
    }
    let mut effects = vec![Effect::SetValue {
        index,
        value: line.to_string(),
    }];
    let phase = match state.phase {
        Phase::FetchingValues { pending } if pending > 1 => Phase::FetchingValues {
            pending: pending - 1,
        },
        Phase::FetchingValues { .. } => {
            effects.push(Effect::OptionsReady);
            Phase::Ready
        }
        other => other,
    };
    (Negotiation { phase, ..state }, effects)
}
