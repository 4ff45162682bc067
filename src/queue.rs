//! Strictly ordered command queue.
//!
//! The head of a non-empty queue is the single request on the wire. Replies
//! carry no identifier, so each received line retires whatever sits at the
//! head.

use log::{debug, error, warn};
use std::collections::VecDeque;

use crate::port::LineTransport;
use crate::proto::command::{Action, ActionContext, Command, Reply};
use crate::proto::parser::{WireStyle, format_request};

/// An action that has left the queue together with the line that retired it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retired {
    pub command: Command,
    pub context: ActionContext,
    pub response: String,
}

#[derive(Debug, Default)]
pub struct CommandQueue {
    pending: VecDeque<Action>,
    style: WireStyle,
}

impl CommandQueue {
    pub fn new(style: WireStyle) -> Self {
        Self {
            pending: VecDeque::new(),
            style,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The action currently awaiting its reply.
    pub fn outstanding(&self) -> Option<&Action> {
        self.pending.front()
    }

    /// Append `action`; writes it straight away if nothing was outstanding.
    pub fn enqueue(&mut self, transport: &mut dyn LineTransport, action: Action) {
        let was_idle = self.pending.is_empty();
        self.pending.push_back(action);
        if was_idle {
            self.dispatch_head(transport);
        } else {
            debug!("queued behind {} pending", self.pending.len() - 1);
        }
    }

    /// Retire the head with `line`, put the next request on the wire, then
    /// run the retired completion.
    pub fn on_line(&mut self, transport: &mut dyn LineTransport, line: &str) -> Option<Retired> {
        let Some(head) = self.pending.pop_front() else {
            warn!("unexpected response with nothing outstanding: {:?}", line);
            return None;
        };
        if !self.pending.is_empty() {
            self.dispatch_head(transport);
        }

        let (spec, completion) = head.into_parts();
        if let Some(done) = completion {
            done(Reply::Response(line));
        }
        Some(Retired {
            command: spec.command(),
            context: spec.context,
            response: line.to_string(),
        })
    }

    /// Drop every pending action, telling each completion it was cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let n = self.pending.len();
        for action in self.pending.drain(..) {
            let (_, completion) = action.into_parts();
            if let Some(done) = completion {
                done(Reply::Cancelled);
            }
        }
        n
    }

    fn dispatch_head(&mut self, transport: &mut dyn LineTransport) {
        let Some(head) = self.pending.front() else {
            return;
        };
        let line = format_request(head.command(), head.parameter(), self.style);
        debug!("-> {:?}", line);
        // The action stays outstanding on failure; nothing retries it.
        if let Err(e) = transport.write_line(&line) {
            error!("could not send {}: {}", head.command(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{MockLineTransport, TransportError};
    use crate::proto::command::ActionSpec;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Transport that records every written line.
    #[derive(Default)]
    struct Recorder {
        lines: Vec<String>,
    }

    impl LineTransport for Recorder {
        fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
            self.lines.push(line.to_string());
            Ok(())
        }
        fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn logged(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Action {
        let log = Arc::clone(log);
        Action::new(ActionSpec::get(tag, 0, 0)).with_completion(move |reply| {
            let entry = match reply {
                Reply::Response(r) => format!("{}={}", tag, r),
                Reply::Cancelled => format!("{}=cancelled", tag),
            };
            log.lock().unwrap().push(entry);
        })
    }

    #[test]
    fn enqueue_into_empty_dispatches_once() {
        let mut t = Recorder::default();
        let mut q = CommandQueue::new(WireStyle::Clean);
        q.enqueue(&mut t, ActionSpec::test().into());
        assert_eq!(t.lines, vec!["test\n"]);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn enqueue_behind_head_waits() {
        let mut t = Recorder::default();
        let mut q = CommandQueue::new(WireStyle::Clean);
        q.enqueue(&mut t, ActionSpec::test().into());
        q.enqueue(&mut t, ActionSpec::options().into());
        q.enqueue(&mut t, ActionSpec::get("a", 0, 1).into());
        assert_eq!(t.lines, vec!["test\n"]);
        assert_eq!(q.len(), 3);

        q.on_line(&mut t, "x");
        assert_eq!(t.lines, vec!["test\n", "options\n"]);
        q.on_line(&mut t, "y");
        assert_eq!(t.lines.last().unwrap(), "get a\n");
        q.on_line(&mut t, "z");
        assert_eq!(t.lines.len(), 3);
        assert!(q.is_empty());
    }

    #[test]
    fn completions_fire_in_enqueue_order_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut t = Recorder::default();
        let mut q = CommandQueue::new(WireStyle::Clean);
        for tag in ["a", "b", "c", "d"] {
            q.enqueue(&mut t, logged(&log, tag));
        }
        for reply in ["1", "2", "3", "4"] {
            assert!(q.on_line(&mut t, reply).is_some());
        }
        // extra line retires nothing
        assert!(q.on_line(&mut t, "5").is_none());
        assert_eq!(*log.lock().unwrap(), vec!["a=1", "b=2", "c=3", "d=4"]);
    }

    #[test]
    fn unmatched_line_changes_nothing() {
        let mut t = MockLineTransport::new();
        t.expect_write_line().never();
        let mut q = CommandQueue::new(WireStyle::Clean);
        assert!(q.on_line(&mut t, "BOOT BANNER v1.2").is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn retired_carries_context() {
        let mut t = Recorder::default();
        let mut q = CommandQueue::new(WireStyle::Clean);
        q.enqueue(&mut t, ActionSpec::get("baud", 3, 7).into());
        let r = q.on_line(&mut t, "115200").unwrap();
        assert_eq!(r.command, Command::Get);
        assert_eq!(r.context, ActionContext::Get { index: 3, round: 7 });
        assert_eq!(r.response, "115200");
    }

    #[test]
    fn write_failure_leaves_action_outstanding() {
        let mut t = MockLineTransport::new();
        t.expect_write_line()
            .times(1)
            .returning(|_| Err(TransportError::Write(io::Error::other("unplugged"))));
        let mut q = CommandQueue::new(WireStyle::Clean);
        q.enqueue(&mut t, ActionSpec::test().into());
        q.enqueue(&mut t, ActionSpec::options().into());
        assert_eq!(q.len(), 2);
        assert_eq!(q.outstanding().unwrap().command(), Command::Test);
    }

    #[test]
    fn legacy_style_reaches_wire() {
        let mut t = MockLineTransport::new();
        t.expect_write_line()
            .withf(|line| line == "options undefined\n")
            .times(1)
            .returning(|_| Ok(()));
        let mut q = CommandQueue::new(WireStyle::Legacy);
        q.enqueue(&mut t, ActionSpec::options().into());
    }

    #[test]
    fn cancel_all_notifies_every_completion() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut t = Recorder::default();
        let mut q = CommandQueue::new(WireStyle::Clean);
        q.enqueue(&mut t, logged(&log, "a"));
        q.enqueue(&mut t, logged(&log, "b"));
        assert_eq!(q.cancel_all(), 2);
        assert!(q.is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["a=cancelled", "b=cancelled"]);
        // next enqueue dispatches again
        q.enqueue(&mut t, ActionSpec::test().into());
        assert_eq!(t.lines.last().unwrap(), "test\n");
    }
}
