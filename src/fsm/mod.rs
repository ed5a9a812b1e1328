//! Finite state machine engine for device dialogs.
//!
//! Every dialog in the engine (protocol handshakes, authentication,
//! command execution, reloads) is a small state machine reacting to
//! regular-expression events on the session byte stream. A machine is a
//! list of expected events plus transition rows
//! `(event, states, next state, action, timeout)`; state `-1` terminates
//! with success.

mod actions;

pub use actions::*;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, warn};
use regex::Regex;

use crate::controller::Controller;
use crate::device::Device;
use crate::error::{Error, Result};

/// One expected event on the session stream.
#[derive(Debug, Clone)]
pub enum FsmEvent {
    /// A regular expression over the incoming bytes.
    Pattern(Regex),
    /// No event arrived within the running timeout.
    Timeout,
    /// The child process closed the stream.
    Eof,
}

impl FsmEvent {
    pub fn pattern(&self) -> Option<&Regex> {
        match self {
            FsmEvent::Pattern(re) => Some(re),
            _ => None,
        }
    }
}

impl From<Regex> for FsmEvent {
    fn from(re: Regex) -> Self {
        FsmEvent::Pattern(re)
    }
}

/// Action attached to a transition row.
pub enum FsmAction {
    /// Pure state transition.
    None,
    /// Terminate the machine by raising the produced error.
    Raise(Box<dyn Fn() -> Error + Send + Sync>),
    /// Invoke a semantic action; returning `false` stops the machine
    /// with a failure outcome.
    Run(Box<dyn Action>),
}

impl FsmAction {
    pub fn run(action: impl Action + 'static) -> Self {
        FsmAction::Run(Box::new(action))
    }

    pub fn raise(make: impl Fn() -> Error + Send + Sync + 'static) -> Self {
        FsmAction::Raise(Box::new(make))
    }
}

impl std::fmt::Debug for FsmAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FsmAction::None => f.write_str("None"),
            FsmAction::Raise(_) => f.write_str("Raise"),
            FsmAction::Run(_) => f.write_str("Run"),
        }
    }
}

/// Semantic action invoked with the running context.
#[async_trait]
pub trait Action: Send + Sync {
    async fn run(&self, ctx: &mut FsmContext<'_>) -> Result<bool>;
}

/// Per-run mutable state handed to actions.
pub struct FsmContext<'a> {
    pub name: &'a str,
    pub device: &'a mut Device,
    pub ctrl: &'a mut Controller,
    /// Index of the event that fired last.
    pub event: usize,
    pub state: i32,
    /// Actions may set this to finish the machine successfully.
    pub finished: bool,
    /// Failure message posted to the log when an action returns `false`.
    pub msg: String,
    /// Pattern of the event that fired last, if it was a pattern event.
    pub pattern: Option<Regex>,
    /// Pattern stashed by [`SaveLastPattern`] for the next dialog.
    pub saved_pattern: Option<Regex>,
}

/// One transition row.
#[derive(Debug)]
pub struct Transition {
    pub event: usize,
    pub states: Vec<i32>,
    pub next_state: i32,
    pub action: FsmAction,
    /// Replaces the running timeout when non-zero.
    pub timeout: Duration,
}

impl Transition {
    pub fn new(
        event: usize,
        states: &[i32],
        next_state: i32,
        action: FsmAction,
        timeout: Duration,
    ) -> Self {
        Self {
            event,
            states: states.to_vec(),
            next_state,
            action,
            timeout,
        }
    }
}

/// Result of a finished machine that did not raise.
#[derive(Debug, Default)]
pub struct FsmOutcome {
    pub success: bool,
    pub message: String,
    pub saved_pattern: Option<Regex>,
}

/// A compiled dialog machine.
pub struct Fsm {
    name: String,
    events: Vec<FsmEvent>,
    transitions: Vec<Transition>,
    table: HashMap<(usize, i32), usize>,
    timeout: Duration,
    init_pattern: Option<Regex>,
    search_window: Option<usize>,
    max_transitions: usize,
}

impl Fsm {
    /// Compile the transition rows into an `(event, state)` lookup table.
    ///
    /// Rows referencing an event index outside the event list are dropped
    /// with a log entry, mirroring how unknown transitions are tolerated
    /// at run time.
    pub fn new(
        name: impl Into<String>,
        events: Vec<FsmEvent>,
        transitions: Vec<Transition>,
        timeout: Duration,
    ) -> Self {
        let mut table = HashMap::new();
        for (index, transition) in transitions.iter().enumerate() {
            if transition.event >= events.len() {
                debug!("transition for non-existing event: {}", transition.event);
                continue;
            }
            for &state in &transition.states {
                table.insert((transition.event, state), index);
            }
        }
        Self {
            name: name.into(),
            events,
            transitions,
            table,
            timeout,
            init_pattern: None,
            search_window: None,
            max_transitions: 20,
        }
    }

    /// Force the first event from the pattern that terminated the
    /// previous dialog instead of expecting.
    pub fn with_init_pattern(mut self, pattern: Option<Regex>) -> Self {
        self.init_pattern = pattern;
        self
    }

    pub fn with_search_window(mut self, window: usize) -> Self {
        self.search_window = Some(window);
        self
    }

    pub fn with_max_transitions(mut self, max: usize) -> Self {
        self.max_transitions = max;
        self
    }

    /// Drive the machine until terminal state, failure, or the
    /// transition budget runs out.
    ///
    /// # Errors
    ///
    /// Propagates errors raised by actions and connection errors from the
    /// controller (EOF while expecting is always a connection error).
    pub async fn run(
        &mut self,
        device: &mut Device,
        ctrl: &mut Controller,
    ) -> Result<FsmOutcome> {
        debug!("{} start", self.name);
        let fsm_name = self.name.clone();
        let mut ctx = FsmContext {
            name: &fsm_name,
            device,
            ctrl,
            event: 0,
            state: 0,
            finished: false,
            msg: String::new(),
            pattern: None,
            saved_pattern: None,
        };

        let mut timeout = self.timeout;
        let mut transition_counter = 0;
        while transition_counter < self.max_transitions {
            transition_counter += 1;

            let event = match self.init_pattern.take() {
                Some(init) => {
                    debug!("{} INIT_PATTERN={}", self.name, init.as_str());
                    match self
                        .events
                        .iter()
                        .position(|e| matches!(e, FsmEvent::Pattern(re) if re.as_str() == init.as_str()))
                    {
                        Some(index) => index,
                        None => {
                            error!("{} INIT_PATTERN unknown", self.name);
                            continue;
                        }
                    }
                }
                None => {
                    ctx.ctrl
                        .expect(&self.events, timeout, self.search_window)
                        .await?
                }
            };

            ctx.event = event;
            ctx.pattern = self.events[event].pattern().cloned();

            let Some(&row) = self.table.get(&(event, ctx.state)) else {
                warn!(
                    "{} unknown transition: EVENT={},STATE={}",
                    self.name, event, ctx.state
                );
                continue;
            };
            let transition = &self.transitions[row];
            debug!(
                "{} E={},S={},T={:?}",
                self.name, event, ctx.state, timeout
            );

            match &transition.action {
                FsmAction::None => debug!("A=none"),
                FsmAction::Raise(make) => {
                    let error = make();
                    debug!("A=raise {}", error);
                    return Err(error);
                }
                FsmAction::Run(action) => {
                    if !action.run(&mut ctx).await? {
                        error!("{} error: {}", self.name, ctx.msg);
                        return Ok(FsmOutcome {
                            success: false,
                            message: std::mem::take(&mut ctx.msg),
                            saved_pattern: ctx.saved_pattern.take(),
                        });
                    }
                }
            }

            if !transition.timeout.is_zero() {
                timeout = transition.timeout;
            }
            ctx.state = transition.next_state;
            debug!("{} NS={},NT={:?}", self.name, ctx.state, timeout);

            if ctx.finished || ctx.state == -1 {
                debug!("{} stop at E={},S={}", self.name, ctx.event, ctx.state);
                return Ok(FsmOutcome {
                    success: true,
                    message: std::mem::take(&mut ctx.msg),
                    saved_pattern: ctx.saved_pattern.take(),
                });
            }
        }

        error!("{} looped, exiting", self.name);
        Ok(FsmOutcome {
            success: false,
            message: "too many transitions".to_string(),
            saved_pattern: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::FsmEvent::{Eof, Timeout};

    fn re(s: &str) -> Regex {
        Regex::new(s).unwrap()
    }

    #[test]
    fn test_compile_stable() {
        let make = || {
            Fsm::new(
                "TEST",
                vec![re("a").into(), re("b").into(), Timeout, Eof],
                vec![
                    Transition::new(0, &[0, 1], 1, FsmAction::None, Duration::ZERO),
                    Transition::new(1, &[1], -1, FsmAction::None, Duration::from_secs(5)),
                    Transition::new(2, &[0], -1, FsmAction::None, Duration::ZERO),
                ],
                Duration::from_secs(10),
            )
        };
        let a = make();
        let b = make();
        let mut keys_a: Vec<_> = a.table.iter().map(|(k, v)| (*k, *v)).collect();
        let mut keys_b: Vec<_> = b.table.iter().map(|(k, v)| (*k, *v)).collect();
        keys_a.sort();
        keys_b.sort();
        assert_eq!(keys_a, keys_b);
        assert_eq!(keys_a.len(), 4);
    }

    #[test]
    fn test_rows_for_unknown_events_are_dropped() {
        let fsm = Fsm::new(
            "TEST",
            vec![re("a").into()],
            vec![
                Transition::new(0, &[0], -1, FsmAction::None, Duration::ZERO),
                Transition::new(7, &[0], -1, FsmAction::None, Duration::ZERO),
            ],
            Duration::from_secs(10),
        );
        assert_eq!(fsm.table.len(), 1);
    }

    #[test]
    fn test_later_row_wins_on_duplicate_key() {
        let fsm = Fsm::new(
            "TEST",
            vec![re("a").into()],
            vec![
                Transition::new(0, &[0], 1, FsmAction::None, Duration::ZERO),
                Transition::new(0, &[0], 2, FsmAction::None, Duration::ZERO),
            ],
            Duration::from_secs(10),
        );
        assert_eq!(fsm.table[&(0, 0)], 1);
    }
}
