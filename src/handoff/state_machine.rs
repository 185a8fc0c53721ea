use statig::prelude::*;
use tracing::{info, warn};

use super::types::HandoffPhase;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffEvent {
    SuccessorSpawned { successor_id: String },
    HealthConfirmed,
    /// The caller is the successor itself and has already confirmed health.
    Adopted,
    TakeoverCompleted,
    Fail { reason: String },
}

/// Phases of one handoff. `failed` is reachable from every phase and is
/// terminal; events that do not apply to the current phase are ignored.
#[derive(Debug, Default)]
pub struct HandoffFlow {
    pub predecessor_id: String,
    pub successor_id: Option<String>,
    pub failure: Option<String>,
    pub history: Vec<HandoffPhase>,
}

impl HandoffFlow {
    pub fn new(predecessor_id: impl Into<String>) -> Self {
        Self {
            predecessor_id: predecessor_id.into(),
            history: vec![HandoffPhase::Initiated],
            ..Default::default()
        }
    }

    fn enter(&mut self, phase: HandoffPhase) {
        info!(predecessor_id = %self.predecessor_id, phase = %phase, "handoff phase reached");
        self.history.push(phase);
    }

    fn fail(&mut self, reason: &str) -> Outcome<State> {
        warn!(predecessor_id = %self.predecessor_id, reason, "handoff failed");
        self.failure = Some(reason.to_string());
        self.enter(HandoffPhase::Failed);
        Transition(State::failed())
    }
}

#[state_machine(initial = "State::initiated()")]
impl HandoffFlow {
    #[state]
    fn initiated(&mut self, event: &HandoffEvent) -> Outcome<State> {
        match event {
            HandoffEvent::SuccessorSpawned { successor_id } => {
                self.successor_id = Some(successor_id.clone());
                self.enter(HandoffPhase::SuccessorSpawned);
                Transition(State::successor_spawned())
            }
            HandoffEvent::Adopted => {
                self.enter(HandoffPhase::HealthConfirmed);
                Transition(State::health_confirmed())
            }
            HandoffEvent::Fail { reason } => self.fail(reason),
            _ => Handled,
        }
    }

    #[state]
    fn successor_spawned(&mut self, event: &HandoffEvent) -> Outcome<State> {
        match event {
            HandoffEvent::HealthConfirmed | HandoffEvent::Adopted => {
                self.enter(HandoffPhase::HealthConfirmed);
                Transition(State::health_confirmed())
            }
            HandoffEvent::Fail { reason } => self.fail(reason),
            _ => Handled,
        }
    }

    #[state]
    fn health_confirmed(&mut self, event: &HandoffEvent) -> Outcome<State> {
        match event {
            HandoffEvent::TakeoverCompleted => {
                self.enter(HandoffPhase::TakeoverComplete);
                Transition(State::takeover_complete())
            }
            HandoffEvent::Fail { reason } => self.fail(reason),
            _ => Handled,
        }
    }

    #[state]
    fn takeover_complete(&mut self, event: &HandoffEvent) -> Outcome<State> {
        match event {
            HandoffEvent::Fail { reason } => self.fail(reason),
            _ => Handled,
        }
    }

    #[state]
    fn failed(&mut self, event: &HandoffEvent) -> Outcome<State> {
        if let HandoffEvent::Fail { reason } = event {
            warn!(predecessor_id = %self.predecessor_id, reason, "handoff already failed");
        }
        Handled
    }
}

impl HandoffFlow {
    /// Current phase; the last entry of the transition history.
    pub fn phase(&self) -> HandoffPhase {
        self.history
            .last()
            .copied()
            .unwrap_or(HandoffPhase::Initiated)
    }
}
