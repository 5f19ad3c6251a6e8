//! Invariant checks over one simulated launch.

use icetrip_core::{Decision, EventKind, PersistedData, Projection, Stage};
use serde::Serialize;

use crate::fakes::GatewayCalls;

// ── Trace ────────────────────────────────────────────────────────────────────

/// One delivered event and the snapshot right after it was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    /// Milliseconds of simulated time since launch.
    pub at_ms: u64,
    pub kind: EventKind,
    /// URL carried by `DestinationFetchSucceeded`.
    pub url: Option<String>,
    pub stage: Stage,
    pub locked: bool,
    pub destination: Option<String>,
}

/// Everything a finished launch leaves behind.
#[derive(Debug, Clone)]
pub struct LaunchRun {
    pub trace: Vec<TraceEntry>,
    pub projection: Projection,
    pub persisted: PersistedData,
    pub calls: GatewayCalls,
    /// Number of destination resolutions a single fetch may attempt.
    pub attempt_budget: usize,
    /// Push registrations made by the permission handler.
    pub registrations: usize,
}

// ── Result types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResult {
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }
}

/// A single broken invariant, with enough context to replay it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// `locked` went from true back to false.
    Unlocked { at_ms: u64 },
    /// Stage or destination changed after lock-in.
    MovedAfterLock {
        at_ms: u64,
        kind: EventKind,
        from: Option<String>,
        to: Option<String>,
    },
    /// Locked, but the stage does not carry the destination.
    ReadyMismatch { at_ms: u64, stage: Stage },
    /// A validation outcome arrived with no validation in flight.
    ValidationOutOfOrder { at_ms: u64, kind: EventKind },
    /// The launch timeout fired more than once.
    RepeatedTimeout { count: usize },
    /// The launch ended without anywhere to go.
    NoDecision,
    /// The final decision disagrees with the lock state.
    WrongDecision {
        locked: bool,
        decision: Option<Decision>,
    },
    /// A freshly resolved destination was not persisted.
    NotPersisted {
        expected: String,
        stored: Option<String>,
    },
    /// More destination calls than the retry budget allows.
    RetryBudgetExceeded { calls: usize, budget: usize },
    /// Push registration count differs from the number of grants.
    RegistrationMismatch { grants: usize, registrations: usize },
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unlocked { at_ms } => write!(f, "Unlocked: locked reverted at {at_ms}ms"),
            Self::MovedAfterLock {
                at_ms,
                kind,
                from,
                to,
            } => write!(
                f,
                "MovedAfterLock: {kind} at {at_ms}ms changed destination {from:?} -> {to:?}"
            ),
            Self::ReadyMismatch { at_ms, stage } => {
                write!(f, "ReadyMismatch: locked with stage {stage:?} at {at_ms}ms")
            }
            Self::ValidationOutOfOrder { at_ms, kind } => {
                write!(f, "ValidationOutOfOrder: {kind} at {at_ms}ms without a trigger")
            }
            Self::RepeatedTimeout { count } => {
                write!(f, "RepeatedTimeout: app_timed_out delivered {count} times")
            }
            Self::NoDecision => write!(f, "NoDecision: launch ended undecided"),
            Self::WrongDecision { locked, decision } => {
                write!(f, "WrongDecision: locked={locked} decision={decision:?}")
            }
            Self::NotPersisted { expected, stored } => {
                write!(f, "NotPersisted: expected {expected}, store has {stored:?}")
            }
            Self::RetryBudgetExceeded { calls, budget } => {
                write!(f, "RetryBudgetExceeded: {calls} destination calls, budget {budget}")
            }
            Self::RegistrationMismatch {
                grants,
                registrations,
            } => write!(
                f,
                "RegistrationMismatch: {grants} grants, {registrations} registrations"
            ),
        }
    }
}

// ── Oracle ───────────────────────────────────────────────────────────────────

pub struct LaunchOracle;

impl LaunchOracle {
    /// Run every check against `run`.
    #[must_use]
    pub fn check_all(run: &LaunchRun) -> OracleResult {
        let mut violations = Vec::new();
        check_lock_in(&run.trace, &mut violations);
        check_validation_order(&run.trace, &mut violations);
        check_timeout(&run.trace, &mut violations);
        check_decision(&run.projection, &mut violations);
        check_persisted(&run.trace, &run.persisted, &mut violations);
        check_retry_budget(run, &mut violations);
        check_registrations(run, &mut violations);
        OracleResult::from_violations(violations)
    }
}

fn check_lock_in(trace: &[TraceEntry], out: &mut Vec<InvariantViolation>) {
    let mut frozen: Option<&TraceEntry> = None;
    for entry in trace {
        if let Some(first) = frozen {
            if !entry.locked {
                out.push(InvariantViolation::Unlocked { at_ms: entry.at_ms });
            }
            if entry.stage != first.stage || entry.destination != first.destination {
                out.push(InvariantViolation::MovedAfterLock {
                    at_ms: entry.at_ms,
                    kind: entry.kind,
                    from: first.destination.clone(),
                    to: entry.destination.clone(),
                });
            }
        } else if entry.locked {
            frozen = Some(entry);
        }
        if entry.locked {
            let ready = matches!(
                (&entry.stage, &entry.destination),
                (Stage::Ready(url), Some(dest)) if url == dest
            );
            if !ready {
                out.push(InvariantViolation::ReadyMismatch {
                    at_ms: entry.at_ms,
                    stage: entry.stage.clone(),
                });
            }
        }
    }
}

fn check_validation_order(trace: &[TraceEntry], out: &mut Vec<InvariantViolation>) {
    let mut pending = 0_usize;
    for entry in trace {
        match entry.kind {
            EventKind::ValidationTriggered => pending += 1,
            EventKind::ValidationSucceeded | EventKind::ValidationFailed => {
                if pending == 0 {
                    out.push(InvariantViolation::ValidationOutOfOrder {
                        at_ms: entry.at_ms,
                        kind: entry.kind,
                    });
                } else {
                    pending -= 1;
                }
            }
            _ => {}
        }
    }
}

fn check_timeout(trace: &[TraceEntry], out: &mut Vec<InvariantViolation>) {
    let count = trace
        .iter()
        .filter(|entry| entry.kind == EventKind::AppTimedOut)
        .count();
    if count > 1 {
        out.push(InvariantViolation::RepeatedTimeout { count });
    }
}

fn check_decision(projection: &Projection, out: &mut Vec<InvariantViolation>) {
    let decision = projection.decision();
    let locked = projection.locked();
    let consistent = match &decision {
        None => {
            out.push(InvariantViolation::NoDecision);
            return;
        }
        Some(Decision::Destination(url)) => locked && projection.destination() == Some(url),
        Some(Decision::Home) => !locked,
        // The simulated user always answers the sheet.
        Some(Decision::PermissionPrompt(_)) => false,
    };
    if !consistent {
        out.push(InvariantViolation::WrongDecision { locked, decision });
    }
}

fn check_persisted(
    trace: &[TraceEntry],
    persisted: &PersistedData,
    out: &mut Vec<InvariantViolation>,
) {
    let locking = trace
        .iter()
        .find(|entry| entry.locked)
        .filter(|entry| entry.kind == EventKind::DestinationFetchSucceeded);
    let Some(expected) = locking.and_then(|entry| entry.url.clone()) else {
        return;
    };
    if persisted.url.as_deref() != Some(expected.as_str()) || persisted.is_new_install {
        out.push(InvariantViolation::NotPersisted {
            expected,
            stored: persisted.url.clone(),
        });
    }
}

fn check_retry_budget(run: &LaunchRun, out: &mut Vec<InvariantViolation>) {
    let fetches = run
        .trace
        .iter()
        .filter(|entry| entry.kind == EventKind::DestinationFetchTriggered)
        .count();
    let budget = fetches * run.attempt_budget;
    if run.calls.destination > budget {
        out.push(InvariantViolation::RetryBudgetExceeded {
            calls: run.calls.destination,
            budget,
        });
    }
}

fn check_registrations(run: &LaunchRun, out: &mut Vec<InvariantViolation>) {
    let grants = run
        .trace
        .iter()
        .filter(|entry| entry.kind == EventKind::PermissionGranted)
        .count();
    if grants != run.registrations {
        out.push(InvariantViolation::RegistrationMismatch {
            grants,
            registrations: run.registrations,
        });
    }
}
