//! The booking lifecycle as a pure transition function.
//!
//! ```text
//!   new ──fund──▶ pending_acceptance ──accept──▶ pick_up ──confirm pick-up──▶ on_the_way ──drop-off──▶ delivered
//!                        │                          │                             │                    │    │
//!                  refuse/expire             conditions unmet              report problem          complete reject
//!                        ▼                          ▼                             ▼                    ▼    ▼
//!                    declined          all_conditions_are_not_met     problem_with_the_package  completed rejected
//!                                                                                                          │
//!                                                                               drop-off (again) ◀──────────┘
//! ```
//! Every non-terminal state can also be cancelled by either participant.
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::{ActorRole, BookingStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingAction {
    Fund,
    Accept,
    Refuse,
    Expire,
    ConfirmPickUp,
    ReportProblem,
    ReportConditionsUnmet,
    ConfirmDropOff,
    Complete,
    Reject,
    Cancel,
}

impl Display for BookingAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Fund => "fund",
            Self::Accept => "accept",
            Self::Refuse => "refuse",
            Self::Expire => "expire",
            Self::ConfirmPickUp => "confirm the pick-up of",
            Self::ReportProblem => "report a problem with",
            Self::ReportConditionsUnmet => "report unmet conditions for",
            Self::ConfirmDropOff => "confirm the drop-off of",
            Self::Complete => "complete",
            Self::Reject => "reject",
            Self::Cancel => "cancel",
        };
        f.write_str(s)
    }
}

impl BookingAction {
    /// The roles allowed to perform this action.
    pub fn allowed_roles(&self) -> &'static [ActorRole] {
        use ActorRole::*;
        match self {
            Self::Fund | Self::Expire => &[System],
            Self::Accept
            | Self::Refuse
            | Self::ConfirmPickUp
            | Self::ReportProblem
            | Self::ReportConditionsUnmet
            | Self::ConfirmDropOff => &[Traveler],
            Self::Complete | Self::Reject => &[Owner],
            Self::Cancel => &[Owner, Traveler],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("The {role} may not {action} a booking")]
    NotPermitted { action: BookingAction, role: ActorRole },
    #[error("Cannot {action} a booking that is {status}")]
    InvalidTransition { action: BookingAction, status: BookingStatus },
}

/// Returns the status a booking in `current` moves to when `role` performs `action`.
///
/// Authorization is checked before the current state, so a caller who may never perform an action learns nothing
/// about the booking's state.
pub fn next_status(
    current: BookingStatus,
    action: BookingAction,
    role: ActorRole,
) -> Result<BookingStatus, TransitionError> {
    use BookingAction as A;
    use BookingStatus as S;

    if !action.allowed_roles().contains(&role) {
        return Err(TransitionError::NotPermitted { action, role });
    }
    let next = match (action, current) {
        (A::Fund, S::New) => S::PendingAcceptance,
        (A::Accept, S::PendingAcceptance) => S::PickUp,
        (A::Refuse | A::Expire, S::PendingAcceptance) => S::Declined,
        (A::ConfirmPickUp, S::PickUp) => S::OnTheWay,
        (A::ReportConditionsUnmet, S::PickUp) => S::AllConditionsAreNotMet,
        (A::ReportProblem, S::OnTheWay) => S::ProblemWithThePackage,
        (A::ConfirmDropOff, S::OnTheWay | S::Rejected) => S::Delivered,
        (A::Complete, S::Delivered) => S::Completed,
        (A::Reject, S::Delivered) => S::Rejected,
        (A::Cancel, s) if !s.is_terminal() => S::Cancel,
        (action, status) => return Err(TransitionError::InvalidTransition { action, status }),
    };
    Ok(next)
}
