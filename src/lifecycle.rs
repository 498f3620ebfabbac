//! Application state machine.
//!
//! Every status change in the crate is checked against [`allowed_next`]; nothing
//! else compares statuses to decide legality.

use crate::errors::{AppError, AppResult};
use crate::models::ApplicationStatus;

/// Legal successors for each status. Terminal states have none.
pub fn allowed_next(current: ApplicationStatus) -> &'static [ApplicationStatus] {
    use ApplicationStatus::*;
    match current {
        Draft => &[InProgress, Withdrawn],
        InProgress => &[ReadyToSubmit, Withdrawn],
        ReadyToSubmit => &[Submitted, Withdrawn],
        // Withdraw is accepted from every non-terminal status, SUBMITTED included.
        Submitted => &[UnderReview, Withdrawn],
        UnderReview => &[Awarded, Rejected, Withdrawn],
        Awarded | Rejected | Withdrawn => &[],
    }
}

pub fn can_transition(from: ApplicationStatus, to: ApplicationStatus) -> bool {
    allowed_next(from).contains(&to)
}

pub fn ensure_transition(application_id: &str, from: ApplicationStatus, to: ApplicationStatus) -> AppResult<()> {
    if can_transition(from, to) {
        return Ok(());
    }
    Err(AppError::InvalidState {
        message: format!(
            "Application {} cannot move from {} to {}",
            application_id,
            from.as_str(),
            to.as_str()
        ),
        current: from.as_str().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::{allowed_next, can_transition, ensure_transition};
    use crate::errors::AppError;
    use crate::models::ApplicationStatus;

    fn rank(status: ApplicationStatus) -> u8 {
        match status {
            ApplicationStatus::Draft => 0,
            ApplicationStatus::InProgress => 1,
            ApplicationStatus::ReadyToSubmit => 2,
            ApplicationStatus::Submitted => 3,
            ApplicationStatus::UnderReview => 4,
            ApplicationStatus::Awarded | ApplicationStatus::Rejected => 5,
            ApplicationStatus::Withdrawn => 6,
        }
    }

    #[test]
    fn every_edge_moves_forward() {
        for from in ApplicationStatus::ALL {
            for to in allowed_next(from) {
                assert!(rank(*to) > rank(from), "{:?} -> {:?} goes backwards", from, to);
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for status in ApplicationStatus::ALL {
            assert_eq!(status.is_terminal(), allowed_next(status).is_empty());
        }
    }

    #[test]
    fn no_implicit_skips() {
        assert!(!can_transition(ApplicationStatus::Draft, ApplicationStatus::ReadyToSubmit));
        assert!(!can_transition(ApplicationStatus::InProgress, ApplicationStatus::Submitted));
        assert!(!can_transition(ApplicationStatus::Submitted, ApplicationStatus::Awarded));
        assert!(can_transition(ApplicationStatus::UnderReview, ApplicationStatus::Withdrawn));
    }

    #[test]
    fn every_open_status_can_withdraw() {
        for status in ApplicationStatus::ALL.into_iter().filter(|status| !status.is_terminal()) {
            assert!(can_transition(status, ApplicationStatus::Withdrawn), "{:?}", status);
        }
    }

    #[test]
    fn rejection_reports_current_state() {
        match ensure_transition("app-1", ApplicationStatus::Awarded, ApplicationStatus::Withdrawn) {
            Err(AppError::InvalidState { current, message }) => {
                assert_eq!(current, "AWARDED");
                assert!(message.contains("app-1"));
            }
            other => panic!("expected invalid state, got {:?}", other),
        }
    }
}
