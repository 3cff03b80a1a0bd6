use serde::{Deserialize, Serialize};
use tracing::info;

use crate::agent::state::{Intent, RequestState, VerificationStatus};

pub const REJECTION_MESSAGE: &str = "Agent action rejected. Database modification aborted.";

/// Where a planned request goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Execute,
    AwaitHuman,
    TerminalError,
}

/// A human's answer to a pending write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    /// Only an explicit "approved" approves; everything else rejects.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("approved") {
            Decision::Approved
        } else {
            Decision::Rejected
        }
    }
}

/// Classifies a state. First matching rule wins.
pub fn route(state: &RequestState) -> Route {
    let status = state.verification_status;

    let route = if state.intent == Intent::Write && status == Some(VerificationStatus::Pending) {
        Route::AwaitHuman
    } else if state.intent == Intent::Read || status.is_some_and(VerificationStatus::is_approved) {
        Route::Execute
    } else {
        Route::TerminalError
    };

    info!("Routing intent={:?} status={:?} -> {:?}", state.intent, status, route);
    route
}

/// Applies a human decision to a paused state.
pub fn resume(mut state: RequestState, decision: Decision) -> RequestState {
    match decision {
        Decision::Approved => {
            info!("Human approved, re-entering the workflow");
            state.verification_status = Some(VerificationStatus::Approved);
        }
        Decision::Rejected => {
            info!("Human rejected the pending action");
            state.verification_status = Some(VerificationStatus::Rejected);
            state.response = REJECTION_MESSAGE.to_string();
        }
    }
    state
}

/// Message shown to the caller while a write waits for approval.
pub fn verification_message(state: &RequestState) -> String {
    format!(
        "HUMAN-IN-THE-LOOP REQUIRED\n\n\
         Proposed data modification requires your approval.\n\
         Database Target: `{}`\n\
         Proposed SQL: `{}`\n\
         Please confirm by providing your session ID and 'approved' status.",
        state.database_name.as_deref().unwrap_or_default(),
        state.sql_query.as_deref().unwrap_or_default()
    )
}
