use serde::{Deserialize, Serialize};

/// Whether a planned statement only reads or also modifies data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Read,
    Write,
    Unknown,
}

impl Intent {
    /// Parses the model's intent tag; anything but read/write is `Unknown`.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "read" => Intent::Read,
            "write" => Intent::Write,
            _ => Intent::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
    /// Write allowed without a human because approval is switched off
    ApprovedImplicit,
    Failed,
}

impl VerificationStatus {
    pub fn is_approved(self) -> bool {
        matches!(self, VerificationStatus::Approved | VerificationStatus::ApprovedImplicit)
    }
}

/// Which stage ended the request in failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Planning,
    RoutingImpossible,
    DatabaseNotFound,
    Execution,
}

/// The unit of work flowing through planner, gate and executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestState {
    query: String,
    pub database_name: Option<String>,
    pub sql_query: Option<String>,
    pub intent: Intent,
    pub verification_status: Option<VerificationStatus>,
    pub response: String,
    pub sql_only_request: bool,
    pub failure: Option<FailureKind>,
}

impl RequestState {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            database_name: None,
            sql_query: None,
            intent: Intent::Unknown,
            verification_status: None,
            response: String::new(),
            sql_only_request: false,
            failure: None,
        }
    }

    /// The original question; fixed for the lifetime of the state
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn is_pending(&self) -> bool {
        self.verification_status == Some(VerificationStatus::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        !self.response.is_empty() && !self.is_pending()
    }

    /// Ends the request with a failure and its user-facing message.
    pub fn fail(mut self, kind: FailureKind, message: impl Into<String>) -> Self {
        self.failure = Some(kind);
        self.response = message.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_tags_are_case_insensitive() {
        assert_eq!(Intent::from_tag(" READ "), Intent::Read);
        assert_eq!(Intent::from_tag("Write"), Intent::Write);
        assert_eq!(Intent::from_tag("ddl"), Intent::Unknown);
    }

    #[test]
    fn terminal_requires_response_and_no_pending() {
        let mut state = RequestState::new("q");
        assert!(!state.is_terminal());

        state.verification_status = Some(VerificationStatus::Pending);
        state.response = "awaiting approval".to_string();
        assert!(!state.is_terminal());

        state.verification_status = Some(VerificationStatus::Approved);
        assert!(state.is_terminal());
    }

    #[test]
    fn statuses_serialize_in_snake_case() {
        let json = serde_json::to_string(&VerificationStatus::ApprovedImplicit).unwrap();
        assert_eq!(json, "\"approved_implicit\"");
        assert_eq!(serde_json::to_string(&FailureKind::DatabaseNotFound).unwrap(), "\"database_not_found\"");
    }
}
