use serde::{Deserialize, Serialize};

/// One completion call: a system instruction plus the user turn.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    /// Ask the backend to constrain its output to a JSON object
    pub json_output: bool,
}

/// Structured output the planner asks the model for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    /// One of the registered database names
    pub database_name: String,
    /// Complete SQL statement
    pub sql_query: String,
    /// "read" for SELECT, "write" for anything that modifies data
    pub intent: String,
}
