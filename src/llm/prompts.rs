use minijinja::{context, Environment};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::llm::LlmError;
use crate::llm::models::CompletionRequest;

const TEMPLATES: &[(&str, &str)] = &[
    ("plan_system.txt", include_str!("../../templates/plan_system.txt")),
    ("plan_user.txt", include_str!("../../templates/plan_user.txt")),
    ("summarize_system.txt", include_str!("../../templates/summarize_system.txt")),
    ("summarize_user.txt", include_str!("../../templates/summarize_user.txt")),
];

#[derive(Serialize)]
struct DatabasePrompt<'a> {
    name: &'a str,
    schema: &'a str,
}

/// Fixed prompt templates for planning and summarization.
pub struct PromptTemplates {
    env: Environment<'static>,
}

impl PromptTemplates {
    pub fn new() -> Result<Self, LlmError> {
        let mut env = Environment::new();
        for &(name, source) in TEMPLATES {
            env.add_template(name, source)?;
        }
        Ok(Self { env })
    }

    /// Prompt asking the model to choose a database and write one statement.
    pub fn plan_request(
        &self,
        query: &str,
        schemas: &BTreeMap<String, String>,
    ) -> Result<CompletionRequest, LlmError> {
        let databases: Vec<DatabasePrompt> = schemas
            .iter()
            .map(|(name, schema)| DatabasePrompt { name, schema })
            .collect();
        let example_name = schemas.keys().next().map(String::as_str).unwrap_or("db");

        let system = self.render(
            "plan_system.txt",
            context! { databases => databases, example_name => example_name },
        )?;
        let prompt = self.render("plan_user.txt", context! { query => query })?;

        debug!("Prepared planning prompt ({} bytes)", system.len() + prompt.len());
        Ok(CompletionRequest {
            system,
            prompt,
            json_output: true,
        })
    }

    pub fn summary_request(&self, query: &str, sql: &str, result: &str) -> Result<CompletionRequest, LlmError> {
        Ok(CompletionRequest {
            system: self.render("summarize_system.txt", context! {})?,
            prompt: self.render(
                "summarize_user.txt",
                context! { query => query, sql => sql, result => result },
            )?,
            json_output: false,
        })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String, LlmError> {
        Ok(self.env.get_template(name)?.render(ctx)?)
    }
}
