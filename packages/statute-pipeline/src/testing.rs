//! Testing utilities including a mock oracle.
//!
//! Useful for exercising the pipeline without real LLM or network calls.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::json;

use crate::error::{PipelineError, Result};
use crate::traits::{Oracle, OracleOptions};

/// One oracle call as the mock observed it.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system: String,
    pub user: String,
    pub model: Option<String>,
}

/// A scripted, deterministic [`Oracle`] for tests.
///
/// Responses are selected by substring match against the concatenated
/// system instruction and user message; the most recently registered match
/// wins. Unmatched calls fall back to an empty response shaped after the
/// prompt kind. Cloning is cheap and clones share scripts and call history.
#[derive(Clone, Default)]
pub struct MockOracle {
    responses: Arc<RwLock<Vec<(Vec<String>, serde_json::Value)>>>,
    failures: Arc<RwLock<Vec<String>>>,
    calls: Arc<RwLock<Vec<RecordedCall>>>,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a response for calls whose prompt contains `needle`.
    pub fn with_response(self, needle: impl Into<String>, response: serde_json::Value) -> Self {
        self.responses
            .write()
            .unwrap()
            .push((vec![needle.into()], response));
        self
    }

    /// Script a response for calls whose prompt contains every needle.
    pub fn with_response_when(self, needles: &[&str], response: serde_json::Value) -> Self {
        self.responses
            .write()
            .unwrap()
            .push((needles.iter().map(|n| n.to_string()).collect(), response));
        self
    }

    /// Script a failure for calls whose prompt contains `needle`.
    pub fn with_failure(self, needle: impl Into<String>) -> Self {
        self.failures.write().unwrap().push(needle.into());
        self
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    /// Empty response matching the shape the prompt asks for.
    fn default_response(system_instruction: &str) -> serde_json::Value {
        if system_instruction.contains("summary") {
            json!({ "summary": "Mock summary." })
        } else if system_instruction.contains("rules") {
            json!({ "rules": [] })
        } else {
            json!({ "provisions": [] })
        }
    }
}

#[async_trait]
impl Oracle for MockOracle {
    async fn call(
        &self,
        system_instruction: &str,
        user_message: &str,
        options: &OracleOptions,
    ) -> Result<serde_json::Value> {
        self.calls.write().unwrap().push(RecordedCall {
            system: system_instruction.to_string(),
            user: user_message.to_string(),
            model: options.model.clone(),
        });

        let haystack = format!("{system_instruction}\n{user_message}");

        if self
            .failures
            .read()
            .unwrap()
            .iter()
            .any(|needle| haystack.contains(needle))
        {
            return Err(PipelineError::oracle("mock oracle failure"));
        }

        let responses = self.responses.read().unwrap();
        for (needles, response) in responses.iter().rev() {
            if needles.iter().all(|needle| haystack.contains(needle)) {
                return Ok(response.clone());
            }
        }

        Ok(Self::default_response(system_instruction))
    }
}
