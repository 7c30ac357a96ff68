//! Pipeline-stage integration.
//!
//! The question-answering workflow passes an explicit state value between
//! stages. Each stage reads an immutable [`PipelineState`] and returns a
//! [`StagePatch`]; the runner applies the patch to produce the next state.
//! Nothing mutates shared state in place, which keeps stage composition and
//! testing straightforward.

pub mod retrieval;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use retrieval::{DOCUMENT_CONTEXT_KEY, RetrievalStage, RetrievalStageBuilder};

/// Company/year/form-type hints extracted by the upstream planning stage.
/// Every field is optional; an absent hint simply leaves the corresponding
/// search dimension unconstrained.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub company: Option<String>,
    pub year: Option<i64>,
    pub form_type: Option<String>,
}

/// Shared workflow state as one stage sees it.
#[derive(Clone, Debug, Default)]
pub struct PipelineState {
    /// The user's question, set once at workflow start.
    pub question: String,
    /// Hints from the planning stage.
    pub plan: ExecutionPlan,
    /// Accumulated stage outputs, keyed by stage-owned names.
    pub extra: FxHashMap<String, Value>,
}

impl PipelineState {
    pub fn new(question: impl Into<String>, plan: ExecutionPlan) -> Self {
        Self {
            question: question.into(),
            plan,
            extra: FxHashMap::default(),
        }
    }

    /// Return a copy of this state with the patch merged in. Keys already
    /// present are overwritten by the patch; everything else is kept.
    #[must_use]
    pub fn apply(&self, patch: StagePatch) -> PipelineState {
        let mut next = self.clone();
        if let Some(extra) = patch.extra {
            next.extra.extend(extra);
        }
        next
    }
}

/// Partial state update returned by a stage.
#[derive(Clone, Debug, Default)]
pub struct StagePatch {
    pub extra: Option<FxHashMap<String, Value>>,
}

impl StagePatch {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_extra(mut self, extra: FxHashMap<String, Value>) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Convenience for the common single-key case.
    #[must_use]
    pub fn with_entry(self, key: impl Into<String>, value: Value) -> Self {
        let mut extra = self.extra.unwrap_or_default();
        extra.insert(key.into(), value);
        Self { extra: Some(extra) }
    }
}

/// Fatal stage failure. Recoverable degradation (such as missing document
/// context) is expressed inside the patch instead, so the workflow keeps
/// moving.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("missing expected input: {what}")]
    MissingInput { what: &'static str },

    #[error("stage failed: {0}")]
    Failed(String),
}

/// One step of the question-answering workflow.
#[async_trait]
pub trait Stage: Send + Sync {
    async fn run(&self, state: &PipelineState) -> Result<StagePatch, StageError>;
}
