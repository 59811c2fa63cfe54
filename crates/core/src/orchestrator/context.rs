//! Per-job state threaded through the stages of one run.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::stage::StageOutput;

/// State bag owned by exactly one orchestrator run.
///
/// Only the orchestrator writes `stage_outputs`, one slot per stage, from the
/// output the stage returned. Stages get a [`StageContext`] view instead.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    job_id: String,
    input: Value,
    stage_outputs: BTreeMap<String, StageOutput>,
    scratch: HashMap<String, Value>,
}

impl PipelineContext {
    pub fn new(job_id: impl Into<String>, input: Value) -> Self {
        Self::with_stage_outputs(job_id, input, BTreeMap::new())
    }

    /// Context for a resumed job, seeded with previously stored outputs.
    pub fn with_stage_outputs(
        job_id: impl Into<String>,
        input: Value,
        stage_outputs: BTreeMap<String, StageOutput>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            input,
            stage_outputs,
            scratch: HashMap::new(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn stage_outputs(&self) -> &BTreeMap<String, StageOutput> {
        &self.stage_outputs
    }

    pub fn output(&self, stage: &str) -> Option<&StageOutput> {
        self.stage_outputs.get(stage)
    }

    pub fn has_output(&self, stage: &str) -> bool {
        self.stage_outputs.contains_key(stage)
    }

    /// Artifact of the last stage, in the given order, that produced one.
    pub fn last_artifact<'a, I>(&self, stage_order: I) -> Option<&str>
    where
        I: IntoIterator<Item = &'a str>,
        I::IntoIter: DoubleEndedIterator,
    {
        stage_order
            .into_iter()
            .rev()
            .find_map(|name| self.output(name).and_then(|o| o.artifact.as_deref()))
    }

    pub(crate) fn record_output(&mut self, stage: &str, output: StageOutput) {
        self.stage_outputs.insert(stage.to_string(), output);
    }

    /// Borrow the view handed to `stage` for one attempt.
    pub fn stage_context(&mut self, stage: &str, attempt: u32) -> StageContext<'_> {
        let scratch = self
            .scratch
            .entry(stage.to_string())
            .or_insert(Value::Null);

        StageContext {
            job_id: &self.job_id,
            stage: stage.to_string(),
            attempt,
            input: &self.input,
            outputs: &self.stage_outputs,
            scratch,
        }
    }
}

/// A stage's view of the context during one attempt.
///
/// Other stages' outputs are read-only; the stage's own scratch value is
/// writable and survives retries within the same run.
pub struct StageContext<'a> {
    job_id: &'a str,
    stage: String,
    attempt: u32,
    input: &'a Value,
    outputs: &'a BTreeMap<String, StageOutput>,
    scratch: &'a mut Value,
}

impl StageContext<'_> {
    pub fn job_id(&self) -> &str {
        self.job_id
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn input(&self) -> &Value {
        self.input
    }

    /// Output of an earlier stage.
    pub fn output(&self, stage: &str) -> Option<&StageOutput> {
        self.outputs.get(stage)
    }

    pub fn outputs(&self) -> &BTreeMap<String, StageOutput> {
        self.outputs
    }

    pub fn scratch(&mut self) -> &mut Value {
        self.scratch
    }
}
