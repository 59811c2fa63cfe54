//! Named pipelines available for submission.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::config::PipelineConfig;
use crate::stage::{CommandStage, PipelineStage};

/// Static description of one stage, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct StageInfo {
    pub name: String,
    pub display_name: String,
    pub weight: u32,
    pub timeout_secs: u64,
    pub supports_retry: bool,
    pub max_retry_attempts: u32,
    pub supports_resume: bool,
}

/// Static description of one pipeline, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineInfo {
    pub name: String,
    pub stages: Vec<StageInfo>,
}

/// Registry that maps pipeline names to their ordered stages.
#[derive(Default)]
pub struct PipelineRegistry {
    pipelines: BTreeMap<String, Arc<[Arc<dyn PipelineStage>]>>,
}

impl PipelineRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build command-backed pipelines from configuration.
    pub fn from_config(pipelines: &[PipelineConfig]) -> Self {
        let mut registry = Self::new();
        for pipeline in pipelines {
            let stages = pipeline
                .stages
                .iter()
                .map(|stage| Arc::new(CommandStage::from_config(stage)) as Arc<dyn PipelineStage>)
                .collect();
            registry.register(&pipeline.name, stages);
        }
        registry
    }

    /// Register (or replace) a pipeline.
    pub fn register(&mut self, name: &str, stages: Vec<Arc<dyn PipelineStage>>) {
        self.pipelines.insert(name.to_string(), stages.into());
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_pipeline(mut self, name: &str, stages: Vec<Arc<dyn PipelineStage>>) -> Self {
        self.register(name, stages);
        self
    }

    /// Get a pipeline's stages by name.
    pub fn get(&self, name: &str) -> Option<Arc<[Arc<dyn PipelineStage>]>> {
        self.pipelines.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pipelines.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn describe(&self) -> Vec<PipelineInfo> {
        self.pipelines
            .iter()
            .map(|(name, stages)| PipelineInfo {
                name: name.clone(),
                stages: stages
                    .iter()
                    .map(|stage| {
                        let d = stage.descriptor();
                        StageInfo {
                            name: d.name.clone(),
                            display_name: d.display_name.clone(),
                            weight: d.progress_weight,
                            timeout_secs: d.timeout.as_secs(),
                            supports_retry: d.supports_retry,
                            max_retry_attempts: d.max_retry_attempts,
                            supports_resume: d.supports_resume,
                        }
                    })
                    .collect(),
            })
            .collect()
    }
}
