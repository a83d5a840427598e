//! Domain pipeline lookup by operation category

use crate::execution::{CategoryPipeline, DomainPipeline};
use crate::models::OperationCategory;
use dashmap::DashMap;
use std::sync::Arc;

/// Registered pipelines; unregistered categories get a `CategoryPipeline`
#[derive(Default)]
pub struct PipelineRegistry {
    pipelines: DashMap<OperationCategory, Arc<dyn DomainPipeline>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pipeline for its category, returning the one it replaced
    pub fn register(&self, pipeline: Arc<dyn DomainPipeline>) -> Option<Arc<dyn DomainPipeline>> {
        self.pipelines.insert(pipeline.category(), pipeline)
    }

    pub fn get(&self, category: OperationCategory) -> Arc<dyn DomainPipeline> {
        self.pipelines
            .get(&category)
            .map(|p| p.value().clone())
            .unwrap_or_else(|| Arc::new(CategoryPipeline::new(category)))
    }

    pub fn is_registered(&self, category: OperationCategory) -> bool {
        self.pipelines.contains_key(&category)
    }
}
