//! Aggregate workload profile over recent analyses

use crate::analysis::primary_reason;
use crate::models::{Characteristic, WorkloadAnalysis};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

pub const DEFAULT_PROFILE_WINDOW: usize = 50;

#[derive(Debug)]
pub struct ProfileWindow {
    analyses: Mutex<VecDeque<WorkloadAnalysis>>,
    capacity: usize,
}

impl Default for ProfileWindow {
    fn default() -> Self {
        Self::new(DEFAULT_PROFILE_WINDOW)
    }
}

impl ProfileWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            analyses: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, analysis: WorkloadAnalysis) {
        let mut analyses = self.analyses.lock().unwrap_or_else(|e| e.into_inner());
        while analyses.len() >= self.capacity {
            analyses.pop_front();
        }
        analyses.push_back(analysis);
    }

    pub fn len(&self) -> usize {
        self.analyses.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mean of every characteristic across the window. The aggregate is
    /// sequential when most of the analyses were.
    pub fn aggregate(&self) -> Option<WorkloadAnalysis> {
        let analyses: Vec<WorkloadAnalysis> = self
            .analyses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        if analyses.is_empty() {
            return None;
        }

        let n = analyses.len() as f64;
        let mut scores: BTreeMap<Characteristic, f64> = BTreeMap::new();
        for characteristic in Characteristic::PRIORITY {
            let mean = analyses.iter().map(|a| a.score(characteristic)).sum::<f64>() / n;
            scores.insert(characteristic, mean);
        }
        let sequential = analyses.iter().filter(|a| a.sequential).count() * 2 > analyses.len();

        Some(WorkloadAnalysis {
            primary_reason: primary_reason(&scores),
            confidence: analyses.iter().map(|a| a.confidence).sum::<f64>() / n,
            sequential,
            scores,
        })
    }
}
