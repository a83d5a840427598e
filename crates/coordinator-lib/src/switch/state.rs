//! Current-topology state and switch phases

use crate::models::Topology;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// Holder of the committed topology.
///
/// Anyone may read it; only the switch controller's commit step writes it.
/// While a switch attempt is running the cell is marked as switching so
/// periodic samplers leave the traffic window to the attempt.
#[derive(Debug)]
pub struct TopologyCell {
    current: RwLock<Topology>,
    switching: AtomicBool,
}

impl TopologyCell {
    pub fn new(initial: Topology) -> Self {
        Self {
            current: RwLock::new(initial),
            switching: AtomicBool::new(false),
        }
    }

    pub fn get(&self) -> Topology {
        *self.current.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn commit(&self, topology: Topology) -> Topology {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *current, topology)
    }

    pub fn is_switching(&self) -> bool {
        self.switching.load(Ordering::Acquire)
    }

    pub(crate) fn set_switching(&self, switching: bool) {
        self.switching.store(switching, Ordering::Release);
    }
}

/// Where a switch attempt currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchPhase {
    Idle,
    Preparing,
    Migrating,
    Validating,
    RollingBack,
}

impl SwitchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchPhase::Idle => "idle",
            SwitchPhase::Preparing => "preparing",
            SwitchPhase::Migrating => "migrating",
            SwitchPhase::Validating => "validating",
            SwitchPhase::RollingBack => "rolling_back",
        }
    }
}

impl std::fmt::Display for SwitchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
