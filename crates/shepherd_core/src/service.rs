//! Shepherd: the explicit component container.
//!
//! Every component is built once from the same `Arc<dyn Store>` and the same
//! `EngineConfig`. The HTTP layer holds one `Arc<Shepherd>`; tests build
//! their own against an in-memory store.

use std::sync::Arc;

use crate::automation::AutomationRules;
use crate::config::EngineConfig;
use crate::import::BulkImport;
use crate::members::MemberService;
use crate::ports::Store;
use crate::progression::ProgressionEngine;
use crate::stages::StageRegistry;
use crate::sweep::TimeInStageSweep;
use crate::tasks::TaskService;

pub struct Shepherd {
    pub stages: StageRegistry,
    pub rules: AutomationRules,
    pub progression: ProgressionEngine,
    pub members: MemberService,
    pub tasks: TaskService,
    pub import: BulkImport,
    pub sweep: TimeInStageSweep,
}

impl Shepherd {
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        Self {
            stages: StageRegistry::new(store.clone()),
            rules: AutomationRules::new(store.clone()),
            progression: ProgressionEngine::new(store.clone()),
            members: MemberService::new(store.clone()),
            tasks: TaskService::new(store.clone(), config.keyword_match),
            import: BulkImport::new(store.clone(), &config),
            sweep: TimeInStageSweep::new(store),
        }
    }
}
