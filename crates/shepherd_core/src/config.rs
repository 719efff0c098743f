//! Engine-level configuration, injected into each component at construction.

use std::time::Duration;

use crate::automation::KeywordMatch;

/// Hard ceiling on rows per import request.
pub const DEFAULT_IMPORT_MAX_ROWS: usize = 2000;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How a task-completion keyword is matched against task descriptions.
    pub keyword_match: KeywordMatch,
    pub import_max_rows: usize,
    /// Transaction timeout applied to bulk imports only.
    pub import_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            keyword_match: KeywordMatch::Substring,
            import_max_rows: DEFAULT_IMPORT_MAX_ROWS,
            import_timeout: Duration::from_secs(120),
        }
    }
}
