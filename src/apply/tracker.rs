use crate::apply::result::ApplyResult;

/// Records the outcome of each object converged during one call.
///
/// One tracker per call; it is never shared between calls.
#[derive(Debug, Default)]
pub struct OutcomeTracker {
    record: Vec<ApplyResult>,
}

impl OutcomeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, outcome: ApplyResult) {
        self.record.push(outcome);
    }

    /// Record an outcome reported by label. Labels other than `created`,
    /// `configured` and `unchanged` record nothing; returns whether one was
    /// recorded.
    pub fn observe_label(&mut self, label: &str) -> bool {
        let outcome = match label {
            "created" => ApplyResult::Created,
            "configured" => ApplyResult::Configured,
            "unchanged" => ApplyResult::Unchanged,
            _ => return false,
        };
        self.observe(outcome);
        true
    }

    pub fn record(&self) -> &[ApplyResult] {
        &self.record
    }

    pub fn result(&self) -> ApplyResult {
        classify(&self.record)
    }
}

/// The single recorded outcome, or `Unknown` when there is not exactly one.
pub fn classify(record: &[ApplyResult]) -> ApplyResult {
    match record {
        [single] => *single,
        _ => ApplyResult::Unknown,
    }
}
