//! Input tracing for rule evaluation.
//!
//! Each triggered rule carries the list of inputs its trigger read
//! (`request.parameters.rows`, `result.status`, ...), so an auditor can see
//! why it fired.

/// Collector that tracks which inputs a predicate read.
#[derive(Debug, Clone, Default)]
pub struct ProvenanceCollector {
    pub inputs_used: Vec<String>,
}

impl ProvenanceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an input access, keeping first-access order.
    pub fn record(&mut self, input: impl Into<String>) {
        let input = input.into();
        if !self.inputs_used.contains(&input) {
            self.inputs_used.push(input);
        }
    }

    pub fn into_inputs(self) -> Vec<String> {
        self.inputs_used
    }
}
