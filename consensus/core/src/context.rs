// Copyright (c) The Savanna Finality Authors
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use finality_config::Parameters;

#[cfg(test)]
use tempfile::TempDir;

#[cfg(test)]
use crate::metrics::test_metrics;
use crate::metrics::Metrics;

/// Context contains the operational configuration and metrics shared by all
/// components of one finalizer node. Unlike the teacher's `Context`, it does
/// not hold a committee or per-epoch protocol config: finalizer policies are
/// attached per-block (active/pending, §3) rather than scoped to the whole
/// node, so they flow through `block_state` instead of living here.
#[derive(Clone)]
pub struct Context {
    /// Operational parameters (safety file path, backlog limits, §3 ambient config).
    pub parameters: Parameters,
    /// Metrics of this finalizer node.
    pub metrics: Arc<Metrics>,
}

impl Context {
    pub fn new(parameters: Parameters, metrics: Arc<Metrics>) -> Self {
        Self {
            parameters,
            metrics,
        }
    }

    /// Creates a test context with a safety file inside a fresh temp dir.
    #[cfg(test)]
    pub fn new_for_test() -> (Self, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let parameters = Parameters {
            safety_file_path: temp_dir.path().join("finality_safety.dat"),
            max_vote_processing_backlog: Parameters::default_max_vote_processing_backlog(),
        };
        (Self::new(parameters, test_metrics()), temp_dir)
    }

    #[cfg(test)]
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    #[cfg(test)]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }
}
