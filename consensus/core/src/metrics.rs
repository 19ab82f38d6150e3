// Copyright (c) The Savanna Finality Authors
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_int_counter_vec_with_registry, register_int_gauge_with_registry, IntCounterVec,
    IntGauge, Registry,
};

/// Metrics emitted by the finality core. Field names mirror the operations
/// they instrument (§4) rather than any single component, since votes,
/// aggregation, and safety-file I/O are all on the hot path.
pub struct Metrics {
    /// Count of `add_vote` outcomes by `finality_types::VoteResult` variant.
    pub votes_processed: IntCounterVec,
    /// Count of votes this node's own finalizers have cast, by strong/weak.
    pub votes_cast: IntCounterVec,
    /// Last final block number observed by `finality_core::next`.
    pub last_final_block_num: IntGauge,
    /// Current (highest) block number tracked by the finality core.
    pub current_block_num: IntGauge,
    /// Count of safety file saves, by success/failure.
    pub safety_file_saves: IntCounterVec,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            votes_processed: register_int_counter_vec_with_registry!(
                "finality_votes_processed",
                "Votes processed by add_vote, labeled by outcome",
                &["result"],
                registry,
            )
            .unwrap(),
            votes_cast: register_int_counter_vec_with_registry!(
                "finality_votes_cast",
                "Votes cast by this node's own finalizers, labeled by strength",
                &["strength"],
                registry,
            )
            .unwrap(),
            last_final_block_num: register_int_gauge_with_registry!(
                "finality_last_final_block_num",
                "Highest block number known to be final",
                registry,
            )
            .unwrap(),
            current_block_num: register_int_gauge_with_registry!(
                "finality_current_block_num",
                "Highest block number tracked by the finality core",
                registry,
            )
            .unwrap(),
            safety_file_saves: register_int_counter_vec_with_registry!(
                "finality_safety_file_saves",
                "Safety file save attempts, labeled by outcome",
                &["result"],
                registry,
            )
            .unwrap(),
        }
    }
}

#[cfg(test)]
pub fn test_metrics() -> std::sync::Arc<Metrics> {
    std::sync::Arc::new(Metrics::new(&Registry::new()))
}
