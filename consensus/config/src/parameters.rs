// Copyright (c) The Savanna Finality Authors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Operational configuration of a finalizer node.
///
/// All fields should tolerate inconsistencies among finalizers without
/// affecting safety of the protocol - they are local operating knobs, not
/// part of the on-chain finalizer policy (§3).
///
/// NOTE: default values should make sense, so most operators should not need
/// to specify any field.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Parameters {
    /// Where the finalizer safety file is read from and written to (§3/§6).
    /// Required: the finalizer refuses to vote without a safety file path,
    /// since voting without persisted safety state risks an equivocation.
    pub safety_file_path: PathBuf,

    /// Maximum number of votes that may be queued for processing before
    /// `my_finalizers_t` starts shedding load. Bounds the channel created in
    /// `my_finalizers.rs` (§4.5).
    #[serde(default = "Parameters::default_max_vote_processing_backlog")]
    pub max_vote_processing_backlog: usize,
}

impl Parameters {
    pub fn default_max_vote_processing_backlog() -> usize {
        1024
    }

    pub fn safety_file_path_str_unsafe(&self) -> String {
        self.safety_file_path
            .as_path()
            .to_str()
            .expect("safety file path is not valid UTF-8")
            .to_string()
    }
}
