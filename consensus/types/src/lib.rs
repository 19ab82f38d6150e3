// Copyright (c) The Savanna Finality Authors
// SPDX-License-Identifier: Apache-2.0

mod block;
mod digest;
mod error;
mod fsi;
mod qc;

pub use block::*;
pub use digest::*;
pub use error::*;
pub use fsi::*;
pub use qc::*;
