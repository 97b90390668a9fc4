// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

pub mod application;
pub mod pipeline;
pub mod pull;
pub mod push;
