// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod domain;
pub mod infra;
pub mod telemetry;
