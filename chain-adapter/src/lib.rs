// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

pub mod domain;
pub mod infra;
