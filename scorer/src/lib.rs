// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

pub mod application;
pub mod ecosystem;
pub mod token_scorer;
pub mod wallet_scorer;
