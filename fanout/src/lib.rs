// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

pub mod application;
pub mod webhook;
pub mod websocket;
