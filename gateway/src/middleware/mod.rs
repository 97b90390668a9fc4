// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! The Gateway's middleware stack, applied in the order spec.md's request-processing model lists
//! them: security headers, CORS, API-key resolution, rate limiting, body limit, route dispatch,
//! request correlation, usage accounting.

pub mod api_key;
pub mod cors;
pub mod rate_limit;
pub mod request_id;
pub mod security_headers;
pub mod usage;
