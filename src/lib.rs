// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! TCE Proxy.
//!
//! A small axum service that fronts the TCE-CE transparency API. It adds CORS
//! headers, retries flaky upstream calls, repairs the occasionally malformed
//! JSON the upstream emits and sets shared-cache hints on successful answers.

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod policy;
pub mod repair;
pub mod upstream;
