//! Internal utilities for captely-cascade.
//!
//! This module contains internal implementation details that are not part
//! of the public API surface, apart from `retry` which is re-exported
//! through `lib.rs` for public use (`RetryPolicy`, `CircuitBreaker`).

pub mod rate_limiter;
pub mod retry;
