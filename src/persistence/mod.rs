//! Postgres persistence layer.
//!
//! A thin repository over `sqlx::PgPool`: one method per access pattern the
//! Coordinator and Job Manager need, no ORM. The credit ledger's own
//! transactional read-check-write lives in [`crate::ledger`] directly
//! against the pool rather than through [`Repository`], since it needs row
//! locking across a multi-statement transaction that a generic repository
//! method would only obscure.

pub mod repo;

pub use repo::Repository;
