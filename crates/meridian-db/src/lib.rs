//! Durable persistence for the orchestrator's own bookkeeping.
//!
//! This crate is **not** a mirror of the external project dashboard, which
//! remains the system of record for task content and is consumed purely
//! over HTTP (see `meridian-core::dashboard`). It holds the orchestrator
//! process's own audit trail and idempotency state: workflow run records,
//! per-step execution history, persona request/response traffic, review
//! outcomes, and the task-creation idempotency ledger that lets
//! `external_id`-keyed task creation survive a process restart.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
