// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # AMPARO Ledger — Boundary Library
//!
//! AMPARO distributes disaster-relief funds as restricted-use vouchers that
//! only verified vendors inside a bounded disaster zone can redeem. Custody
//! lives on an external distributed ledger; this crate owns everything that
//! crosses that boundary — and nothing that decides whether money moves.
//!
//! ## Architecture
//!
//! - **config** — Every tunable and magic number in one place.
//! - **event** — Typed events and the broadcast bus the monitor subscribes to.
//! - **submit** — The ledger execution boundary: transaction submission with
//!   timeouts, bounded retry, and idempotency keys.
//! - **content** — Evidence-hash validation and the content-addressed store
//!   boundary for proof-of-aid payloads.
//! - **projection** — The read-side store populated from the event stream.
//!   A projection, never an authority.
//! - **fraud** — Advisory pattern checks over the event stream. Flags, never
//!   blocks.
//! - **monitor** — The long-lived subscriber that drives projections and
//!   fraud analysis, idempotent under at-least-once delivery.
//!
//! ## Design Philosophy
//!
//! 1. The chain is the source of truth; everything here is observation.
//! 2. Fraud detection is advisory — an alert never reverses a transaction.
//! 3. "Couldn't evaluate" is a first-class outcome, not a swallowed error.
//! 4. If it crosses a network boundary, it has a timeout and a retry budget.

pub mod config;
pub mod content;
pub mod event;
pub mod fraud;
pub mod monitor;
pub mod projection;
pub mod submit;
