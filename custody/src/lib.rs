// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # AMPARO Custody
//!
//! The accounting core of the relief network: who holds funds, who may
//! redeem them, and exactly once. These modules implement the state
//! machines with real correctness invariants:
//!
//! - **Zone Ledger** — zone funding balances; `total_spent` can never
//!   exceed `current_funding`, concurrency included.
//! - **Vendor Registry** — vendor identity, verification, and reputation.
//!   A vendor redeems only in its own zone and only while verified.
//! - **Voucher Store** — single-use, category-restricted, time-bounded
//!   claims on zone funds.
//! - **Redemption Engine** — the orchestrator: cross-component validation
//!   in a fixed order, then an atomic commit across all three ledgers.
//! - **Proof Linker** — off-chain evidence attached to redemptions and
//!   reviewed independently of fund movement.
//! - **Authority** — explicit capability grants; every privileged
//!   operation names its actor.
//!
//! ## Design Principles
//!
//! 1. All monetary operations check for overflow — wrapping arithmetic
//!    and money do not mix.
//! 2. State transitions are explicit enum variants, validated on entry.
//! 3. Every rejection carries the specific reason; callers can always
//!    tell "retry with corrected intent" from "this will never succeed"
//!    from "you lack permission".
//! 4. Rejected attempts mutate nothing. Confirmed redemptions are
//!    append-only and never reversed — a rejected proof flags follow-up,
//!    it does not claw back funds.

pub mod authority;
pub mod proof;
pub mod redemption;
pub mod vendor;
pub mod voucher;
pub mod zone;
