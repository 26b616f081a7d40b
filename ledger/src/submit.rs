//! # Ledger Execution Boundary
//!
//! Every state-changing command ends with a transaction submitted to the
//! external relief ledger. This module defines the transaction vocabulary,
//! the client trait the chain hides behind, and the retry discipline: each
//! attempt carries a timeout, retries back off exponentially and reuse the
//! same idempotency key, and an exhausted budget surfaces as a terminal
//! error instead of hanging the caller.
//!
//! Transaction signing and consensus are the chain's business, not ours —
//! the engine hands over a fully-validated operation and receives a
//! transaction reference.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;

use crate::config::{SUBMIT_BACKOFF_BASE, SUBMIT_MAX_ATTEMPTS, SUBMIT_TIMEOUT};
use crate::event::TxRef;

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// The operations the core submits to the chain. One variant per command
/// that moves or commits funds-relevant state; queries never cross this
/// boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum LedgerTransaction {
    #[serde(rename = "create_zone")]
    CreateZone {
        zone_id: String,
        name: String,
        initial_funding: u64,
        creator: String,
    },
    #[serde(rename = "add_funding")]
    AddFunding {
        zone_id: String,
        amount: u64,
        actor: String,
    },
    #[serde(rename = "register_vendor")]
    RegisterVendor {
        vendor_id: String,
        zone_id: String,
    },
    #[serde(rename = "verify_vendor")]
    VerifyVendor {
        vendor_id: String,
        zone_id: String,
        verifier: String,
    },
    #[serde(rename = "issue_voucher")]
    IssueVoucher {
        voucher_id: String,
        zone_id: String,
        beneficiary: String,
        amount: u64,
    },
    #[serde(rename = "redeem_voucher")]
    RedeemVoucher {
        redemption_id: String,
        voucher_id: String,
        vendor_id: String,
        amount: u64,
    },
    #[serde(rename = "submit_proof")]
    SubmitProof {
        proof_id: String,
        redemption_id: String,
        evidence_hash: String,
    },
}

impl LedgerTransaction {
    /// The stable key the chain dedupes retried submissions by.
    ///
    /// For redemptions this is the voucher id: a voucher can be used once,
    /// so re-submitting the same redemption is inherently idempotent. For
    /// everything else the freshly-minted entity id serves the same role.
    pub fn idempotency_key(&self) -> &str {
        match self {
            Self::CreateZone { zone_id, .. } | Self::AddFunding { zone_id, .. } => zone_id,
            Self::RegisterVendor { vendor_id, .. } | Self::VerifyVendor { vendor_id, .. } => {
                vendor_id
            }
            Self::IssueVoucher { voucher_id, .. } => voucher_id,
            Self::RedeemVoucher { voucher_id, .. } => voucher_id,
            Self::SubmitProof { proof_id, .. } => proof_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors crossing the submission boundary.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// One attempt exceeded its timeout. Retried until the budget runs out.
    #[error("ledger submission timed out")]
    Timeout,

    /// The chain reached a decision and said no. Never retried — the same
    /// transaction would be rejected again.
    #[error("ledger rejected transaction: {reason}")]
    Rejected { reason: String },

    /// The chain could not be reached or answered with a transport-level
    /// failure. Retried.
    #[error("transient ledger failure: {reason}")]
    Transient { reason: String },

    /// The retry budget is spent. Terminal; the caller's state was never
    /// mutated on the strength of this submission.
    #[error("ledger submission failed after {attempts} attempts (idempotency key {key})")]
    RetriesExhausted { attempts: u32, key: String },
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// The external ledger, reduced to the one call the core makes.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submits a transaction and returns its chain reference.
    async fn submit(&self, tx: &LedgerTransaction) -> Result<TxRef, SubmitError>;
}

/// Retry policy for a submission.
#[derive(Debug, Clone, Copy)]
pub struct SubmitOptions {
    /// Per-attempt timeout.
    pub attempt_timeout: std::time::Duration,
    /// Total attempts before giving up.
    pub max_attempts: u32,
    /// Base backoff; attempt n sleeps `base * 2^(n-1)` before retrying.
    pub backoff_base: std::time::Duration,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            attempt_timeout: SUBMIT_TIMEOUT,
            max_attempts: SUBMIT_MAX_ATTEMPTS,
            backoff_base: SUBMIT_BACKOFF_BASE,
        }
    }
}

/// Submits a transaction with the boundary's retry discipline.
///
/// Timeouts and transient failures are retried with exponential backoff
/// under the same idempotency key; a rejection is returned immediately
/// (retrying a decided transaction is pointless); an exhausted budget
/// surfaces as [`SubmitError::RetriesExhausted`].
pub async fn submit_with_retry(
    client: &dyn LedgerClient,
    tx: &LedgerTransaction,
    opts: &SubmitOptions,
) -> Result<TxRef, SubmitError> {
    let key = tx.idempotency_key().to_string();

    for attempt in 1..=opts.max_attempts {
        let outcome = match timeout(opts.attempt_timeout, client.submit(tx)).await {
            Ok(result) => result,
            Err(_) => Err(SubmitError::Timeout),
        };

        match outcome {
            Ok(tx_ref) => return Ok(tx_ref),
            Err(SubmitError::Rejected { reason }) => {
                return Err(SubmitError::Rejected { reason });
            }
            Err(err) => {
                tracing::warn!(
                    attempt,
                    max_attempts = opts.max_attempts,
                    idempotency_key = %key,
                    error = %err,
                    "ledger submission attempt failed"
                );
                if attempt < opts.max_attempts {
                    let backoff = opts.backoff_base * 2u32.saturating_pow(attempt - 1);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    Err(SubmitError::RetriesExhausted {
        attempts: opts.max_attempts,
        key,
    })
}

// ---------------------------------------------------------------------------
// Recording client
// ---------------------------------------------------------------------------

/// Deterministic in-process ledger used by tests and the default node
/// wiring: accepts every transaction, mints sequential references, and
/// keeps the submission log for inspection.
#[derive(Default)]
pub struct RecordingLedgerClient {
    seq: AtomicU64,
    log: Mutex<Vec<LedgerTransaction>>,
}

impl RecordingLedgerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything submitted so far, in order.
    pub fn submitted(&self) -> Vec<LedgerTransaction> {
        self.log.lock().clone()
    }

    /// Number of transactions accepted.
    pub fn submission_count(&self) -> usize {
        self.log.lock().len()
    }
}

#[async_trait]
impl LedgerClient for RecordingLedgerClient {
    async fn submit(&self, tx: &LedgerTransaction) -> Result<TxRef, SubmitError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.log.lock().push(tx.clone());
        Ok(format!("tx-{:08x}", seq))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
