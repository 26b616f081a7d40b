//! # Configuration & Constants
//!
//! Every magic number in AMPARO lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! Fraud thresholds in particular deserve respect: they were chosen from
//! field reports of pilot deployments, not pulled out of thin air. Loosen
//! them and the analyzer goes quiet; tighten them and operators drown in
//! medium-severity noise. Change with care and a dashboard open.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Evidence Hashes
// ---------------------------------------------------------------------------

/// Proof-of-aid evidence is anchored by a BLAKE3 digest of the off-chain
/// payload, hex-encoded. 32 bytes of digest = 64 hex characters. The raw
/// payload (photos, receipts, delivery manifests) never touches the ledger.
pub const EVIDENCE_HASH_LENGTH: usize = 64;

/// Hash function used for evidence anchors. BLAKE3 is faster than SHA-256
/// on every platform that matters, and it's a proper cryptographic hash.
pub const EVIDENCE_HASH_FUNCTION: &str = "BLAKE3";

// ---------------------------------------------------------------------------
// Fraud Analyzer Thresholds
// ---------------------------------------------------------------------------

/// Rolling window for the rapid-transactions check. A vendor terminal in a
/// functioning relief zone does not clear more than a handful of vouchers
/// in ten minutes; a stolen terminal does.
pub const FRAUD_VELOCITY_WINDOW_SECS: i64 = 600;

/// Redemptions per vendor tolerated inside the velocity window before a
/// medium-severity alert fires.
pub const FRAUD_VELOCITY_MAX_REDEMPTIONS: usize = 5;

/// Absolute single-redemption amount (in cents) above which the
/// unusual-amount check raises a high-severity alert. Relief vouchers are
/// groceries and medicine, not used cars.
pub const FRAUD_UNUSUAL_AMOUNT_CENTS: u64 = 500_000;

/// How many recently-seen voucher ids the duplicate-transaction check
/// remembers. Bounded so a long-running monitor doesn't grow without limit.
pub const FRAUD_DUPLICATE_MEMORY: usize = 65_536;

// ---------------------------------------------------------------------------
// Ledger Submission
// ---------------------------------------------------------------------------

/// Per-attempt timeout for a ledger submission. The chain either answers in
/// this window or we treat the attempt as failed and back off.
pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Total attempts (first try + retries) before a submission surfaces a
/// terminal failure. Retries reuse the same idempotency key, so the chain
/// sees one logical operation no matter how flaky the link is.
pub const SUBMIT_MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff between submission attempts.
/// Attempt n sleeps `SUBMIT_BACKOFF_BASE * 2^(n-1)`.
pub const SUBMIT_BACKOFF_BASE: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Event Stream
// ---------------------------------------------------------------------------

/// Broadcast channel capacity for the event bus. 256 absorbs redemption
/// bursts at a busy distribution point without dropping events for any
/// attached subscriber.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How many processed event ids the monitor remembers for deduplication.
/// Delivery is at-least-once; anything older than this window has long
/// since been projected and re-delivery of it is harmless.
pub const MONITOR_DEDUP_CAPACITY: usize = 16_384;

// ---------------------------------------------------------------------------
// Vendor Reputation
// ---------------------------------------------------------------------------

/// Reputation is tracked in hundredths of a star: 0..=500 maps to the
/// familiar 0.00–5.00 scale without touching floating point, because
/// floats and money-adjacent scoring do not mix.
pub const REPUTATION_MAX_HUNDREDTHS: u16 = 500;

/// Every vendor starts in the middle of the scale. Trust is earned in both
/// directions.
pub const REPUTATION_BASE_HUNDREDTHS: u16 = 250;

/// Bonus per doubling of lifetime transaction count.
pub const REPUTATION_VOLUME_STEP: u16 = 10;

/// Ceiling on the volume bonus. Volume alone cannot carry a vendor to a
/// perfect score.
pub const REPUTATION_VOLUME_CAP: u16 = 150;

/// Weight of the dispute rate in the penalty term. One dispute per four
/// transactions wipes out roughly a full star.
pub const REPUTATION_DISPUTE_WEIGHT: u64 = 400;

// ---------------------------------------------------------------------------
// Vouchers
// ---------------------------------------------------------------------------

/// Default validity window for an issued voucher when the issuer does not
/// specify one. Thirty days covers the acute phase of most disaster
/// responses; zones that run longer re-issue.
pub const DEFAULT_VOUCHER_EXPIRY_SECS: i64 = 30 * 24 * 3600;

/// Upper bound on categories per voucher. Issuance tooling generates these
/// from a fixed taxonomy; anything bigger is a malformed request.
pub const MAX_CATEGORIES_PER_VOUCHER: usize = 16;

/// Upper bound on free-text descriptions (proof descriptions, zone names).
/// Enough for a sentence, not enough for your novel.
pub const MAX_DESCRIPTION_LENGTH: usize = 512;

/// How often the node sweeps for expired vouchers. Expiry itself is a
/// time-derived property; the sweep only exists for reporting.
pub const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Mean Earth radius in meters, used by the haversine distance between a
/// redemption geo-tag and its zone center.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

// ---------------------------------------------------------------------------
// Network Defaults
// ---------------------------------------------------------------------------

/// Default port for the command/query API.
pub const DEFAULT_API_PORT: u16 = 8741;

/// Default port for the Prometheus metrics endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 8742;
