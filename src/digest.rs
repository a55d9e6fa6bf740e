/// Canonical transaction integrity digest.
///
/// The digest is a pure function of the six audit-relevant fields of a
/// completed order, hashed as the pipe-joined string
///
///   orderId|buyer|seller|totalCredits|totalPrice|paidAtEpochMillis
///
/// with SHA-256 and rendered as lowercase hex. Absent buyer/seller become
/// the empty string. Numeric fields use a fixed textual form: plain decimal
/// integers, and the shortest round-trip decimal for the price with a
/// trailing `.0` elided (`30.00` hashes as `30`, `30.5` as `30.5`).
/// Timestamps are integer epoch milliseconds, never ISO strings.
///
/// Changing the field order, the separator, or the null handling is a
/// breaking format change and must bump `DIGEST_FORMAT_VERSION`.
use sha2::{Digest, Sha256};

pub const DIGEST_FORMAT_VERSION: u32 = 1;

/// Length of a digest in lowercase hex characters (SHA-256).
pub const DIGEST_HEX_LEN: usize = 64;

/// Compute the canonical digest for one transaction.
pub fn transaction_digest(
    order_id: i64,
    buyer: Option<&str>,
    seller: Option<&str>,
    total_credits: i64,
    total_price: f64,
    paid_at_epoch_ms: i64,
) -> String {
    let input = canonical_input(
        order_id,
        buyer,
        seller,
        total_credits,
        total_price,
        paid_at_epoch_ms,
    );
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// The exact string that gets hashed. Exposed so verification tooling can
/// show operators what was signed over.
pub fn canonical_input(
    order_id: i64,
    buyer: Option<&str>,
    seller: Option<&str>,
    total_credits: i64,
    total_price: f64,
    paid_at_epoch_ms: i64,
) -> String {
    format!(
        "{}|{}|{}|{}|{}|{}",
        order_id,
        buyer.unwrap_or(""),
        seller.unwrap_or(""),
        total_credits,
        canonical_amount(total_price),
        paid_at_epoch_ms,
    )
}

/// Fixed textual form for the price: no locale formatting, no scientific
/// notation, no trailing zeros. Whole amounts render as integers.
fn canonical_amount(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        // Rust's f64 Display is the shortest round-trip representation,
        // which matches how the payment records were originally rendered.
        format!("{value}")
    }
}

/// Decode a digest hex string into raw bytes for Merkle leaf use.
pub fn decode_digest(digest_hex: &str) -> Option<[u8; 32]> {
    if digest_hex.len() != DIGEST_HEX_LEN {
        return None;
    }
    let bytes = hex::decode(digest_hex).ok()?;
    bytes.try_into().ok()
}
