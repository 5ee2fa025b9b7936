use alloy::primitives::B128;

/// A fresh 128-bit random id rendered as a `0x`-prefixed hex string.
///
/// Used for subscription and connection ids; clients must not be able to
/// guess another client's subscription id, so this is real entropy rather
/// than a counter.
pub fn random_id() -> String {
    B128::random().to_string()
}
