use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Compare two secrets in constant time.
///
/// Both sides are hashed first so the comparison cost does not depend on
/// where the inputs differ or on their lengths.
pub fn constant_time_eq(expected: &str, provided: &str) -> bool {
    let expected = Sha256::digest(expected.as_bytes());
    let provided = Sha256::digest(provided.as_bytes());
    expected.ct_eq(&provided).into()
}

/// Short, stable, non-reversible tag for a sensitive value (access codes,
/// device identities) so logs can be correlated without carrying the value.
pub fn redact(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(&digest[..6])
}
