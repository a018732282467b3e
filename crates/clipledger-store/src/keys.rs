//! Key encoding utilities for `RocksDB`.
//!
//! User ids are variable length, so per-user index keys carry a one-byte
//! length prefix. Without it `user_1` would be a key prefix of `user_10`.

use clipledger_core::{JobId, TransactionId, UserId};

/// Create an account key from a user ID.
#[must_use]
pub fn account_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create a job key from a job ID.
#[must_use]
pub fn job_key(job_id: &JobId) -> Vec<u8> {
    job_id.to_bytes().to_vec()
}

/// Create a transaction key from a transaction ID.
#[must_use]
pub fn transaction_key(transaction_id: &TransactionId) -> Vec<u8> {
    transaction_id.to_bytes().to_vec()
}

/// Create a redemption code key.
#[must_use]
pub fn code_key(code: &str) -> Vec<u8> {
    code.as_bytes().to_vec()
}

/// Prefix shared by every index entry of one user.
///
/// Format: `len (1 byte) || user_id`
#[must_use]
pub fn user_prefix(user_id: &UserId) -> Vec<u8> {
    let bytes = user_id.as_bytes();
    let mut key = Vec::with_capacity(1 + bytes.len() + 16);
    // UserId caps its length well below 256.
    key.push(u8::try_from(bytes.len()).unwrap_or(u8::MAX));
    key.extend_from_slice(bytes);
    key
}

/// Create a per-user index key.
///
/// Format: `len (1 byte) || user_id || ulid (16 bytes)`
///
/// Since ULIDs are time-ordered, a user's entries sort by creation time.
#[must_use]
pub fn user_index_key(user_id: &UserId, ulid_bytes: [u8; 16]) -> Vec<u8> {
    let mut key = user_prefix(user_id);
    key.extend_from_slice(&ulid_bytes);
    key
}

/// Extract the trailing ULID bytes from a per-user index key.
#[must_use]
pub fn extract_ulid(key: &[u8]) -> Option<[u8; 16]> {
    let start = key.len().checked_sub(16)?;
    key[start..].try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_key_length() {
        assert_eq!(job_key(&JobId::generate()).len(), 16);
    }

    #[test]
    fn user_index_key_format() {
        let user_id = UserId::new("user_1").unwrap();
        let job_id = JobId::generate();
        let key = user_index_key(&user_id, job_id.to_bytes());

        assert_eq!(key[0], 6);
        assert_eq!(&key[1..7], b"user_1");
        assert_eq!(&key[7..], job_id.to_bytes());
        assert!(key.starts_with(&user_prefix(&user_id)));
    }

    #[test]
    fn prefixes_do_not_collide() {
        let short = UserId::new("user_1").unwrap();
        let long = UserId::new("user_10").unwrap();
        let key = user_index_key(&long, JobId::generate().to_bytes());
        assert!(!key.starts_with(&user_prefix(&short)));
    }

    #[test]
    fn extract_roundtrip() {
        let user_id = UserId::new("u").unwrap();
        let tx_id = TransactionId::generate();
        let key = user_index_key(&user_id, tx_id.to_bytes());

        let extracted = extract_ulid(&key).map(TransactionId::from_bytes);
        assert_eq!(extracted, Some(tx_id));
        assert_eq!(extract_ulid(&[1, 2, 3]), None);
    }
}
