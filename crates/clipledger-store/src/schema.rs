//! Column families used by the `RocksDB` backend.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Account records, keyed by `user_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Job records, keyed by `job_id` (ULID bytes, so iteration is time-ordered).
    pub const JOBS: &str = "jobs";

    /// Index: jobs by user, keyed by `len(user_id) || user_id || job_id`.
    /// Value is empty (index only).
    pub const JOBS_BY_USER: &str = "jobs_by_user";

    /// Payment transactions, keyed by `transaction_id` (ULID bytes).
    pub const TRANSACTIONS: &str = "transactions";

    /// Index: transactions by user, same layout as `JOBS_BY_USER`.
    pub const TRANSACTIONS_BY_USER: &str = "transactions_by_user";

    /// Redemption codes, keyed by the normalized code string.
    pub const CODES: &str = "codes";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::JOBS,
        cf::JOBS_BY_USER,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_USER,
        cf::CODES,
    ]
}
