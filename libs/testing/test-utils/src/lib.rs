//! Shared test utilities
//!
//! - `TestDatabase`: PostgreSQL container with caller-supplied schema (feature: "postgres")
//! - `TestRedis`: Redis container for queue and rate-limit tests (feature: "redis")
//! - `TestDataBuilder`: Deterministic ids and names derived from a test name
//!
//! # Features
//!
//! - `postgres` (default): Enables PostgreSQL test infrastructure
//! - `redis`: Enables Redis test infrastructure
//! - `all`: Enables both
//!
//! # Usage
//!
//! ```rust,ignore
//! use test_utils::{TestDataBuilder, TestRedis};
//!
//! #[tokio::test]
//! async fn my_queue_test() {
//!     let redis = TestRedis::new().await;
//!     let data = TestDataBuilder::from_test_name("my_queue_test");
//!
//!     let trace_id = data.trace_id();
//!     let project = data.project_id();
//! }
//! ```

use uuid::Uuid;

#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "postgres")]
pub use postgres::TestDatabase;

#[cfg(feature = "redis")]
pub use redis::TestRedis;

/// Deterministic test data seeded from a number or a test name.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Seed from a hash of the test name, so each test gets stable, distinct data.
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let data = TestDataBuilder::from_test_name("test_store_trace");
    /// assert_eq!(data.trace_id(), TestDataBuilder::from_test_name("test_store_trace").trace_id());
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    fn uuid(&self, salt: u64) -> Uuid {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.seed.to_le_bytes());
        bytes[8..].copy_from_slice(&(self.seed ^ salt).to_le_bytes());
        Uuid::from_bytes(bytes)
    }

    pub fn trace_id(&self) -> String {
        self.uuid(0x7472_6163_6500_0000).to_string()
    }

    /// Id for the `n`th child record (span, generation) of the trace.
    pub fn child_id(&self, n: u64) -> String {
        self.uuid(n.wrapping_add(1)).to_string()
    }

    pub fn project_id(&self) -> String {
        format!("proj-{:x}", self.seed)
    }

    /// `test-{kind}-{seed}-{suffix}`, e.g. `test-trace-123-checkout`.
    pub fn name(&self, kind: &str, suffix: &str) -> String {
        format!("test-{}-{}-{}", kind, self.seed, suffix)
    }
}

/// Test assertion helpers
pub mod assertions {
    /// Unwrap an option with a contextual panic message.
    pub fn assert_some<T>(value: Option<T>, context: &str) -> T {
        value.unwrap_or_else(|| panic!("{}: expected Some, got None", context))
    }
}
