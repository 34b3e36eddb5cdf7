//! Scenario-unique partition key generation.

use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const DEFAULT_KEY_PREFIX: &str = "test-org";
const RANDOM_SUFFIX_LEN: usize = 8;

/// Builds `<prefix>-<unix_seconds>-<random hex>` keys.
///
/// The seconds component keeps keys sortable by run time; the random suffix
/// separates runs started within the same second.
#[derive(Debug, Clone)]
pub struct PartitionKeyGenerator {
    prefix: String,
}

impl Default for PartitionKeyGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

impl PartitionKeyGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn generate(&self) -> String {
        let unix_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        self.generate_at(unix_secs)
    }

    pub fn generate_at(&self, unix_secs: u64) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}-{}-{}",
            self.prefix,
            unix_secs,
            &suffix[..RANDOM_SUFFIX_LEN]
        )
    }
}
