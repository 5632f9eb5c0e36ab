//! Size-tier classification for media objects.
//!
//! An object's [`SizeCategory`] determines which sub-pool of the
//! size-tiered worker pool (see [`crate::pool`]) will process it. The
//! assignment is made once, at enumeration time, and never changes for
//! the life of a run.

use serde::{Deserialize, Serialize};

/// Thresholds (in bytes) used to bucket objects into size tiers.
///
/// The boundary itself belongs to the *higher* category: an object whose
/// size equals `small_max_bytes` exactly is `Medium`, not `Small`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeThresholds {
    pub small_max_bytes: i64,
    pub medium_max_bytes: i64,
}

impl SizeThresholds {
    pub const DEFAULT_SMALL_MAX_MIB: i64 = 50;
    pub const DEFAULT_MEDIUM_MAX_MIB: i64 = 300;

    /// Thresholds built from MiB values.
    pub fn from_mib(small_max_mib: i64, medium_max_mib: i64) -> Self {
        Self {
            small_max_bytes: small_max_mib * 1024 * 1024,
            medium_max_bytes: medium_max_mib * 1024 * 1024,
        }
    }

    /// Classify a size in bytes against these thresholds.
    ///
    /// Uses strict `<` so a size exactly at a threshold falls into the
    /// higher category (§8 boundary property).
    pub fn categorize(&self, size_bytes: i64) -> SizeCategory {
        if size_bytes < self.small_max_bytes {
            SizeCategory::Small
        } else if size_bytes < self.medium_max_bytes {
            SizeCategory::Medium
        } else {
            SizeCategory::Large
        }
    }
}

impl Default for SizeThresholds {
    fn default() -> Self {
        Self::from_mib(Self::DEFAULT_SMALL_MAX_MIB, Self::DEFAULT_MEDIUM_MAX_MIB)
    }
}

/// Size tier an object was assigned to at enumeration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeCategory {
    Small,
    Medium,
    Large,
}

impl SizeCategory {
    /// All categories, in a stable order used for iteration and reporting.
    pub const ALL: [SizeCategory; 3] = [
        SizeCategory::Small,
        SizeCategory::Medium,
        SizeCategory::Large,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SizeCategory::Small => "small",
            SizeCategory::Medium => "medium",
            SizeCategory::Large => "large",
        }
    }
}

impl std::fmt::Display for SizeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}
