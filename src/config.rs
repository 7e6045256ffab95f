//! Configuration for the resolver, the stores and cross-referencing.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

fn invalid(field: &str, reason: String) -> ValidationError {
    ValidationError::InvalidConfig {
        field: field.to_string(),
        reason,
    }
}

/// Configuration for a durable resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Whether to fsync the journal after every write.
    pub sync_on_write: bool,
    /// Journal size (bytes) above which the journal is compacted. Past
    /// that, a rewrite waits until the journal has doubled since the last one.
    pub max_journal_size: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            max_journal_size: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl ResolverConfig {
    const MIN_JOURNAL_SIZE: u64 = 4 * 1024;

    /// Checks the journal size limit.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_journal_size < Self::MIN_JOURNAL_SIZE {
            return Err(invalid(
                "max_journal_size",
                format!(
                    "must be at least {} bytes (got {})",
                    Self::MIN_JOURNAL_SIZE,
                    self.max_journal_size
                ),
            ));
        }
        Ok(self)
    }
}

/// Tuning knobs shared by the statement stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Pending statements a writer buffers before flushing a batch.
    pub batch_size: usize,
    /// Entity ids fetched per page when iterating a view.
    pub page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            page_size: 1_000,
        }
    }
}

impl StoreConfig {
    /// Checks that batch and page sizes are non-zero.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be greater than zero".to_string()));
        }
        if self.page_size == 0 {
            return Err(invalid("page_size", "must be greater than zero".to_string()));
        }
        Ok(self)
    }
}

/// Parameters of one cross-reference run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XrefConfig {
    /// Maximum number of suggestions recorded.
    pub limit: usize,
    /// Score candidates with the matching algorithm instead of keeping the
    /// blocking score.
    pub scored: bool,
    /// Include external statements in the view.
    pub external: bool,
    /// Only consider pairs where at least one side has this schema.
    pub range: Option<String>,
    /// Pairs scoring strictly above this are merged without review.
    pub auto_threshold: Option<f64>,
    /// Score above which conflicting anchor pairs are reported.
    pub negative_check_threshold: Option<f64>,
    /// Pairs touching this dataset get their score pulled toward 1.0.
    pub focus_dataset: Option<String>,
    /// Attribution for recorded edges.
    pub user: Option<String>,
    /// Pairs between progress log lines.
    pub stats_interval: usize,
}

impl Default for XrefConfig {
    fn default() -> Self {
        Self {
            limit: 5_000,
            scored: true,
            external: true,
            range: None,
            auto_threshold: None,
            negative_check_threshold: None,
            focus_dataset: None,
            user: None,
            stats_interval: 1_000,
        }
    }
}

impl XrefConfig {
    /// Fallback for `negative_check_threshold` when neither it nor an
    /// auto threshold is set.
    pub const DEFAULT_NEGATIVE_CHECK: f64 = 0.98;

    /// Checks thresholds, the limit and the stats interval.
    pub fn validate(self) -> Result<Self, ValidationError> {
        for (field, value) in [
            ("auto_threshold", self.auto_threshold),
            ("negative_check_threshold", self.negative_check_threshold),
        ] {
            if let Some(v) = value {
                if !(0.0..=1.0).contains(&v) {
                    return Err(invalid(field, format!("must be within [0, 1] (got {v})")));
                }
            }
        }
        if self.limit == 0 {
            return Err(invalid("limit", "must be greater than zero".to_string()));
        }
        if self.stats_interval == 0 {
            return Err(invalid("stats_interval", "must be greater than zero".to_string()));
        }
        Ok(self)
    }

    /// The effective threshold for the conflict report.
    #[must_use]
    pub fn negative_check(&self) -> f64 {
        self.negative_check_threshold
            .or(self.auto_threshold)
            .unwrap_or(Self::DEFAULT_NEGATIVE_CHECK)
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn with_auto_threshold(mut self, threshold: f64) -> Self {
        self.auto_threshold = Some(threshold);
        self
    }

    #[must_use]
    pub fn with_range(mut self, schema: impl Into<String>) -> Self {
        self.range = Some(schema.into());
        self
    }

    #[must_use]
    pub fn with_focus_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.focus_dataset = Some(dataset.into());
        self
    }

    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn scored(mut self, scored: bool) -> Self {
        self.scored = scored;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(ResolverConfig::default().validate().is_ok());
        assert!(StoreConfig::default().validate().is_ok());
        assert!(XrefConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_xref_config_from_json() {
        let cfg: XrefConfig = serde_json::from_str(r#"{"auto_threshold": 0.95, "limit": 10}"#).unwrap();
        assert_eq!(cfg.limit, 10);
        assert_eq!(cfg.auto_threshold, Some(0.95));
        assert_eq!(cfg.stats_interval, XrefConfig::default().stats_interval);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_rejects_tiny_journal() {
        let cfg = ResolverConfig {
            max_journal_size: 10,
            ..ResolverConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_batch() {
        let cfg = StoreConfig {
            batch_size: 0,
            ..StoreConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_negative_check_fallbacks() {
        let cfg = XrefConfig::default();
        assert!((cfg.negative_check() - 0.98).abs() < f64::EPSILON);
        let cfg = cfg.with_auto_threshold(0.9);
        assert!((cfg.negative_check() - 0.9).abs() < f64::EPSILON);
        let cfg = XrefConfig {
            negative_check_threshold: Some(0.5),
            ..cfg
        };
        assert!((cfg.negative_check() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        assert!(XrefConfig::default().with_auto_threshold(1.5).validate().is_err());
    }
}
