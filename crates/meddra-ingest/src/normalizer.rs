//! Row normalization: null cleansing and ingestion metadata

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;

use crate::reader::RawRowBatch;

/// Values read as missing, matching what pandas treats as NaN on load
pub const DEFAULT_NULL_MARKERS: [&str; 11] = [
    "", "NaN", "nan", "NULL", "null", "N/A", "n/a", "NA", "#N/A", "<NA>", "None",
];

/// Source of timestamps for `created_at` / `updated_at`
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a given instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Set of raw values that are stored as NULL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullMarkers(HashSet<String>);

impl NullMarkers {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set: HashSet<String> = markers.into_iter().map(Into::into).collect();
        // An empty field is always missing
        set.insert(String::new());
        Self(set)
    }

    pub fn is_null(&self, value: &str) -> bool {
        self.0.contains(value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for NullMarkers {
    fn default() -> Self {
        Self::new(DEFAULT_NULL_MARKERS)
    }
}

/// Values stamped onto every record of a run
#[derive(Debug, Clone)]
pub struct EnrichmentContext {
    pub language: String,
    pub version: BigDecimal,
    pub clock: Arc<dyn Clock>,
}

impl EnrichmentContext {
    pub fn new(language: impl Into<String>, version: BigDecimal) -> Self {
        Self {
            language: language.into(),
            version,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// A source row ready for persistence
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    /// Source fields in file order; `None` is SQL NULL
    pub fields: Vec<Option<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub language: String,
    pub version: BigDecimal,
}

/// Turns raw batches into persistence-ready records
#[derive(Debug, Clone)]
pub struct RowNormalizer {
    context: EnrichmentContext,
    null_markers: NullMarkers,
}

impl RowNormalizer {
    pub fn new(context: EnrichmentContext, null_markers: NullMarkers) -> Self {
        Self {
            context,
            null_markers,
        }
    }

    pub fn context(&self) -> &EnrichmentContext {
        &self.context
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.context.clock = clock;
        self
    }

    /// Normalize one batch. The clock is read once, so every record of the
    /// batch carries the same timestamps.
    pub fn normalize(&self, batch: RawRowBatch) -> Vec<NormalizedRecord> {
        let now = self.context.clock.now();

        batch
            .rows
            .into_iter()
            .map(|row| NormalizedRecord {
                fields: row
                    .into_iter()
                    .map(|field| field.filter(|value| !self.null_markers.is_null(value)))
                    .collect(),
                created_at: now,
                updated_at: now,
                language: self.context.language.clone(),
                version: self.context.version.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Advances one second on every read
    #[derive(Debug, Default)]
    struct TickingClock(AtomicI64);

    impl Clock for TickingClock {
        fn now(&self) -> DateTime<Utc> {
            let secs = self.0.fetch_add(1, Ordering::SeqCst);
            Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
        }
    }

    fn batch(rows: Vec<Vec<Option<&str>>>) -> RawRowBatch {
        RawRowBatch {
            batch_number: 1,
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(|f| f.map(str::to_string)).collect())
                .collect(),
        }
    }

    fn normalizer(clock: Arc<dyn Clock>) -> RowNormalizer {
        let context = EnrichmentContext::new("en", BigDecimal::from_str("28.0").unwrap())
            .with_clock(clock);
        RowNormalizer::new(context, NullMarkers::default())
    }

    #[test]
    fn test_empty_and_marker_values_become_null() {
        let n = normalizer(Arc::new(SystemClock));
        let records = n.normalize(batch(vec![vec![
            Some("10000001"),
            Some(""),
            Some("NaN"),
            None,
            Some("Y"),
            Some("N/A"),
        ]]));

        assert_eq!(
            records[0].fields,
            vec![Some("10000001".to_string()), None, None, None, Some("Y".to_string()), None]
        );
    }

    #[test]
    fn test_custom_null_markers() {
        let context = EnrichmentContext::new("ja", BigDecimal::from(27));
        let n = RowNormalizer::new(context, NullMarkers::new(["-"]));
        let records = n.normalize(batch(vec![vec![Some("-"), Some("NaN"), Some("")]]));
        assert_eq!(records[0].fields, vec![None, Some("NaN".to_string()), None]);
    }

    #[test]
    fn test_row_count_is_preserved() {
        let n = normalizer(Arc::new(SystemClock));
        let rows = (0..17).map(|_| vec![Some("1"), Some("x")]).collect();
        assert_eq!(n.normalize(batch(rows)).len(), 17);
        assert!(n.normalize(batch(vec![])).is_empty());
    }

    #[test]
    fn test_one_clock_read_per_batch() {
        let n = normalizer(Arc::new(TickingClock::default()));
        let first = n.normalize(batch(vec![vec![Some("1")], vec![Some("2")], vec![Some("3")]]));
        let second = n.normalize(batch(vec![vec![Some("4")]]));

        assert!(first
            .iter()
            .all(|r| r.created_at == first[0].created_at && r.updated_at == first[0].created_at));
        assert_ne!(first[0].created_at, second[0].created_at);
    }

    #[test]
    fn test_language_and_version_are_copied() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let n = normalizer(Arc::new(FixedClock(at)));
        let records = n.normalize(batch(vec![vec![Some("1")], vec![Some("2")]]));

        for record in records {
            assert_eq!(record.language, "en");
            assert_eq!(record.version, BigDecimal::from_str("28.0").unwrap());
            assert_eq!(record.created_at, at);
        }
    }
}
