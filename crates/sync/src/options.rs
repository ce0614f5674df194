//! Options accepted by a sync run.

use serde::Deserialize;

/// Smallest allowed fetch page size.
pub const MIN_BATCH_SIZE: u32 = 1;

/// Largest allowed fetch page size.
pub const MAX_BATCH_SIZE: u32 = 500;

/// Page size used when the caller does not specify one.
pub const DEFAULT_BATCH_SIZE: u32 = 100;

/// Knobs for one engine run. Deserialized directly from the sync
/// endpoint's query string (camelCase keys).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncOptions {
    /// Write sync-owned fields even when nothing changed.
    pub force: bool,
    /// Fetch page size, clamped to 1..=500.
    pub batch_size: u32,
    /// Compute everything, persist nothing.
    pub dry_run: bool,
    /// Also push linked internal records back to the external system.
    pub bidirectional: bool,
    /// Run the full duplicate analysis (external batch + cross-system),
    /// not just the internal scan.
    pub comprehensive: bool,
    /// Consolidate internal duplicate groups into their survivor.
    pub detect_duplicates: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            force: false,
            batch_size: DEFAULT_BATCH_SIZE,
            dry_run: false,
            bidirectional: false,
            comprehensive: false,
            detect_duplicates: false,
        }
    }
}

impl SyncOptions {
    /// The requested batch size clamped into the allowed range.
    pub fn effective_batch_size(&self) -> u32 {
        self.batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_is_clamped() {
        let mut options = SyncOptions {
            batch_size: 0,
            ..Default::default()
        };
        assert_eq!(options.effective_batch_size(), MIN_BATCH_SIZE);

        options.batch_size = 10_000;
        assert_eq!(options.effective_batch_size(), MAX_BATCH_SIZE);

        options.batch_size = 250;
        assert_eq!(options.effective_batch_size(), 250);
    }

    #[test]
    fn query_string_defaults_apply() {
        let options: SyncOptions =
            serde_json::from_str(r#"{"dryRun": true, "batchSize": 50}"#).unwrap();
        assert!(options.dry_run);
        assert_eq!(options.batch_size, 50);
        assert!(!options.force);
        assert!(!options.bidirectional);
    }
}
