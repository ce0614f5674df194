//! Duplicate classification and consolidation planning.
//!
//! Pure in-memory logic, no database access. The reconciliation engine
//! feeds it the validated external batch plus a snapshot of internal
//! records and gets back three duplicate buckets:
//!
//! - **external**: the same countid or email appears more than once
//!   within the fetched batch itself;
//! - **internal**: distinct internal records share a countid or email;
//! - **cross-system**: one external record matches more than one internal
//!   record (or vice versa).
//!
//! Internal duplicates get a consolidation plan (most-recently-active
//! record survives). Cross-system duplicates are only ever flagged for
//! manual review — auto-merging across systems risks irreversible data
//! loss and is deliberately not done.

use std::collections::HashMap;

use serde::Serialize;

use crate::types::{DbId, Timestamp};
use crate::validation::SanitizedLicenseRecord;

// ---------------------------------------------------------------------------
// Internal record view
// ---------------------------------------------------------------------------

/// The slice of an internal license record that duplicate detection
/// needs. The engine maps database rows into this view so the logic
/// here stays free of the persistence layer.
#[derive(Debug, Clone, Serialize)]
pub struct InternalRecordView {
    pub id: DbId,
    pub appid: Option<String>,
    pub countid: Option<i64>,
    pub email: Option<String>,
    pub last_active_at: Option<Timestamp>,
}

// ---------------------------------------------------------------------------
// Duplicate groups
// ---------------------------------------------------------------------------

/// What keyed a duplicate group together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKey {
    Countid(i64),
    Email(String),
}

/// Records within the external batch sharing a key.
#[derive(Debug, Clone, Serialize)]
pub struct ExternalDuplicateGroup {
    pub key: DuplicateKey,
    /// Indices into the validated batch, in batch order.
    pub indices: Vec<usize>,
}

/// Internal records sharing a key, with a consolidation plan attached.
#[derive(Debug, Clone, Serialize)]
pub struct InternalDuplicateGroup {
    pub key: DuplicateKey,
    /// The record that survives consolidation (most recently active;
    /// highest id wins a tie so the result is deterministic).
    pub survivor_id: DbId,
    /// Records to be merged into the survivor.
    pub merged_ids: Vec<DbId>,
}

/// One external record matching more than one internal record. Flagged
/// for manual review, never auto-merged.
#[derive(Debug, Clone, Serialize)]
pub struct CrossSystemDuplicate {
    pub countid: i64,
    pub internal_ids: Vec<DbId>,
}

/// Output of a full duplicate analysis pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DuplicateReport {
    pub external: Vec<ExternalDuplicateGroup>,
    pub internal: Vec<InternalDuplicateGroup>,
    pub cross_system: Vec<CrossSystemDuplicate>,
}

impl DuplicateReport {
    pub fn external_count(&self) -> usize {
        self.external.len()
    }

    pub fn internal_count(&self) -> usize {
        self.internal.len()
    }

    pub fn cross_system_count(&self) -> usize {
        self.cross_system.len()
    }
}

// ---------------------------------------------------------------------------
// External batch duplicates
// ---------------------------------------------------------------------------

/// Find records within the external batch that share a countid or email.
pub fn find_external_duplicates(batch: &[SanitizedLicenseRecord]) -> Vec<ExternalDuplicateGroup> {
    let mut by_countid: HashMap<i64, Vec<usize>> = HashMap::new();
    let mut by_email: HashMap<String, Vec<usize>> = HashMap::new();

    for (i, record) in batch.iter().enumerate() {
        by_countid.entry(record.countid).or_default().push(i);
        if let Some(email) = &record.email {
            by_email.entry(email.to_lowercase()).or_default().push(i);
        }
    }

    let mut groups = Vec::new();
    for (countid, indices) in by_countid {
        if indices.len() > 1 {
            groups.push(ExternalDuplicateGroup {
                key: DuplicateKey::Countid(countid),
                indices: sorted(indices),
            });
        }
    }
    for (email, indices) in by_email {
        if indices.len() > 1 {
            groups.push(ExternalDuplicateGroup {
                key: DuplicateKey::Email(email),
                indices: sorted(indices),
            });
        }
    }

    // Deterministic order: by first index.
    groups.sort_by_key(|g| g.indices[0]);
    groups
}

// ---------------------------------------------------------------------------
// Internal duplicates
// ---------------------------------------------------------------------------

/// Find distinct internal records sharing a countid or email and plan
/// their consolidation.
pub fn find_internal_duplicates(records: &[InternalRecordView]) -> Vec<InternalDuplicateGroup> {
    let mut by_countid: HashMap<i64, Vec<&InternalRecordView>> = HashMap::new();
    let mut by_email: HashMap<String, Vec<&InternalRecordView>> = HashMap::new();

    for record in records {
        if let Some(countid) = record.countid {
            by_countid.entry(countid).or_default().push(record);
        }
        if let Some(email) = &record.email {
            by_email.entry(email.to_lowercase()).or_default().push(record);
        }
    }

    let mut groups = Vec::new();
    for (countid, members) in by_countid {
        if members.len() > 1 {
            groups.push(plan_group(DuplicateKey::Countid(countid), &members));
        }
    }
    for (email, members) in by_email {
        if members.len() > 1 {
            groups.push(plan_group(DuplicateKey::Email(email), &members));
        }
    }

    groups.sort_by_key(|g| g.survivor_id);
    groups
}

/// Pick the survivor for a group: most recently active, then highest id.
fn plan_group(key: DuplicateKey, members: &[&InternalRecordView]) -> InternalDuplicateGroup {
    let survivor = members
        .iter()
        .max_by(|a, b| {
            a.last_active_at
                .cmp(&b.last_active_at)
                .then(a.id.cmp(&b.id))
        })
        .expect("duplicate group has at least two members");

    let merged_ids = sorted(
        members
            .iter()
            .filter(|m| m.id != survivor.id)
            .map(|m| m.id)
            .collect(),
    );

    InternalDuplicateGroup {
        key,
        survivor_id: survivor.id,
        merged_ids,
    }
}

// ---------------------------------------------------------------------------
// Cross-system duplicates
// ---------------------------------------------------------------------------

/// Find external records that match more than one internal record.
///
/// Matching here mirrors the engine's lookup order (appid, email,
/// countid) but collects *all* matches instead of the first, so an
/// ambiguous record is surfaced rather than silently resolved.
pub fn find_cross_system_duplicates(
    batch: &[SanitizedLicenseRecord],
    internals: &[InternalRecordView],
) -> Vec<CrossSystemDuplicate> {
    let mut flagged = Vec::new();

    for record in batch {
        let mut matches: Vec<DbId> = Vec::new();
        for internal in internals {
            let appid_match = match (&record.appid, &internal.appid) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            };
            let email_match = match (&record.email, &internal.email) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => false,
            };
            let countid_match = internal.countid == Some(record.countid);

            if (appid_match || email_match || countid_match) && !matches.contains(&internal.id) {
                matches.push(internal.id);
            }
        }

        if matches.len() > 1 {
            flagged.push(CrossSystemDuplicate {
                countid: record.countid,
                internal_ids: sorted(matches),
            });
        }
    }

    flagged
}

/// Run the full duplicate analysis.
pub fn analyze_duplicates(
    batch: &[SanitizedLicenseRecord],
    internals: &[InternalRecordView],
) -> DuplicateReport {
    DuplicateReport {
        external: find_external_duplicates(batch),
        internal: find_internal_duplicates(internals),
        cross_system: find_cross_system_duplicates(batch, internals),
    }
}

fn sorted<T: Ord>(mut v: Vec<T>) -> Vec<T> {
    v.sort();
    v
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
