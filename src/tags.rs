//! Canonical tag collection for Auto Scaling Groups
//!
//! Group tags arrive from two declarative representations (an itemized `tag`
//! list and a legacy free-form `tags` list) and from the provider's observed
//! state. All three are normalized into one [`TagSet`] keyed by tag key, with
//! a provenance mark per entry, before any diffing or echo logic runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Keys with this prefix are provider-managed and never reconciled.
pub const AWS_TAG_KEY_PREFIX: &str = "aws:";

/// A single group tag as it appears in the declarative document and in
/// provider requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEntry {
    /// Tag key
    pub key: String,
    /// Tag value
    pub value: String,
    /// Whether the tag is copied onto instances at launch time
    #[serde(default)]
    pub propagate_at_launch: bool,
}

impl TagEntry {
    /// Convenience constructor
    pub fn new(key: impl Into<String>, value: impl Into<String>, propagate_at_launch: bool) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            propagate_at_launch,
        }
    }
}

/// Where a tag entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagProvenance {
    /// Declared by the caller in the desired-state document
    Declared,
    /// Reported by the provider
    Observed,
    /// Present but excluded from reconciliation (provider-managed or
    /// configured to be ignored)
    Ignored,
}

/// Which declarative tag representation a spec uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagRepresentation {
    /// The itemized `tag` list
    Itemized,
    /// The legacy free-form `tags` list
    Legacy,
    /// Both representations present (merged, itemized echo rules apply to each)
    Both,
    /// Neither representation present
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TagRecord {
    value: String,
    propagate_at_launch: bool,
    provenance: TagProvenance,
}

/// Normalized, deduplicated tag collection keyed by tag key.
///
/// Entries marked [`TagProvenance::Ignored`] are retained for visibility but
/// excluded from `entries()`, `diff()` and `propagated()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    records: BTreeMap<String, TagRecord>,
}

impl TagSet {
    fn from_entries(entries: &[TagEntry], provenance: TagProvenance) -> Self {
        let mut records = BTreeMap::new();
        for entry in entries {
            records.insert(
                entry.key.clone(),
                TagRecord {
                    value: entry.value.clone(),
                    propagate_at_launch: entry.propagate_at_launch,
                    provenance,
                },
            );
        }
        Self { records }
    }

    /// Build from caller-declared entries
    pub fn from_declared(entries: &[TagEntry]) -> Self {
        Self::from_entries(entries, TagProvenance::Declared)
    }

    /// Build from provider-observed entries
    pub fn from_observed(entries: &[TagEntry]) -> Self {
        Self::from_entries(entries, TagProvenance::Observed)
    }

    /// Merge another set into this one; on key conflict the other set wins.
    /// Used to collapse the two declarative representations into one.
    pub fn merge(mut self, other: TagSet) -> Self {
        for (key, record) in other.records {
            self.records.insert(key, record);
        }
        self
    }

    /// Mark provider-managed keys (`aws:` prefix) as ignored
    pub fn ignore_aws(mut self) -> Self {
        for (key, record) in self.records.iter_mut() {
            if key.starts_with(AWS_TAG_KEY_PREFIX) {
                record.provenance = TagProvenance::Ignored;
            }
        }
        self
    }

    /// Mark a configured set of keys as ignored
    pub fn ignore_keys(mut self, keys: &[String]) -> Self {
        for key in keys {
            if let Some(record) = self.records.get_mut(key) {
                record.provenance = TagProvenance::Ignored;
            }
        }
        self
    }

    /// Restrict to the keys present (and active) in `reference`.
    ///
    /// This is the read-time compatibility rule: callers on a legacy
    /// representation only see back the tags they already manage.
    pub fn only(mut self, reference: &TagSet) -> Self {
        self.records
            .retain(|key, _| reference.active_record(key).is_some());
        self
    }

    fn active_record(&self, key: &str) -> Option<&TagRecord> {
        self.records
            .get(key)
            .filter(|r| r.provenance != TagProvenance::Ignored)
    }

    /// Active (non-ignored) entries, sorted by key
    pub fn entries(&self) -> Vec<TagEntry> {
        self.records
            .iter()
            .filter(|(_, r)| r.provenance != TagProvenance::Ignored)
            .map(|(key, r)| TagEntry {
                key: key.clone(),
                value: r.value.clone(),
                propagate_at_launch: r.propagate_at_launch,
            })
            .collect()
    }

    /// Number of active entries
    pub fn len(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.provenance != TagProvenance::Ignored)
            .count()
    }

    /// True when no active entries remain
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The key/value view of active entries that propagate at launch
    pub fn propagated(&self) -> BTreeMap<String, String> {
        self.records
            .iter()
            .filter(|(_, r)| r.provenance != TagProvenance::Ignored && r.propagate_at_launch)
            .map(|(key, r)| (key.clone(), r.value.clone()))
            .collect()
    }

    /// Compute the incremental change from `old` to `new`.
    pub fn diff(old: &TagSet, new: &TagSet) -> TagDelta {
        let mut upsert = Vec::new();
        let mut remove = Vec::new();

        for entry in new.entries() {
            match old.active_record(&entry.key) {
                Some(record)
                    if record.value == entry.value
                        && record.propagate_at_launch == entry.propagate_at_launch => {}
                _ => upsert.push(entry),
            }
        }

        for entry in old.entries() {
            if new.active_record(&entry.key).is_none() {
                remove.push(entry);
            }
        }

        TagDelta { upsert, remove }
    }
}

/// Incremental tag change set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDelta {
    /// Entries to create or overwrite
    pub upsert: Vec<TagEntry>,
    /// Entries to delete
    pub remove: Vec<TagEntry>,
}

impl TagDelta {
    /// True when there is nothing to apply
    pub fn is_empty(&self) -> bool {
        self.upsert.is_empty() && self.remove.is_empty()
    }
}

/// Whether the propagate-at-launch subset differs between two sets.
///
/// A change here means instances launched under the old tags carry stale
/// metadata, which is what triggers the instance-refresh marker downstream.
pub fn propagated_subset_changed(old: &TagSet, new: &TagSet) -> bool {
    old.propagated() != new.propagated()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, value: &str, propagate: bool) -> TagEntry {
        TagEntry::new(key, value, propagate)
    }

    #[test]
    fn test_merge_dedupes_on_key() {
        let itemized = TagSet::from_declared(&[entry("env", "prod", true)]);
        let legacy = TagSet::from_declared(&[entry("env", "staging", true), entry("team", "ml", false)]);

        let merged = itemized.merge(legacy);
        assert_eq!(merged.len(), 2);
        assert_eq!(
            merged.entries(),
            vec![entry("env", "staging", true), entry("team", "ml", false)]
        );
    }

    #[test]
    fn test_ignore_aws_prefix_excluded_from_entries() {
        let set = TagSet::from_observed(&[
            entry("aws:autoscaling:groupName", "g", true),
            entry("env", "prod", true),
        ])
        .ignore_aws();

        assert_eq!(set.entries(), vec![entry("env", "prod", true)]);
    }

    #[test]
    fn test_only_restricts_to_reference_keys() {
        let observed = TagSet::from_observed(&[
            entry("env", "prod", true),
            entry("injected", "elsewhere", false),
        ]);
        let declared = TagSet::from_declared(&[entry("env", "prod", true)]);

        let echoed = observed.only(&declared);
        assert_eq!(echoed.entries(), vec![entry("env", "prod", true)]);
    }

    #[test]
    fn test_diff_upsert_and_remove() {
        let old = TagSet::from_declared(&[entry("a", "1", true), entry("b", "2", false)]);
        let new = TagSet::from_declared(&[entry("a", "changed", true), entry("c", "3", false)]);

        let delta = TagSet::diff(&old, &new);
        assert_eq!(
            delta.upsert,
            vec![entry("a", "changed", true), entry("c", "3", false)]
        );
        assert_eq!(delta.remove, vec![entry("b", "2", false)]);
    }

    #[test]
    fn test_diff_propagate_flag_change_is_an_upsert() {
        let old = TagSet::from_declared(&[entry("a", "1", false)]);
        let new = TagSet::from_declared(&[entry("a", "1", true)]);

        let delta = TagSet::diff(&old, &new);
        assert_eq!(delta.upsert, vec![entry("a", "1", true)]);
        assert!(delta.remove.is_empty());
    }

    #[test]
    fn test_ignored_keys_do_not_diff() {
        let old = TagSet::from_observed(&[entry("aws:internal", "x", false)]).ignore_aws();
        let new = TagSet::default();

        assert!(TagSet::diff(&old, &new).is_empty());
    }

    #[test]
    fn test_propagated_subset_change_detection() {
        let old = TagSet::from_declared(&[entry("a", "1", true), entry("b", "2", false)]);
        let same = TagSet::from_declared(&[entry("a", "1", true), entry("b", "other", false)]);
        let changed = TagSet::from_declared(&[entry("a", "2", true), entry("b", "2", false)]);

        // Non-propagated value changes do not require relaunching instances.
        assert!(!propagated_subset_changed(&old, &same));
        assert!(propagated_subset_changed(&old, &changed));
    }
}
