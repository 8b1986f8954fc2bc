use crate::models::{Level, TerritorialRecord};
use crate::normalize::normalize;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};

/// A reference record with its names already normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedRecord {
    pub name: String,
    pub display_name: String,
    pub code: String,
    pub parent: Option<String>,
}

/// Data-quality conditions seen while building. Tolerated, only counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataQuality {
    /// Records without a usable name or code
    pub dropped_records: usize,
    /// Flat-index insertions that replaced an earlier code
    pub duplicate_names: usize,
    /// Nested records whose parent is not a municipality in the same snapshot
    pub orphan_parents: usize,
}

/// Immutable lookup structure built from one parse of the reference dataset.
///
/// Every key is a normalized name. A rebuild produces a new instance; readers
/// holding an `Arc` to an older one keep using it until they drop it.
#[derive(Debug, Default)]
pub struct ReferenceIndex {
    flat_name_to_code: FxHashMap<String, String>,
    by_level: FxHashMap<Level, Vec<IndexedRecord>>,
    children_by_parent: FxHashMap<String, FxHashMap<String, String>>,
    quality: DataQuality,
}

impl ReferenceIndex {
    /// Builds all three indices in one pass over `records`, in the order given.
    ///
    /// Later records sharing a normalized name overwrite earlier ones in the
    /// flat index and in the per-parent child maps.
    pub fn build(records: impl IntoIterator<Item = TerritorialRecord>) -> Self {
        let mut index = Self::default();
        let mut municipalities = FxHashSet::default();

        for record in records {
            let (name, code) = match (record.name.as_deref().and_then(normalize), record.code) {
                (Some(name), Some(code)) if !code.trim().is_empty() => {
                    (name, code.trim().to_string())
                }
                _ => {
                    index.quality.dropped_records += 1;
                    continue;
                }
            };
            let display_name = record.name.unwrap_or_default();
            let parent = record.parent_name.as_deref().and_then(normalize);

            if record.level == Level::Municipality {
                municipalities.insert(name.clone());
            }

            if let Some(previous) = index.flat_name_to_code.insert(name.clone(), code.clone()) {
                if previous != code {
                    debug!(name = %name, previous = %previous, code = %code, "Duplicate name overwrites code");
                }
                index.quality.duplicate_names += 1;
            }

            if let Some(parent) = &parent {
                index
                    .children_by_parent
                    .entry(parent.clone())
                    .or_default()
                    .insert(name.clone(), code.clone());
            }

            index
                .by_level
                .entry(record.level)
                .or_default()
                .push(IndexedRecord {
                    name,
                    display_name,
                    code,
                    parent,
                });
        }

        index.quality.orphan_parents = index
            .by_level
            .iter()
            .filter(|(level, _)| level.is_parent_qualified())
            .flat_map(|(_, records)| records)
            .filter_map(|r| r.parent.as_ref())
            .filter(|parent| !municipalities.contains(*parent))
            .count();

        info!(
            names = index.flat_name_to_code.len(),
            departments = index.records(Level::Department).len(),
            municipalities = index.records(Level::Municipality).len(),
            townships = index.records(Level::Township).len(),
            urban_centers = index.records(Level::UrbanCenter).len(),
            dropped = index.quality.dropped_records,
            duplicates = index.quality.duplicate_names,
            orphan_parents = index.quality.orphan_parents,
            "Reference index built"
        );

        index
    }

    /// Exact lookup across all levels.
    pub fn code_for(&self, normalized_name: &str) -> Option<&str> {
        self.flat_name_to_code.get(normalized_name).map(String::as_str)
    }

    /// Exact lookup of a child name under a normalized parent name.
    pub fn child_code(&self, normalized_parent: &str, normalized_child: &str) -> Option<&str> {
        self.children_by_parent
            .get(normalized_parent)
            .and_then(|children| children.get(normalized_child))
            .map(String::as_str)
    }

    /// Records of one level, in file order.
    pub fn records(&self, level: Level) -> &[IndexedRecord] {
        self.by_level.get(&level).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn quality(&self) -> DataQuality {
        self.quality
    }

    /// Number of distinct normalized names.
    pub fn len(&self) -> usize {
        self.flat_name_to_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flat_name_to_code.is_empty()
    }
}
