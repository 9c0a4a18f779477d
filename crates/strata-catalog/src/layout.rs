//! Output-zone key layout.
//!
//! A parquet key is read as `{table root}/{partition segments}/{file}`:
//!
//! - Hive segments `key=value` contribute one partition column each
//! - a `YYYY/MM/DD` run contributes the [`DATE_PARTITION_KEY`] column,
//!   valued `YYYY/MM/DD`
//! - everything before the first partition segment is the table root
//!
//! Keys that don't fit are not cataloged; the scanner reports them.

/// Partition column for `YYYY/MM/DD` directory runs.
pub const DATE_PARTITION_KEY: &str = "date_created";

/// Suffix of data files the catalog picks up.
pub const PARQUET_SUFFIX: &str = ".parquet";

/// How one output-zone key maps onto a table and partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLayout {
    /// Table root relative to the bucket, without a trailing slash.
    pub table_root: String,
    /// Partition column names, in path order.
    pub partition_keys: Vec<String>,
    /// Partition values, aligned with `partition_keys`.
    pub partition_values: Vec<String>,
    /// Partition directory relative to the table root; empty when
    /// unpartitioned.
    pub partition_path: String,
}

impl ObjectLayout {
    /// Returns true if the table is partitioned by a date directory run.
    #[must_use]
    pub fn is_date_partitioned(&self) -> bool {
        self.partition_keys.iter().any(|k| k == DATE_PARTITION_KEY)
    }
}

/// Classifies an output-zone key.
///
/// Returns `None` for non-parquet files, hidden files (`_SUCCESS`,
/// `.tmp`), files at the bucket root and unrecognized directory shapes.
#[must_use]
pub fn classify(key: &str) -> Option<ObjectLayout> {
    let (dir, file) = key.rsplit_once('/')?;
    if !file.ends_with(PARQUET_SUFFIX) || file.starts_with('_') || file.starts_with('.') {
        return None;
    }
    let segments: Vec<&str> = dir.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return None;
    }

    let start = (0..segments.len()).find(|&i| partition_at(&segments, i).is_some());
    let Some(start) = start else {
        return Some(ObjectLayout {
            table_root: dir.to_string(),
            partition_keys: Vec::new(),
            partition_values: Vec::new(),
            partition_path: String::new(),
        });
    };
    if start == 0 {
        return None;
    }

    let mut keys: Vec<String> = Vec::new();
    let mut values = Vec::new();
    let mut i = start;
    while i < segments.len() {
        let (key, value, width) = partition_at(&segments, i)?;
        if keys.contains(&key) {
            return None;
        }
        keys.push(key);
        values.push(value);
        i += width;
    }

    Some(ObjectLayout {
        table_root: segments[..start].join("/"),
        partition_keys: keys,
        partition_values: values,
        partition_path: segments[start..].join("/"),
    })
}

/// Partition column found at `segments[i]`: `(key, value, segments used)`.
fn partition_at(segments: &[&str], i: usize) -> Option<(String, String, usize)> {
    let segment = segments.get(i)?;
    if let Some((k, v)) = segment.split_once('=') {
        if k.is_empty() || v.is_empty() {
            return None;
        }
        return Some((k.to_string(), v.to_string(), 1));
    }
    let (year, month, day) = (segment, segments.get(i + 1)?, segments.get(i + 2)?);
    if is_date(year, month, day) {
        return Some((
            DATE_PARTITION_KEY.to_string(),
            format!("{year}/{month}/{day}"),
            3,
        ));
    }
    None
}

fn is_date(year: &str, month: &str, day: &str) -> bool {
    let numeric = |s: &str, len: usize| s.len() == len && s.bytes().all(|b| b.is_ascii_digit());
    if !(numeric(year, 4) && numeric(month, 2) && numeric(day, 2)) {
        return false;
    }
    let m: u32 = month.parse().unwrap_or(0);
    let d: u32 = day.parse().unwrap_or(0);
    (1..=12).contains(&m) && (1..=31).contains(&d)
}

/// Catalog table name for a table root: `{prefix}{segments joined by _}`,
/// lowercased, with anything outside `[a-z0-9_]` replaced by `_`.
///
/// ```rust
/// use strata_catalog::layout::table_name;
///
/// assert_eq!(table_name("tbl_", "3B912722/CAN2_gnssspeed"), "tbl_3b912722_can2_gnssspeed");
/// ```
#[must_use]
pub fn table_name(prefix: &str, table_root: &str) -> String {
    let body: String = table_root
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{prefix}{body}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hive_partitions_are_recognized() {
        let layout = classify("signals/partition=session-001/session-001.parquet")
            .expect("layout");
        assert_eq!(layout.table_root, "signals");
        assert_eq!(layout.partition_keys, vec!["partition"]);
        assert_eq!(layout.partition_values, vec!["session-001"]);
        assert_eq!(layout.partition_path, "partition=session-001");
        assert!(!layout.is_date_partitioned());
    }

    #[test]
    fn date_directories_become_date_created() {
        let layout = classify("3B912722/CAN2_gnssspeed/2024/03/01/00000001.parquet")
            .expect("layout");
        assert_eq!(layout.table_root, "3B912722/CAN2_gnssspeed");
        assert_eq!(layout.partition_keys, vec![DATE_PARTITION_KEY]);
        assert_eq!(layout.partition_values, vec!["2024/03/01"]);
        assert!(layout.is_date_partitioned());
    }

    #[test]
    fn mixed_segments_keep_path_order() {
        let layout = classify("t/region=eu/2024/12/31/f.parquet").expect("layout");
        assert_eq!(layout.partition_keys, vec!["region", DATE_PARTITION_KEY]);
        assert_eq!(layout.partition_values, vec!["eu", "2024/12/31"]);
        assert_eq!(layout.partition_path, "region=eu/2024/12/31");
    }

    #[test]
    fn unpartitioned_directories_are_tables() {
        let layout = classify("lookup/channels.parquet").expect("layout");
        assert_eq!(layout.table_root, "lookup");
        assert!(layout.partition_keys.is_empty());
        assert!(layout.partition_path.is_empty());
    }

    #[test]
    fn unsupported_keys_are_skipped() {
        assert!(classify("root.parquet").is_none());
        assert!(classify("signals/notes.txt").is_none());
        assert!(classify("signals/_SUCCESS").is_none());
        assert!(classify("partition=a/f.parquet").is_none());
        assert!(classify("t/a=1/loose/f.parquet").is_none());
        assert!(classify("t/a=1/a=2/f.parquet").is_none());
        assert!(classify("t//f.parquet").is_none());
        assert!(classify("t/2024/13/01/f.parquet").is_some_and(|l| l.partition_keys.is_empty()));
    }

    #[test]
    fn table_names_are_normalized() {
        assert_eq!(table_name("tbl_", "signals"), "tbl_signals");
        assert_eq!(table_name("tbl_", "Dev-1/Msg.A"), "tbl_dev_1_msg_a");
    }

    proptest! {
        #[test]
        fn table_names_use_a_safe_alphabet(root in "[ -~]{1,40}") {
            let name = table_name("tbl_", &root);
            prop_assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
        }

        #[test]
        fn classified_roots_prefix_the_key(
            root in "[a-z]{1,8}(/[a-z]{1,8}){0,2}",
            value in "[a-z0-9-]{1,12}",
        ) {
            let key = format!("{root}/p={value}/x.parquet");
            let layout = classify(&key).expect("layout");
            let table_root = format!("{}/", layout.table_root);
            prop_assert!(key.starts_with(&table_root));
            prop_assert_eq!(layout.partition_values, vec![value]);
        }
    }
}
