//! Flat-text `key=value` serialization for scheduler info/job files.

use itertools::Itertools;
use once_cell::sync::Lazy;
use std::{env, fs, io, path::Path};
use tracing::debug;

/// Ordered key/value payload for an info or job file. Insertion order is
/// preserved so the file can mirror how the data was assembled.
pub type JobData = Vec<(String, String)>;

pub fn push(data: &mut JobData, key: impl Into<String>, val: impl ToString) {
    data.push((key.into(), val.to_string()));
}

/// Canonical scheduler ordering toggle. When unset, files are written in
/// insertion order.
static USE_SORTING: Lazy<bool> =
    Lazy::new(|| env::var("PINI_DEADLINE_USE_SORTING").map_or(false, |val| !val.is_empty()));

/// Reference orderings lifted from scheduler-written files. Indexed key
/// families (AWSAssetFile0..N, ExtraInfoKeyValue0..N) sort by numeric
/// suffix within their family; unknown keys sort after all known ones,
/// by name.
const INFO_KEY_ORDER: &[&str] = &[
    "Plugin",
    "\u{feff}Plugin",
    "Name",
    "BatchName",
    "Comment",
    "Pool",
    "SecondaryPool",
    "MachineLimit",
    "Priority",
    "OnJobComplete",
    "TaskTimeoutMinutes",
    "MinRenderTimeMinutes",
    "EnableAutoTimeout",
    "ConcurrentTasks",
    "Department",
    "Group",
    "LimitGroups",
    "JobDependencies",
    "Whitelist",
    "OutputFilename0",
    "Frames",
    "ChunkSize",
    "AWSAssetFile",
    "ExtraInfoKeyValue",
];

const JOB_KEY_ORDER: &[&str] = &[
    "Animation",
    "RenderSetupIncludeLights",
    "Renderer",
    "UsingRenderLayers",
    "RenderLayer",
    "RenderHalfFrames",
    "FrameNumberOffset",
    "LocalRendering",
    "StrictErrorChecking",
    "MaxProcessors",
    "ArnoldVerbose",
    "MayaToArnoldVersion",
    "Version",
    "UseLegacyRenderLayers",
    "Build",
    "ProjectPath",
    "StartupScript",
    "ImageWidth",
    "ImageHeight",
    "OutputFilePath",
    "OutputFilePrefix",
    "Camera",
    "Camera0",
    "Camera1",
    "Camera2",
    "Camera3",
    "Camera4",
    "Camera5",
    "Camera6",
    "Camera7",
    "CountRenderableCameras",
    "IgnoreError211",
    "UseLocalAssetCaching",
    "EnableOpenColorIO",
    "OCIOConfigFile",
    "OCIOPolicyFile",
];

/// Indexed key families which carry a numeric suffix.
const INDEXED_FAMILIES: &[&str] = &["AWSAssetFile", "ExtraInfoKeyValue"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySort {
    Insertion,
    Info,
    Job,
}

impl KeySort {
    /// Sort for info files, honouring the canonical-ordering toggle.
    pub fn info() -> Self {
        if *USE_SORTING {
            Self::Info
        } else {
            Self::Insertion
        }
    }

    /// Sort for job files, honouring the canonical-ordering toggle.
    pub fn job() -> Self {
        if *USE_SORTING {
            Self::Job
        } else {
            Self::Insertion
        }
    }

    fn order(&self) -> Option<&'static [&'static str]> {
        match self {
            Self::Insertion => None,
            Self::Info => Some(INFO_KEY_ORDER),
            Self::Job => Some(JOB_KEY_ORDER),
        }
    }
}

/// Sort rank for a single key: (position of its family or itself in the
/// reference list, numeric suffix within the family, key). A pure function
/// of the key, so emitted order never depends on input order.
fn key_rank(key: &str, order: &[&str]) -> (usize, u64, String) {
    for family in INDEXED_FAMILIES {
        if let Some(suffix) = key.strip_prefix(family) {
            if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
                if let Some(idx) = order.iter().position(|entry| entry == family) {
                    let sub = suffix.parse().unwrap_or(u64::MAX);
                    return (idx, sub, key.to_string());
                }
            }
        }
    }
    let idx = order
        .iter()
        .position(|entry| *entry == key)
        .unwrap_or(order.len());
    (idx, 0, key.to_string())
}

/// Serialize data as one `key=value` line per entry.
///
/// Values are written as-is with no escaping; the target format is flat
/// text. Overwrites any existing file content, so callers asserting
/// write-once semantics must check existence first.
pub fn write_deadline_data(file: &Path, data: &[(String, String)], sort: KeySort) -> io::Result<()> {
    let entries: Vec<&(String, String)> = match sort.order() {
        Some(order) => data
            .iter()
            .sorted_by_key(|(key, _)| key_rank(key, order))
            .collect(),
        None => data.iter().collect(),
    };

    let mut text = String::new();
    for (key, val) in entries {
        text.push_str(key);
        text.push('=');
        text.push_str(val);
        text.push('\n');
    }
    debug!(file = ?file, "Writing {} deadline entries", data.len());

    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(file, text)
}

/// Read a `key=value` file back into ordered entries.
pub fn read_deadline_data(file: &Path) -> io::Result<JobData> {
    let text = fs::read_to_string(file)?;
    Ok(text
        .lines()
        .filter_map(|line| {
            line.split_once('=')
                .map(|(key, val)| (key.to_string(), val.to_string()))
        })
        .collect())
}

#[cfg(test)]
mod writer_test {
    use super::*;
    use std::collections::BTreeMap;

    fn tmp_file(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("pini-writer-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn round_trip_preserves_content() {
        let data = vec![
            ("Plugin".to_string(), "Python".to_string()),
            ("Name".to_string(), "shot010 - bg".to_string()),
            ("Priority".to_string(), "50".to_string()),
        ];
        let file = tmp_file("round_trip.info");
        write_deadline_data(&file, &data, KeySort::Insertion).unwrap();
        let read: BTreeMap<String, String> = read_deadline_data(&file).unwrap().into_iter().collect();
        let want: BTreeMap<String, String> = data.into_iter().collect();
        assert_eq!(read, want);
    }

    #[test]
    fn canonical_sort_is_input_order_independent() {
        let mut data = vec![
            ("ChunkSize".to_string(), "1".to_string()),
            ("AWSAssetFile10".to_string(), "/a/j.tx".to_string()),
            ("Unknown".to_string(), "x".to_string()),
            ("AWSAssetFile2".to_string(), "/a/b.jpg".to_string()),
            ("Plugin".to_string(), "MayaRender".to_string()),
            ("ExtraInfoKeyValue1".to_string(), "DraftType=movie".to_string()),
            ("Name".to_string(), "n".to_string()),
        ];
        let file_a = tmp_file("sorted_a.info");
        write_deadline_data(&file_a, &data, KeySort::Info).unwrap();
        data.reverse();
        let file_b = tmp_file("sorted_b.info");
        write_deadline_data(&file_b, &data, KeySort::Info).unwrap();

        let keys_a: Vec<String> = read_deadline_data(&file_a)
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        let keys_b: Vec<String> = read_deadline_data(&file_b)
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys_a, keys_b);
        assert_eq!(
            keys_a,
            vec![
                "Plugin",
                "Name",
                "ChunkSize",
                "AWSAssetFile2",
                "AWSAssetFile10",
                "ExtraInfoKeyValue1",
                "Unknown",
            ]
        );
    }

    #[test]
    fn indexed_families_sort_numerically() {
        let rank2 = key_rank("AWSAssetFile2", INFO_KEY_ORDER);
        let rank10 = key_rank("AWSAssetFile10", INFO_KEY_ORDER);
        assert!(rank2 < rank10);

        // Non-numeric suffixes are unknown keys
        let odd = key_rank("AWSAssetFileX", INFO_KEY_ORDER);
        assert_eq!(odd.0, INFO_KEY_ORDER.len());
    }
}
