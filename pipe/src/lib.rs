pub mod frames;
pub mod output;

use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf};
use tracing::debug;

/// Format for submission uids, second resolution.
///
/// NOTE: two submissions by the same user within the same second share a
/// uid; the second one fails its write-once check downstream. Accepted
/// limitation.
pub const UID_FORMAT: &str = "%y%m%d_%H%M%S";

/// Build a submission uid from a submission time.
pub fn time_to_uid(stime: DateTime<Local>) -> String {
    stime.format(UID_FORMAT).to_string()
}

/// Parse a submission uid back to a timestamp (eg. for aging out old
/// submission dirs).
pub fn uid_to_time(uid: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(uid, UID_FORMAT).ok()
}

/// Obtain the submission user.
pub fn user() -> String {
    for var in ["PINI_USER", "USER", "USERNAME"] {
        if let Ok(user) = env::var(var) {
            if !user.is_empty() {
                debug!("Read user {user} from ${var}");
                return user;
            }
        }
    }
    debug!("No user env var set");
    "unknown".to_string()
}

/// Transform a display name into a filesystem-safe pascal-case tag
/// (eg. "shot010 - bg [render]" -> "Shot010BgRender").
pub fn to_pascal(name: &str) -> String {
    let mut tag = String::with_capacity(name.len());
    for chunk in name.split(|c: char| !c.is_ascii_alphanumeric()) {
        let mut chars = chunk.chars();
        if let Some(first) = chars.next() {
            tag.extend(first.to_uppercase());
            tag.extend(chars);
        }
    }
    tag
}

/// The pipeline job (show/project) owning a submission.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PipeJob {
    pub name: String,
    pub root: PathBuf,
}

impl PipeJob {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    /// Map a job-relative path to an absolute one.
    pub fn to_file(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }
}

/// Interactive confirmation seam. Implemented over a dialog in the helper
/// UI and over stdin in the CLI; tests substitute a canned answer.
pub trait Confirm {
    fn confirm(&mut self, msg: &str) -> bool;
}

/// Confirms everything, for forced/batch paths.
#[derive(Debug, Default)]
pub struct AutoConfirm;

impl Confirm for AutoConfirm {
    fn confirm(&mut self, _msg: &str) -> bool {
        true
    }
}

/// Declines everything.
#[derive(Debug, Default)]
pub struct DenyConfirm;

impl Confirm for DenyConfirm {
    fn confirm(&mut self, _msg: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod lib_test {
    use super::*;

    #[test]
    fn pascal_tags() {
        assert_eq!(to_pascal("shot010 - bg [render]"), "Shot010BgRender");
        assert_eq!(to_pascal("update cache"), "UpdateCache");
        assert_eq!(to_pascal("Already"), "Already");
    }

    #[test]
    fn user_read_from_env() {
        env::set_var("PINI_USER", "testuser");
        assert_eq!(user(), "testuser");
        env::remove_var("PINI_USER");
    }

    #[test]
    fn uid_round_trip() {
        let now = Local::now();
        let uid = time_to_uid(now);
        let parsed = uid_to_time(&uid).unwrap();
        assert_eq!(parsed.format(UID_FORMAT).to_string(), uid);
        assert!(uid_to_time("not_a_uid").is_none());
    }
}
