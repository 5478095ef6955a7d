use serde::{Deserialize, Serialize};
use std::{env, fs::File, io, path::PathBuf};
use thiserror::Error;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found at {0}")]
    FileNotFound(PathBuf),
    #[error("Config failed to parse")]
    BadConfig(#[from] serde_yaml::Error),
    #[error("No scheduler executable configured")]
    NoExecutable,
    #[error("Scheduler executable missing at {0}")]
    ExecutableMissing(PathBuf),
    #[error("Scheduler executable at {0} is not executable")]
    NotExecutable(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[from] io::Error),
    #[error("No submission group configured")]
    NoGroup,
}

// check if a file is executable
pub fn check_executable(path: &PathBuf) -> Result<(), ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::ExecutableMissing(path.clone()));
    }
    #[cfg(unix)]
    {
        let metadata = File::open(path).and_then(|file| file.metadata())?;
        if (metadata.mode() & 0o111) == 0 {
            return Err(ConfigError::NotExecutable(path.clone()));
        }
    }
    Ok(())
}

/// Farm/scheduler configuration, loaded from yaml with `PINI_*` environment
/// overrides layered on top.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct FarmConfig {
    /// Path to the scheduler submission executable (deadlinecommand).
    pub deadline_cmd: Option<PathBuf>,
    /// Default submission group.
    pub group: Option<String>,
    /// Known submission groups; when empty they are queried from the
    /// scheduler executable.
    #[serde(default)]
    pub groups: Vec<String>,
    /// Known limit groups; when empty they are queried from the scheduler
    /// executable.
    #[serde(default)]
    pub limit_groups: Vec<String>,
    /// Interpreter version reported for python jobs.
    pub py_version: Option<String>,
    /// Placeholder scene loaded by headless DCC jobs.
    pub empty_scene: Option<PathBuf>,
    /// Submissions to keep when flushing old submission dirs.
    #[serde(default = "default_flush_count")]
    pub flush_count: usize,
    /// Age beyond which excess submissions are flushed (weeks notation).
    #[serde(default = "default_flush_max_age")]
    pub flush_max_age: String,
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self {
            deadline_cmd: None,
            group: None,
            groups: Vec::new(),
            limit_groups: Vec::new(),
            py_version: None,
            empty_scene: None,
            flush_count: default_flush_count(),
            flush_max_age: default_flush_max_age(),
        }
    }
}

impl FarmConfig {
    pub fn load(path: &PathBuf) -> Result<Self, ConfigError> {
        let file = File::open(path).map_err(|_| ConfigError::FileNotFound(path.clone()))?;
        let mut config: FarmConfig = serde_yaml::from_reader(file)?;
        config.apply_env();
        Ok(config)
    }

    /// Layer `PINI_*` environment overrides onto this config.
    pub fn apply_env(&mut self) {
        if let Ok(cmd) = env::var("PINI_DEADLINE_CMD") {
            self.deadline_cmd = Some(PathBuf::from(cmd));
        }
        if let Ok(group) = env::var("PINI_DEADLINE_GROUP") {
            self.group = Some(group);
        }
        if let Ok(ver) = env::var("PINI_DEADLINE_PYVER") {
            self.py_version = Some(ver);
        }
        if let Ok(scene) = env::var("PINI_DEADLINE_EMPTY_SCENE") {
            self.empty_scene = Some(PathBuf::from(scene));
        }
    }

    /// Resolve the scheduler executable, validating it exists and is
    /// runnable. Missing/misconfigured executables are fatal before any
    /// subprocess is spawned.
    pub fn executable(&self) -> Result<&PathBuf, ConfigError> {
        let cmd = self.deadline_cmd.as_ref().ok_or(ConfigError::NoExecutable)?;
        check_executable(cmd)?;
        Ok(cmd)
    }
}

fn default_flush_count() -> usize {
    20
}

fn default_flush_max_age() -> String {
    "2w".to_string()
}
