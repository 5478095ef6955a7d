use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
};

/// Content classification for pipeline outputs. Drives how a staged
/// import is realized in the scene and how render jobs serialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    CameraAbc,
    GeoAbc,
    Vdb,
    Lookdev,
    Publish,
    Render,
    Scene,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContentType::CameraAbc => "CameraAbc",
            ContentType::GeoAbc => "GeoAbc",
            ContentType::Vdb => "Vdb",
            ContentType::Lookdev => "Lookdev",
            ContentType::Publish => "Publish",
            ContentType::Render => "Render",
            ContentType::Scene => "Scene",
        };
        write!(f, "{name}")
    }
}

/// A produced pipeline artifact (cache, publish, render layer, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Output {
    pub path: PathBuf,
    /// Entity (asset/shot) this output belongs to.
    pub entity: String,
    /// Output name within the entity (eg. "deer01", "renderCam", "bg").
    pub name: String,
    pub content_type: ContentType,
    pub task: String,
    pub ver: Option<u32>,
    /// Paired lookdev/shading output, where one has been published
    /// alongside a cache.
    pub lookdev: Option<Box<Output>>,
}

impl Output {
    pub fn new(
        path: impl Into<PathBuf>,
        entity: impl Into<String>,
        name: impl Into<String>,
        content_type: ContentType,
    ) -> Self {
        Self {
            path: path.into(),
            entity: entity.into(),
            name: name.into(),
            content_type,
            task: String::new(),
            ver: None,
            lookdev: None,
        }
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = task.into();
        self
    }

    pub fn with_ver(mut self, ver: u32) -> Self {
        self.ver = Some(ver);
        self
    }

    pub fn with_lookdev(mut self, lookdev: Output) -> Self {
        self.lookdev = Some(Box::new(lookdev));
        self
    }

    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new(""))
    }

    pub fn extn(&self) -> &str {
        self.path.extension().and_then(|e| e.to_str()).unwrap_or("")
    }

    /// Base string used to allocate an import namespace for this output.
    pub fn namespace_base(&self) -> String {
        match self.content_type {
            ContentType::Publish => self.entity.clone(),
            ContentType::CameraAbc => format!("{}_{}", self.entity, self.name),
            ContentType::GeoAbc | ContentType::Vdb => {
                if self.name.is_empty() {
                    self.entity.clone()
                } else {
                    self.name.clone()
                }
            }
            ContentType::Lookdev | ContentType::Scene | ContentType::Render => {
                if self.name.is_empty() {
                    self.entity.clone()
                } else {
                    self.name.clone()
                }
            }
        }
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

#[cfg(test)]
mod output_test {
    use super::*;

    #[test]
    fn namespace_bases() {
        let publish = Output::new("/jobs/x/deer_rig.mb", "deer", "rig", ContentType::Publish);
        assert_eq!(publish.namespace_base(), "deer");

        let cam = Output::new(
            "/jobs/x/renderCam.abc",
            "shot010",
            "renderCam",
            ContentType::CameraAbc,
        );
        assert_eq!(cam.namespace_base(), "shot010_renderCam");

        let cache = Output::new("/jobs/x/deer01.abc", "deer", "deer01", ContentType::GeoAbc);
        assert_eq!(cache.namespace_base(), "deer01");
        assert_eq!(cache.extn(), "abc");
    }
}
