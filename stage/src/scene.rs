//! The DCC scene collaborator seam.

use pini_pipe::output::Output;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SceneError {
    #[error("No reference found with namespace \"{0}\"")]
    MissingRef(String),
    #[error("Namespace \"{0}\" already in use")]
    NamespaceInUse(String),
    #[error("Scene operation failed: {0}")]
    Dcc(String),
}

/// Reference operations a DCC scene exposes. Implemented over the live
/// scene in a DCC session; `MemScene` implements it in memory for tests.
pub trait SceneRefs {
    /// Namespaces of the references currently in the scene.
    fn namespaces(&self) -> Vec<String>;

    /// Reference a generic output (publish, lookdev, scene).
    fn create_ref(&mut self, output: &Output, namespace: &str) -> Result<(), SceneError>;

    /// Reference a camera abc.
    fn create_cam_ref(&mut self, output: &Output, namespace: &str) -> Result<(), SceneError>;

    /// Reference a geometry abc cache.
    fn create_abc_ref(&mut self, output: &Output, namespace: &str) -> Result<(), SceneError>;

    /// Reference a vdb volume.
    fn create_vdb_ref(&mut self, output: &Output, namespace: &str) -> Result<(), SceneError>;

    /// Attach published lookdev shaders to an existing reference.
    fn attach_shaders(&mut self, namespace: &str, lookdev: &Output) -> Result<(), SceneError>;

    /// Remove the reference with the given namespace.
    fn delete_ref(&mut self, namespace: &str) -> Result<(), SceneError>;

    /// Repoint a reference at a different output.
    fn update_ref(&mut self, namespace: &str, output: &Output) -> Result<(), SceneError>;

    /// Change a reference's namespace.
    fn rename_ref(&mut self, namespace: &str, new_namespace: &str) -> Result<(), SceneError>;
}

/// One applied scene operation, as recorded by `MemScene`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneOp {
    CreateRef { namespace: String, path: String },
    CreateCamRef { namespace: String, path: String },
    CreateAbcRef { namespace: String, path: String },
    CreateVdbRef { namespace: String, path: String },
    AttachShaders { namespace: String, path: String },
    DeleteRef { namespace: String },
    UpdateRef { namespace: String, path: String },
    RenameRef { from: String, to: String },
}

/// In-memory scene which records operations in apply order.
#[derive(Debug, Default)]
pub struct MemScene {
    refs: Vec<String>,
    pub ops: Vec<SceneOp>,
}

impl MemScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the scene with existing reference namespaces.
    pub fn with_refs(namespaces: &[&str]) -> Self {
        Self {
            refs: namespaces.iter().map(|ns| ns.to_string()).collect(),
            ops: Vec::new(),
        }
    }

    fn check_free(&self, namespace: &str) -> Result<(), SceneError> {
        if self.refs.iter().any(|ns| ns == namespace) {
            return Err(SceneError::NamespaceInUse(namespace.to_string()));
        }
        Ok(())
    }

    fn check_exists(&self, namespace: &str) -> Result<(), SceneError> {
        if !self.refs.iter().any(|ns| ns == namespace) {
            return Err(SceneError::MissingRef(namespace.to_string()));
        }
        Ok(())
    }

    fn create(
        &mut self,
        output: &Output,
        namespace: &str,
        op: fn(String, String) -> SceneOp,
    ) -> Result<(), SceneError> {
        self.check_free(namespace)?;
        self.refs.push(namespace.to_string());
        self.ops.push(op(
            namespace.to_string(),
            output.path.display().to_string(),
        ));
        Ok(())
    }
}

impl SceneRefs for MemScene {
    fn namespaces(&self) -> Vec<String> {
        self.refs.clone()
    }

    fn create_ref(&mut self, output: &Output, namespace: &str) -> Result<(), SceneError> {
        self.create(output, namespace, |namespace, path| SceneOp::CreateRef {
            namespace,
            path,
        })
    }

    fn create_cam_ref(&mut self, output: &Output, namespace: &str) -> Result<(), SceneError> {
        self.create(output, namespace, |namespace, path| {
            SceneOp::CreateCamRef { namespace, path }
        })
    }

    fn create_abc_ref(&mut self, output: &Output, namespace: &str) -> Result<(), SceneError> {
        self.create(output, namespace, |namespace, path| {
            SceneOp::CreateAbcRef { namespace, path }
        })
    }

    fn create_vdb_ref(&mut self, output: &Output, namespace: &str) -> Result<(), SceneError> {
        self.create(output, namespace, |namespace, path| {
            SceneOp::CreateVdbRef { namespace, path }
        })
    }

    fn attach_shaders(&mut self, namespace: &str, lookdev: &Output) -> Result<(), SceneError> {
        self.check_exists(namespace)?;
        self.ops.push(SceneOp::AttachShaders {
            namespace: namespace.to_string(),
            path: lookdev.path.display().to_string(),
        });
        Ok(())
    }

    fn delete_ref(&mut self, namespace: &str) -> Result<(), SceneError> {
        self.check_exists(namespace)?;
        self.refs.retain(|ns| ns != namespace);
        self.ops.push(SceneOp::DeleteRef {
            namespace: namespace.to_string(),
        });
        Ok(())
    }

    fn update_ref(&mut self, namespace: &str, output: &Output) -> Result<(), SceneError> {
        self.check_exists(namespace)?;
        self.ops.push(SceneOp::UpdateRef {
            namespace: namespace.to_string(),
            path: output.path.display().to_string(),
        });
        Ok(())
    }

    fn rename_ref(&mut self, namespace: &str, new_namespace: &str) -> Result<(), SceneError> {
        self.check_exists(namespace)?;
        self.check_free(new_namespace)?;
        for ns in &mut self.refs {
            if ns == namespace {
                *ns = new_namespace.to_string();
            }
        }
        self.ops.push(SceneOp::RenameRef {
            from: namespace.to_string(),
            to: new_namespace.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod scene_test {
    use super::*;
    use pini_pipe::output::ContentType;

    #[test]
    fn mem_scene_tracks_refs_and_ops() {
        let mut scene = MemScene::with_refs(&["deer01"]);
        let cache = Output::new("/jobs/x/fox01.abc", "fox", "fox01", ContentType::GeoAbc);

        scene.create_abc_ref(&cache, "fox01").unwrap();
        assert_eq!(scene.namespaces(), vec!["deer01", "fox01"]);

        scene.rename_ref("fox01", "fox02").unwrap();
        scene.delete_ref("deer01").unwrap();
        assert_eq!(scene.namespaces(), vec!["fox02"]);

        assert!(matches!(
            scene.delete_ref("deer01"),
            Err(SceneError::MissingRef(_))
        ));
        assert_eq!(scene.ops.len(), 3);
    }
}
