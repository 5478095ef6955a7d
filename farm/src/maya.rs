//! Maya job kinds: full-scene renders and headless mayapy scripts.
//!
//! Scene state (renderer, cameras, referenced assets) is captured into a
//! `DccScene` snapshot by the caller at staging time, so job building is
//! a pure function of the snapshot rather than of a live DCC session.

use crate::{
    config::FarmConfig,
    job::Job,
    submit::SubmitError,
    wrap::{self, WrapOpts},
    writer::{push, JobData},
};
use pini_pipe::output::Output;
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Snapshot of the DCC scene state a maya submission depends on.
#[derive(Debug, Clone)]
pub struct DccScene {
    /// Current renderer, as reported by render globals (lowercase,
    /// e.g. "arnold").
    pub renderer: String,
    /// Maya version (e.g. "2023").
    pub version: String,
    /// Render resolution.
    pub res: (u32, u32),
    /// Project/workspace root.
    pub project_path: PathBuf,
    /// Resolved images output dir for the workspace.
    pub images_dir: PathBuf,
    pub ocio_config: String,
    pub ocio_policy: String,
    /// Renderable cameras, active camera first.
    pub cameras: Vec<String>,
    /// Paths referenced by the scene (textures, caches, references).
    pub path_refs: Vec<PathBuf>,
}

/// One renderable layer of a render batch, as gathered from the scene
/// by the DCC layer.
#[derive(Debug, Clone)]
pub struct RenderLayer {
    pub layer: String,
    pub camera: String,
    /// Image sequence the layer renders to.
    pub output: Output,
}

/// One cacheable exported by a headless cache batch.
#[derive(Debug, Clone)]
pub struct CacheTask {
    /// Display label, usually the reference namespace.
    pub label: String,
    /// Python payload which exports the cache.
    pub py: String,
    /// Cache the task writes.
    pub output: Output,
}

/// A render submission for one layer/camera pair.
#[derive(Debug, Clone)]
pub struct MayaRenderKind {
    pub layer: String,
    pub camera: String,
    pub dcc: DccScene,
    pub ignore_error_211: bool,
    pub strict_error_checking: bool,
    /// Request a quick-draft movie from the scheduler.
    pub draft: bool,
}

impl MayaRenderKind {
    pub fn new(layer: impl Into<String>, camera: impl Into<String>, dcc: DccScene) -> Self {
        Self {
            layer: layer.into(),
            camera: camera.into(),
            dcc,
            ignore_error_211: false,
            strict_error_checking: false,
            draft: false,
        }
    }

    /// Image prefix applied to render globals on the worker: the output
    /// path relative to the images dir, with the layer name replaced by
    /// the renderer's layer token and the frame padding stripped.
    pub fn image_prefix(&self, output: &Output) -> Result<String, SubmitError> {
        let token = match self.dcc.renderer.as_str() {
            "arnold" => "<RenderLayer>",
            "vray" => "<layer>",
            "redshift" => "<Layer>",
            other => return Err(SubmitError::UnsupportedRenderer(other.to_string())),
        };
        debug!("Deriving image prefix with {token} token");

        let path = output.path.display().to_string().replace(&output.name, token);
        let images_dir = self.dcc.images_dir.display().to_string();
        let rel = path
            .strip_prefix(&images_dir)
            .map(|rel| rel.trim_start_matches('/'))
            .ok_or_else(|| SubmitError::BadOutputPath(output.path.clone()))?;
        let (prefix, _) = rel
            .split_once(".%04d.")
            .ok_or_else(|| SubmitError::BadOutputPath(output.path.clone()))?;
        Ok(prefix.to_string())
    }

    pub(crate) fn build_info_extra(&self, job: &Job, data: &mut JobData) -> Result<(), SubmitError> {
        let output = job
            .output
            .as_ref()
            .ok_or_else(|| SubmitError::NoOutput(job.name.clone()))?;

        push(data, "MinRenderTimeMinutes", "0");

        // Quick-draft movie settings read by the scheduler's event plugin
        push(data, "ExtraInfoKeyValue0", "DraftFrameRate=24");
        push(data, "ExtraInfoKeyValue1", "DraftType=movie");
        push(data, "ExtraInfoKeyValue2", "DraftExtension=mov");
        push(data, "ExtraInfoKeyValue3", "DraftCodec=h264");
        push(data, "ExtraInfoKeyValue4", "DraftQuality=100");
        push(data, "ExtraInfoKeyValue5", "DraftColorSpaceIn=Draft sRGB");
        push(data, "ExtraInfoKeyValue6", "DraftColorSpaceOut=Draft sRGB");
        push(data, "ExtraInfoKeyValue7", "DraftResolution=1");
        push(
            data,
            "ExtraInfoKeyValue8",
            format!("SubmitQuickDraft={}", py_bool(self.draft)),
        );

        let output_filename = output.path.display().to_string().replace(".%04d.", ".####.");
        push(data, "OutputFilename0", output_filename);

        for (idx, path) in gather_asset_files(&self.dcc.path_refs).iter().enumerate() {
            push(data, format!("AWSAssetFile{idx}"), path);
        }

        Ok(())
    }

    pub(crate) fn build_job_data(&self, job: &Job) -> Result<JobData, SubmitError> {
        let output = job
            .output
            .as_ref()
            .ok_or_else(|| SubmitError::NoOutput(job.name.clone()))?;
        let (width, height) = self.dcc.res;

        let mut data = JobData::new();
        push(&mut data, "Animation", "1");
        push(&mut data, "Build", "64bit");
        push(&mut data, "CountRenderableCameras", "1");
        push(&mut data, "EnableOpenColorIO", "1");
        push(&mut data, "IgnoreError211", py_bool(self.ignore_error_211));
        push(&mut data, "ImageHeight", height);
        push(&mut data, "ImageWidth", width);
        push(&mut data, "OCIOConfigFile", &self.dcc.ocio_config);
        push(&mut data, "OCIOPolicyFile", &self.dcc.ocio_policy);
        push(
            &mut data,
            "OutputFilePath",
            format!("{}/", self.dcc.images_dir.display()),
        );
        push(&mut data, "OutputFilePrefix", self.image_prefix(output)?);
        push(&mut data, "ProjectPath", self.dcc.project_path.display());
        push(&mut data, "RenderSetupIncludeLights", "1");
        push(&mut data, "StartupScript", "");
        push(
            &mut data,
            "StrictErrorChecking",
            py_bool(self.strict_error_checking),
        );
        push(&mut data, "UseLegacyRenderLayers", "0");
        push(&mut data, "UseLocalAssetCaching", "0");
        push(&mut data, "SceneFile", job.scene.display());
        push(&mut data, "Version", &self.dcc.version);

        // Active camera in the unindexed slot, all renderables from 1
        push(&mut data, "Camera", self.camera.trim_matches('|'));
        push(&mut data, "Camera0", "");
        for (idx, cam) in self.dcc.cameras.iter().enumerate() {
            push(&mut data, format!("Camera{}", idx + 1), cam);
        }

        push(&mut data, "FrameNumberOffset", "0");
        push(&mut data, "LocalRendering", "0");
        push(&mut data, "MaxProcessors", "0");
        push(&mut data, "RenderHalfFrames", "0");
        push(&mut data, "RenderLayer", &self.layer);
        push(&mut data, "Renderer", &self.dcc.renderer);
        push(&mut data, "UsingRenderLayers", "1");

        if self.dcc.renderer == "arnold" {
            push(&mut data, "ArnoldVerbose", "2");
            push(&mut data, "MayaToArnoldVersion", "5");
        }

        Ok(data)
    }
}

/// A python script run by a headless maya session on the worker.
#[derive(Debug, Clone)]
pub struct MayaPyKind {
    pub py: String,
    /// Maya version submitted to the scheduler.
    pub maya_version: String,
    /// Scene loaded on startup; falls back to the configured empty scene.
    pub scene: Option<PathBuf>,
    resolved_scene: PathBuf,
    py_file: PathBuf,
    wrapped: String,
}

impl MayaPyKind {
    pub fn new(py: impl Into<String>, maya_version: impl Into<String>) -> Self {
        Self {
            py: py.into(),
            maya_version: maya_version.into(),
            scene: None,
            resolved_scene: PathBuf::new(),
            py_file: PathBuf::new(),
            wrapped: String::new(),
        }
    }

    pub fn with_scene(mut self, scene: PathBuf) -> Self {
        self.scene = Some(scene);
        self
    }

    pub(crate) fn prepare(
        &mut self,
        name: &str,
        py_file: &Path,
        config: &FarmConfig,
    ) -> Result<(), SubmitError> {
        let scene = self
            .scene
            .clone()
            .or_else(|| config.empty_scene.clone())
            .ok_or(SubmitError::NoEmptyScene)?;
        let opts = WrapOpts {
            scene: Some(&scene),
            maya: true,
            print_traceback: false,
        };
        self.wrapped = wrap::wrap_py(&self.py, name, py_file, &opts)?;
        self.resolved_scene = scene;
        self.py_file = py_file.to_path_buf();
        Ok(())
    }

    pub(crate) fn wrapped(&self) -> &str {
        &self.wrapped
    }

    pub(crate) fn build_job_data(&self, _job: &Job) -> Result<JobData, SubmitError> {
        let mut data = JobData::new();
        push(&mut data, "Arguments", "");
        push(&mut data, "SingleFramesOnly", "False");
        push(&mut data, "Build", "None");
        push(&mut data, "ProjectPath", "None");
        push(&mut data, "RenderSetupIncludeLights", "1");
        push(&mut data, "SceneFile", self.resolved_scene.display());
        push(&mut data, "ScriptFilename", self.py_file.display());
        push(&mut data, "ScriptJob", "True");
        push(&mut data, "StrictErrorChecking", "False");
        push(&mut data, "Version", &self.maya_version);
        push(&mut data, "UseLegacyRenderLayers", "0");
        Ok(data)
    }
}

/// Deduplicated sorted asset paths for upload, adding the `.tx` sibling
/// for jpg textures (the renderer reads the converted copy).
pub fn gather_asset_files(path_refs: &[PathBuf]) -> Vec<String> {
    let mut paths = BTreeSet::new();
    for path in path_refs {
        paths.insert(path.display().to_string());
        if path.extension().and_then(|extn| extn.to_str()) == Some("jpg") {
            paths.insert(path.with_extension("tx").display().to_string());
        }
    }
    paths.into_iter().collect()
}

fn py_bool(val: bool) -> &'static str {
    if val {
        "True"
    } else {
        "False"
    }
}

#[cfg(test)]
mod maya_test {
    use super::*;
    use pini_pipe::output::ContentType;

    fn dcc_scene(renderer: &str) -> DccScene {
        DccScene {
            renderer: renderer.to_string(),
            version: "2023".to_string(),
            res: (1920, 1080),
            project_path: PathBuf::from("/jobs/test/shot010/maya"),
            images_dir: PathBuf::from("/jobs/test/shot010/maya/images"),
            ocio_config: String::new(),
            ocio_policy: String::new(),
            cameras: vec!["renderCam".to_string()],
            path_refs: Vec::new(),
        }
    }

    fn render_output(layer: &str) -> Output {
        Output::new(
            PathBuf::from(format!(
                "/jobs/test/shot010/maya/images/shot010_{layer}_v001.%04d.exr"
            )),
            "shot010",
            layer,
            ContentType::Render,
        )
    }

    #[test]
    fn image_prefix_applies_renderer_token() {
        let output = render_output("bty");
        for (renderer, token) in [
            ("arnold", "<RenderLayer>"),
            ("vray", "<layer>"),
            ("redshift", "<Layer>"),
        ] {
            let kind = MayaRenderKind::new("bty", "renderCam", dcc_scene(renderer));
            let prefix = kind.image_prefix(&output).unwrap();
            assert_eq!(prefix, format!("shot010_{token}_v001"));
        }
    }

    #[test]
    fn unknown_renderer_is_an_error() {
        let kind = MayaRenderKind::new("bty", "renderCam", dcc_scene("renderman"));
        let result = kind.image_prefix(&render_output("bty"));
        assert!(matches!(
            result,
            Err(SubmitError::UnsupportedRenderer(renderer)) if renderer == "renderman"
        ));
    }

    #[test]
    fn asset_gather_adds_tx_siblings_and_dedups() {
        let refs = vec![
            PathBuf::from("/assets/tex/wall.jpg"),
            PathBuf::from("/assets/tex/wall.jpg"),
            PathBuf::from("/assets/geo/rock.abc"),
            PathBuf::from("/assets/tex/floor.exr"),
        ];
        let paths = gather_asset_files(&refs);
        assert_eq!(
            paths,
            vec![
                "/assets/geo/rock.abc",
                "/assets/tex/floor.exr",
                "/assets/tex/wall.jpg",
                "/assets/tex/wall.tx",
            ]
        );
    }
}
