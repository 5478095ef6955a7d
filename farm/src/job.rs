//! The scheduler job model.
//!
//! One `Job` carries the scheduler metadata shared by every submission;
//! the engine-specific payload (command line, python, maya render) lives
//! in a `JobKind` variant supplying the job data and any extra info keys.
//! (This is deliberately enum dispatch rather than an inheritance-style
//! trait-object chain.)

use crate::{
    config::FarmConfig,
    maya::{MayaPyKind, MayaRenderKind},
    submit::{Farm, SubmitError},
    wrap::{self, WrapOpts},
    writer::{self, push, JobData, KeySort},
};
use chrono::{DateTime, Local};
use pini_pipe::{frames, output::Output, time_to_uid, to_pascal, user};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A dependency on another scheduler job. Captured from a `Job` after its
/// batch has been submitted, or supplied as a raw scheduler id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    Id(String),
    /// A job which has not been through submission yet; named for
    /// diagnostics. Building a job around one of these fails.
    Unassigned(String),
}

impl From<&Job> for Dependency {
    fn from(job: &Job) -> Self {
        match &job.jid {
            Some(jid) => Self::Id(jid.clone()),
            None => Self::Unassigned(job.name.clone()),
        }
    }
}

/// Scheduler metadata options shared by all job kinds.
#[derive(Debug, Clone)]
pub struct JobOpts {
    pub stime: DateTime<Local>,
    pub priority: u32,
    pub machine_limit: u32,
    pub comment: String,
    pub error_limit: u32,
    pub frames: Vec<i64>,
    pub batch_name: Option<String>,
    pub dependencies: Vec<Dependency>,
    /// Submission group; falls back to the configured default.
    pub group: Option<String>,
    pub chunk_size: u32,
    pub limit_groups: Vec<String>,
    /// Work/scene file context (render scene, work file).
    pub scene: Option<PathBuf>,
    /// Artifact produced by this job.
    pub output: Option<Output>,
    /// Extra environment applied on the worker.
    pub env: Vec<(String, String)>,
}

impl Default for JobOpts {
    fn default() -> Self {
        Self {
            stime: Local::now(),
            priority: 50,
            machine_limit: 0,
            comment: String::new(),
            error_limit: 0,
            frames: vec![1],
            batch_name: None,
            dependencies: Vec::new(),
            group: None,
            chunk_size: 1,
            limit_groups: Vec::new(),
            scene: None,
            output: None,
            env: Vec::new(),
        }
    }
}

/// Engine-specific payload for a job.
#[derive(Debug, Clone)]
pub enum JobKind {
    Cmdline(CmdlineKind),
    Py(PyKind),
    MayaRender(MayaRenderKind),
    MayaPy(MayaPyKind),
}

impl JobKind {
    /// Submission-file type discriminator (used in file names).
    pub fn stype(&self) -> &'static str {
        match self {
            Self::Cmdline(_) => "Cmdline",
            Self::Py(_) => "Py",
            Self::MayaRender(_) => "MayaRender",
            Self::MayaPy(_) => "MayaPy",
        }
    }

    /// Scheduler plugin name.
    pub fn plugin(&self) -> &'static str {
        match self {
            Self::Cmdline(_) => "CommandLine",
            Self::Py(_) => "Python",
            Self::MayaRender(_) => "MayaRender",
            Self::MayaPy(_) => "MayaBatch",
        }
    }

    /// Extension of the auxiliary script file, if this kind writes one.
    fn aux_extn(&self) -> Option<&'static str> {
        match self {
            Self::Cmdline(_) => Some("sh"),
            Self::Py(_) | Self::MayaPy(_) => Some("py"),
            Self::MayaRender(_) => None,
        }
    }

    /// Finalize kind state which needs the derived submission paths
    /// (wrapping python payloads, resolving the headless scene).
    fn prepare(&mut self, name: &str, aux_file: Option<&Path>, config: &FarmConfig) -> Result<(), SubmitError> {
        match self {
            Self::Cmdline(_) | Self::MayaRender(_) => Ok(()),
            Self::Py(kind) => {
                let py_file = aux_file.expect("py kind has an aux file");
                kind.wrapped = if kind.wrap {
                    wrap::wrap_py(&kind.py, name, py_file, &WrapOpts::default())?
                } else {
                    crate::pycheck::check(&kind.py)?;
                    kind.py.clone()
                };
                Ok(())
            }
            Self::MayaPy(kind) => {
                let py_file = aux_file.expect("mayapy kind has an aux file");
                kind.prepare(name, py_file, config)
            }
        }
    }

    /// Content for the auxiliary script file.
    fn aux_content(&self) -> Option<String> {
        match self {
            Self::Cmdline(kind) => Some(kind.cmds.join(" ")),
            Self::Py(kind) => Some(kind.wrapped.clone()),
            Self::MayaPy(kind) => Some(kind.wrapped().to_string()),
            Self::MayaRender(_) => None,
        }
    }

    /// Extra info-data keys appended after the shared block. Purely
    /// additive; never repeats a shared key.
    fn build_info_extra(&self, job: &Job, data: &mut JobData) -> Result<(), SubmitError> {
        match self {
            Self::MayaRender(kind) => kind.build_info_extra(job, data),
            _ => Ok(()),
        }
    }

    /// Engine payload for the job file.
    fn build_job_data(&self, job: &Job) -> Result<JobData, SubmitError> {
        match self {
            Self::Cmdline(kind) => {
                let mut data = JobData::new();
                let (exe, args) = kind
                    .cmds
                    .split_first()
                    .ok_or_else(|| SubmitError::EmptyCommand(job.name.clone()))?;
                push(&mut data, "Executable", exe);
                // NOTE: no quoting - arguments containing spaces are not
                // round-trippable in this format
                push(&mut data, "Arguments", args.join(" "));
                Ok(data)
            }
            Self::Py(kind) => {
                let mut data = JobData::new();
                push(&mut data, "Arguments", "");
                push(&mut data, "Version", kind.py_version(&job.config));
                push(&mut data, "SingleFramesOnly", "False");
                Ok(data)
            }
            Self::MayaRender(kind) => kind.build_job_data(job),
            Self::MayaPy(kind) => kind.build_job_data(job),
        }
    }
}

/// A command-line job.
#[derive(Debug, Clone)]
pub struct CmdlineKind {
    pub cmds: Vec<String>,
}

/// A python job executed by a plain interpreter on the worker.
#[derive(Debug, Clone)]
pub struct PyKind {
    pub py: String,
    /// Wrap the payload with pipeline init boilerplate.
    pub wrap: bool,
    wrapped: String,
}

impl PyKind {
    pub fn new(py: impl Into<String>) -> Self {
        Self {
            py: py.into(),
            wrap: true,
            wrapped: String::new(),
        }
    }

    pub fn without_wrap(mut self) -> Self {
        self.wrap = false;
        self
    }

    fn py_version(&self, config: &FarmConfig) -> String {
        config
            .py_version
            .clone()
            .unwrap_or_else(|| "3.11".to_string())
    }
}

/// A job ready for (or through) submission.
///
/// Lifecycle is linear: constructed (validated) -> files written ->
/// submitted, at which point `jid` is assigned exactly once.
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub stime: DateTime<Local>,
    pub priority: u32,
    pub machine_limit: u32,
    pub comment: String,
    pub batch_name: String,
    pub frames: Vec<i64>,
    pub chunk_size: u32,
    pub group: String,
    pub limit_groups: Vec<String>,
    pub dependencies: Vec<Dependency>,
    pub error_limit: u32,
    /// Scene/work file listed in the submission manifest.
    pub scene: PathBuf,
    pub output: Option<Output>,
    pub env: Vec<(String, String)>,
    /// Scheduler-assigned id; unset until submission succeeds.
    pub jid: Option<String>,
    pub kind: JobKind,

    pub(crate) config: FarmConfig,
    pipe_name: String,
    info_file: PathBuf,
    job_file: PathBuf,
    aux_file: Option<PathBuf>,
}

impl Job {
    /// Build a job, validating group/limit-group/dependency state up
    /// front. Priority bounds are checked when info data is built.
    pub fn new(
        farm: &Farm,
        name: impl Into<String>,
        mut kind: JobKind,
        opts: JobOpts,
    ) -> Result<Self, SubmitError> {
        let name = name.into();
        debug!("Building {} job \"{name}\"", kind.stype());

        // Group must name a known scheduler group
        let group = match opts.group.or_else(|| farm.config().group.clone()) {
            Some(group) => group,
            None => return Err(SubmitError::BadGroup("<unset>".to_string())),
        };
        if !farm.find_groups()?.contains(&group) {
            return Err(SubmitError::BadGroup(group));
        }

        // Each limit group must be known
        if !opts.limit_groups.is_empty() {
            let known = farm.find_limit_groups()?;
            for limit_group in &opts.limit_groups {
                if !known.contains(limit_group) {
                    return Err(SubmitError::BadLimitGroup(limit_group.clone()));
                }
            }
        }

        // Dependencies need assigned scheduler ids
        for dep in &opts.dependencies {
            if let Dependency::Unassigned(dep_name) = dep {
                return Err(SubmitError::UnassignedDependency(dep_name.clone()));
            }
        }

        let tag = to_pascal(&name);
        let uid = time_to_uid(opts.stime);
        let stype = kind.stype();
        let to_file = |extn: &str| {
            farm.pipe_job().to_file(&format!(
                ".pini/Deadline/{}/{}/{}_{}.{}",
                user(),
                uid,
                stype,
                tag,
                extn
            ))
        };
        let info_file = to_file("info");
        let job_file = to_file("job");
        let aux_file = kind.aux_extn().map(to_file);

        kind.prepare(&name, aux_file.as_deref(), farm.config())?;

        // The manifest scene entry: the script file for script jobs,
        // otherwise the caller's scene/work file
        let scene = match aux_file {
            Some(ref aux) if !matches!(kind, JobKind::MayaRender(_)) => aux.clone(),
            _ => opts
                .scene
                .clone()
                .ok_or_else(|| SubmitError::NoScene(name.clone()))?,
        };

        let batch_name = opts
            .batch_name
            .or_else(|| {
                opts.scene
                    .as_deref()
                    .and_then(file_base)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| name.clone());

        Ok(Self {
            name,
            stime: opts.stime,
            priority: opts.priority,
            machine_limit: opts.machine_limit,
            comment: opts.comment,
            batch_name,
            frames: opts.frames,
            chunk_size: opts.chunk_size,
            group,
            limit_groups: opts.limit_groups,
            dependencies: opts.dependencies,
            error_limit: opts.error_limit,
            scene,
            output: opts.output,
            env: opts.env,
            jid: None,
            kind,
            config: farm.config().clone(),
            pipe_name: farm.pipe_job().name.clone(),
            info_file,
            job_file,
            aux_file,
        })
    }

    /// Submission-batch uid derived from the submission time.
    pub fn uid(&self) -> String {
        time_to_uid(self.stime)
    }

    /// Filesystem-safe form of the job name.
    pub fn tag(&self) -> String {
        to_pascal(&self.name)
    }

    pub fn info_file(&self) -> &Path {
        &self.info_file
    }

    pub fn job_file(&self) -> &Path {
        &self.job_file
    }

    pub fn aux_file(&self) -> Option<&Path> {
        self.aux_file.as_deref()
    }

    /// Build the scheduler metadata payload for the info file.
    pub fn build_info_data(&self) -> Result<JobData, SubmitError> {
        if self.priority == 0 || self.priority >= 100 {
            return Err(SubmitError::BadPriority(self.priority));
        }

        // Assemble the dependency id string; a "None" anywhere in it
        // would submit a corrupt dependency reference
        let mut dep_ids = Vec::with_capacity(self.dependencies.len());
        for dep in &self.dependencies {
            match dep {
                Dependency::Id(id) if !id.is_empty() && !id.contains("None") => {
                    dep_ids.push(id.clone())
                }
                Dependency::Id(id) => return Err(SubmitError::BadDependencyId(id.clone())),
                Dependency::Unassigned(name) => {
                    return Err(SubmitError::UnassignedDependency(name.clone()))
                }
            }
        }
        let dep_str = dep_ids.join(",");

        let frames_str = frames::format_frames(&self.frames)?;

        let mut data = JobData::new();
        push(&mut data, "Plugin", self.kind.plugin());
        push(&mut data, "Name", &self.name);
        push(&mut data, "Comment", &self.comment);
        push(&mut data, "Department", "");
        push(&mut data, "Pool", "none");
        push(&mut data, "SecondaryPool", "");
        push(&mut data, "Group", &self.group);
        push(&mut data, "Priority", self.priority);
        push(&mut data, "TaskTimeoutMinutes", "0");
        push(&mut data, "EnableAutoTimeout", "False");
        push(&mut data, "ConcurrentTasks", "1");
        push(&mut data, "LimitConcurrentTasksToNumberOfCpus", "True");
        push(&mut data, "MachineLimit", self.machine_limit);
        push(&mut data, "Whitelist", "");
        push(&mut data, "LimitGroups", self.limit_groups.join(","));
        push(&mut data, "JobDependencies", &dep_str);
        push(&mut data, "OnJobComplete", "Nothing");
        push(&mut data, "InitialStatus", "Active");
        push(&mut data, "Frames", frames_str);
        push(&mut data, "ChunkSize", self.chunk_size);
        push(&mut data, "ExtraInfo0", &self.pipe_name);

        push(&mut data, "BatchName", &self.batch_name);
        if let Some(output) = &self.output {
            push(&mut data, "OutputDirectory0", output.dir().display());
        }
        if self.error_limit > 0 {
            push(&mut data, "OverrideJobFailureDetection", "True");
            push(&mut data, "FailureDetectionJobErrors", self.error_limit);
        }
        for (idx, (key, val)) in self.env.iter().enumerate() {
            push(&mut data, format!("EnvironmentKeyValue{idx}"), format!("{key}={val}"));
        }

        self.kind.build_info_extra(self, &mut data)?;

        Ok(data)
    }

    /// Write the submission files for this job: auxiliary script first,
    /// then info file, then job file. Each target must not pre-exist -
    /// a collision means two jobs derived the same path within one
    /// submission batch, which is a caller sequencing bug.
    pub fn write_submission_files(&self) -> Result<(), SubmitError> {
        // A repeat call must fail before touching anything from the
        // first one
        if self.info_file.exists() {
            return Err(SubmitError::FileExists(self.info_file.clone()));
        }
        if self.job_file.exists() {
            return Err(SubmitError::FileExists(self.job_file.clone()));
        }

        if let (Some(aux_file), Some(content)) = (&self.aux_file, self.kind.aux_content()) {
            if let Some(parent) = aux_file.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(aux_file, content)?;
            debug!(" - AUX FILE {}", aux_file.display());
        }

        info!(" - INFO FILE {}", self.info_file.display());
        let info_data = self.build_info_data()?;
        writer::write_deadline_data(&self.info_file, &info_data, KeySort::info())?;

        let job_data = self.kind.build_job_data(self)?;
        writer::write_deadline_data(&self.job_file, &job_data, KeySort::job())?;
        info!(" - JOB {}", self.job_file.display());

        Ok(())
    }

    /// Submit this job on its own.
    pub fn submit(&mut self, farm: &Farm, submit: bool) -> Result<Option<String>, SubmitError> {
        let name = self.tag();
        let ids = farm.submit_jobs(std::slice::from_mut(self), &name, submit)?;
        Ok(ids.into_iter().next().flatten())
    }
}

fn file_base(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|stem| stem.to_str())
}
