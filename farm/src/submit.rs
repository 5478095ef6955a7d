//! Submission of job batches to the scheduler, id readback and
//! submission-history housekeeping.

use crate::{
    config::{ConfigError, FarmConfig},
    job::{Dependency, Job, JobKind, JobOpts, PyKind},
    maya::{CacheTask, DccScene, MayaPyKind, MayaRenderKind, RenderLayer},
    pycheck::PyCheckError,
};
use chrono::{DateTime, Local};
use ignore::WalkBuilder;
use once_cell::sync::OnceCell;
use pini_pipe::{frames::FrameError, output::Output, uid_to_time, user, Confirm, PipeJob};
use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, error, info, warn};

#[derive(thiserror::Error, Debug)]
pub enum SubmitError {
    #[error("Bad submission group \"{0}\"")]
    BadGroup(String),
    #[error("Bad limit group \"{0}\"")]
    BadLimitGroup(String),
    #[error("Dependency \"{0}\" has no job id - submit it first")]
    UnassignedDependency(String),
    #[error("Bad dependency id \"{0}\"")]
    BadDependencyId(String),
    #[error("Bad priority {0} - must be in range 1-99")]
    BadPriority(u32),
    #[error("Submission file already exists at {0}")]
    FileExists(PathBuf),
    #[error("Jobs in a batch must share a submission time")]
    MismatchedStimes,
    #[error("No jobs to submit")]
    NoJobs,
    #[error("Empty command for job \"{0}\"")]
    EmptyCommand(String),
    #[error("No scene supplied for job \"{0}\"")]
    NoScene(String),
    #[error("No output attached to job \"{0}\"")]
    NoOutput(String),
    #[error("No empty scene configured for headless maya jobs")]
    NoEmptyScene,
    #[error("No submitter implemented for {0} renderer")]
    UnsupportedRenderer(String),
    #[error("Output path {0} does not map to an image prefix")]
    BadOutputPath(PathBuf),
    #[error("Scheduler submission returned no job ids")]
    SubmissionFailed { stdout: String, stderr: String },
    #[error("Bad age \"{0}\" - expected weeks notation (eg. 2w)")]
    BadAge(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    PyCheck(#[from] PyCheckError),
    #[error(transparent)]
    BadFrames(#[from] FrameError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The scheduler endpoint for one pipeline job: owns the config, the
/// submission root and the cached group queries.
#[derive(Debug)]
pub struct Farm {
    config: FarmConfig,
    pipe_job: PipeJob,
    groups: OnceCell<Vec<String>>,
    limit_groups: OnceCell<Vec<String>>,
}

impl Farm {
    pub fn new(config: FarmConfig, pipe_job: PipeJob) -> Self {
        Self {
            config,
            pipe_job,
            groups: OnceCell::new(),
            limit_groups: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &FarmConfig {
        &self.config
    }

    pub fn pipe_job(&self) -> &PipeJob {
        &self.pipe_job
    }

    /// Available submission groups: the configured override, else queried
    /// from the scheduler once per process.
    pub fn find_groups(&self) -> Result<Vec<String>, SubmitError> {
        if !self.config.groups.is_empty() {
            return Ok(self.config.groups.clone());
        }
        self.groups
            .get_or_try_init(|| self.query_names("-Groups"))
            .map(Vec::clone)
    }

    /// Available limit groups: the configured override, else queried from
    /// the scheduler once per process.
    pub fn find_limit_groups(&self) -> Result<Vec<String>, SubmitError> {
        if !self.config.limit_groups.is_empty() {
            return Ok(self.config.limit_groups.clone());
        }
        self.limit_groups
            .get_or_try_init(|| self.query_names("-GetLimitGroupNames"))
            .map(Vec::clone)
    }

    fn query_names(&self, flag: &str) -> Result<Vec<String>, SubmitError> {
        let exe = self.config.executable()?;
        debug!("Querying scheduler names {} {flag}", exe.display());
        let output = Command::new(exe).arg(flag).output()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.split_whitespace().map(str::to_string).collect())
    }

    /// Submit a batch of jobs sharing one submission time.
    ///
    /// Writes each job's submission files, then a `.sub` manifest naming
    /// them, then hands the manifest to the scheduler executable and scans
    /// its stdout for assigned ids. With `submit=false` everything is
    /// written but nothing is spawned and the ids come back as `None`.
    pub fn submit_jobs(
        &self,
        jobs: &mut [Job],
        name: &str,
        submit: bool,
    ) -> Result<Vec<Option<String>>, SubmitError> {
        let first = jobs.first().ok_or(SubmitError::NoJobs)?;
        if jobs.iter().any(|job| job.stime != first.stime) {
            return Err(SubmitError::MismatchedStimes);
        }

        for job in jobs.iter() {
            job.write_submission_files()?;
        }

        // Manifest naming every job in the batch
        let sub_dir = jobs[0]
            .job_file()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let sub_file = sub_dir.join(format!("{name}.sub"));
        if sub_file.exists() {
            return Err(SubmitError::FileExists(sub_file));
        }
        let mut lines = vec!["-SubmitMultipleJobs".to_string()];
        for job in jobs.iter() {
            lines.push(String::new());
            lines.push("-Job".to_string());
            lines.push(job.info_file().display().to_string());
            lines.push(job.job_file().display().to_string());
            lines.push(job.scene.display().to_string());
        }
        fs::write(&sub_file, lines.join("\n"))?;
        info!(" - SUB FILE {}", sub_file.display());

        let jids = if submit {
            let exe = self.config.executable()?;
            debug!(" - CMDS {} {}", exe.display(), sub_file.display());
            let output = Command::new(exe).arg(&sub_file).output()?;
            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            debug!(" - OUT {stdout}");
            let ids = read_job_ids(&stdout);
            if ids.len() != jobs.len() {
                error!(" - OUT {stdout}");
                error!(" - ERR {stderr}");
                return Err(SubmitError::SubmissionFailed { stdout, stderr });
            }
            ids.into_iter().map(Some).collect()
        } else {
            vec![None; jobs.len()]
        };
        info!(" - JOB IDS {jids:?}");

        for (job, jid) in jobs.iter_mut().zip(&jids) {
            job.jid = jid.clone();
        }

        // Housekeeping; a failure here never fails the submission
        let mut auto = pini_pipe::AutoConfirm;
        if let Err(err) = self.flush_old_submissions(
            &self.config.flush_max_age,
            self.config.flush_count,
            true,
            &mut auto,
        ) {
            warn!(error = ?err, "Failed to flush old submissions");
        }

        Ok(jids)
    }

    /// Singleton sugar for `submit_jobs`.
    pub fn submit_job(&self, job: &mut Job, submit: bool) -> Result<Option<String>, SubmitError> {
        let name = job.tag();
        let jids = self.submit_jobs(std::slice::from_mut(job), &name, submit)?;
        Ok(jids.into_iter().next().flatten())
    }

    /// Submit a single wrapped python job.
    pub fn submit_py(
        &self,
        py: impl Into<String>,
        name: &str,
        opts: JobOpts,
        submit: bool,
    ) -> Result<Job, SubmitError> {
        let mut job = Job::new(self, name, JobKind::Py(PyKind::new(py)), opts)?;
        self.submit_job(&mut job, submit)?;
        Ok(job)
    }

    /// Submit one render job per layer against the work scene, then the
    /// trailing job which refreshes the work file's output cache once
    /// every layer has rendered. Returns the render jobs and the update
    /// job.
    pub fn submit_maya_render(
        &self,
        work: &Path,
        dcc: &DccScene,
        layers: &[RenderLayer],
        opts: &JobOpts,
        submit: bool,
    ) -> Result<(Vec<Job>, Job), SubmitError> {
        if layers.is_empty() {
            return Err(SubmitError::NoJobs);
        }
        let base = file_base(work).unwrap_or("render");

        let mut jobs = Vec::with_capacity(layers.len());
        for layer in layers {
            let kind = MayaRenderKind::new(&layer.layer, &layer.camera, dcc.clone());
            let name = format!(
                "{base} - {} - {}",
                layer.layer,
                layer.camera.trim_matches('|')
            );
            let job_opts = JobOpts {
                scene: Some(work.to_path_buf()),
                output: Some(layer.output.clone()),
                ..opts.clone()
            };
            jobs.push(Job::new(self, name, JobKind::MayaRender(kind), job_opts)?);
        }
        self.submit_jobs(&mut jobs, "render", submit)?;

        let outputs: Vec<Output> = layers.iter().map(|layer| layer.output.clone()).collect();
        let update = self.submit_update_job(
            work, base, &jobs, &outputs, opts.stime, opts.priority, &opts.comment, submit,
        )?;
        Ok((jobs, update))
    }

    /// Submit one headless cache-export job per task against the work
    /// scene, then the trailing update job.
    pub fn submit_maya_cache(
        &self,
        work: &Path,
        maya_version: &str,
        tasks: &[CacheTask],
        opts: &JobOpts,
        submit: bool,
    ) -> Result<(Vec<Job>, Job), SubmitError> {
        if tasks.is_empty() {
            return Err(SubmitError::NoJobs);
        }
        let base = file_base(work).unwrap_or("cache");

        let mut jobs = Vec::with_capacity(tasks.len());
        for task in tasks {
            let kind = MayaPyKind::new(&task.py, maya_version).with_scene(work.to_path_buf());
            let name = format!("{base} - {} [cache]", task.label);
            let job_opts = JobOpts {
                scene: Some(work.to_path_buf()),
                output: Some(task.output.clone()),
                ..opts.clone()
            };
            jobs.push(Job::new(self, name, JobKind::MayaPy(kind), job_opts)?);
        }
        self.submit_jobs(&mut jobs, "cache", submit)?;

        let outputs: Vec<Output> = tasks.iter().map(|task| task.output.clone()).collect();
        let update = self.submit_update_job(
            work, base, &jobs, &outputs, opts.stime, opts.priority, &opts.comment, submit,
        )?;
        Ok((jobs, update))
    }

    /// Submit the trailing job of a batch: a python job which refreshes
    /// the work file's output cache once every dependency has landed.
    /// Dependencies are taken from the jobs with assigned ids; a dry-run
    /// batch has none, so its update job carries no dependencies.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_update_job(
        &self,
        work: &Path,
        batch_name: &str,
        dependencies: &[Job],
        outputs: &[Output],
        stime: DateTime<Local>,
        priority: u32,
        comment: &str,
        submit: bool,
    ) -> Result<Job, SubmitError> {
        let py = build_update_py(work, outputs);
        let deps: Vec<Dependency> = dependencies
            .iter()
            .filter(|job| job.jid.is_some())
            .map(Dependency::from)
            .collect();
        let base = file_base(work).unwrap_or(batch_name);
        let name = format!("{base} [update cache]");

        let opts = JobOpts {
            stime,
            priority,
            comment: comment.to_string(),
            batch_name: Some(batch_name.to_string()),
            dependencies: deps,
            scene: Some(work.to_path_buf()),
            ..JobOpts::default()
        };
        let mut job = Job::new(self, name, JobKind::Py(PyKind::new(py)), opts)?;
        self.submit_jobs(std::slice::from_mut(&mut job), "update", submit)?;
        Ok(job)
    }

    /// Remove old submission dirs for the current user, keeping the
    /// newest `count` and anything younger than `max_age` (weeks
    /// notation, eg. "2w"). Returns how many dirs were removed; a
    /// declined confirmation removes nothing.
    pub fn flush_old_submissions(
        &self,
        max_age: &str,
        count: usize,
        force: bool,
        confirm: &mut dyn Confirm,
    ) -> Result<usize, SubmitError> {
        debug!("Flushing old submissions");
        let max_age_secs = age_from_nice(max_age)?;
        let root = self.pipe_job.to_file(&format!(".pini/Deadline/{}", user()));
        if !root.is_dir() {
            return Ok(0);
        }

        // Submission dirs, newest first (uids sort chronologically)
        let mut subs: Vec<PathBuf> = WalkBuilder::new(&root)
            .max_depth(Some(1))
            .standard_filters(false)
            .build()
            .filter_map(Result::ok)
            .map(|entry| entry.into_path())
            .filter(|path| path != &root && path.is_dir())
            .collect();
        subs.sort();
        subs.reverse();
        debug!(" - Found {} submissions", subs.len());

        let now = Local::now().naive_local();
        let to_delete: Vec<&PathBuf> = subs
            .iter()
            .skip(count)
            .filter(|sub| {
                let uid = sub.file_name().and_then(|name| name.to_str());
                match uid.and_then(uid_to_time) {
                    Some(stime) => (now - stime).num_seconds() > max_age_secs,
                    None => false,
                }
            })
            .collect();
        if to_delete.is_empty() {
            debug!(" - Nothing to flush");
            return Ok(0);
        }

        if !force {
            let msg = format!("Flush {} old submissions?", to_delete.len());
            if !confirm.confirm(&msg) {
                return Ok(0);
            }
        }
        for sub in &to_delete {
            info!(" - Flushing {}", sub.display());
            fs::remove_dir_all(sub)?;
        }
        Ok(to_delete.len())
    }
}

/// Scan scheduler output for assigned job ids.
pub fn read_job_ids(result: &str) -> Vec<String> {
    result
        .lines()
        .filter_map(|line| line.strip_prefix("JobID="))
        .map(|id| id.trim().to_string())
        .collect()
}

/// Convert readable age notation (eg. "2w") to seconds.
fn age_from_nice(nice: &str) -> Result<i64, SubmitError> {
    if let Some(weeks) = nice.strip_suffix('w') {
        if let Ok(weeks) = weeks.parse::<i64>() {
            return Ok(weeks * 60 * 60 * 24 * 7);
        }
    }
    Err(SubmitError::BadAge(nice.to_string()))
}

/// Python executed by an update job: rebuilds the output objects then
/// refreshes the work file's output cache.
fn build_update_py(work: &Path, outputs: &[Output]) -> String {
    let mut lines = vec!["from pini import pipe".to_string(), String::new()];

    if !outputs.is_empty() {
        lines.push("# Build output objects".to_string());
        lines.push("_outs = [".to_string());
        for output in outputs {
            lines.push(format!("    pipe.to_output(\"{}\"),", output.path.display()));
        }
        lines.push("]".to_string());
        lines.push(String::new());
        lines.push("for _out in _outs:".to_string());
        lines.push("    if not _out.exists():".to_string());
        lines.push("        raise RuntimeError(f\"Missing output {_out.path}\")".to_string());
        lines.push(String::new());
    }

    lines.push("# Update work outputs cache".to_string());
    lines.push(format!(
        "_work_c = pipe.CACHE.obt_work(\"{}\")",
        work.display()
    ));
    lines.push("_work_c.find_outputs(force=True)".to_string());
    lines.push(String::new());

    lines.join("\n")
}

fn file_base(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|stem| stem.to_str())
}

#[cfg(test)]
mod submit_test {
    use super::*;

    #[test]
    fn job_ids_read_from_submission_output() {
        let out = "Submitting job 1\n\
                   JobID=63e40a1ab2c3d400012a5678\n\
                   Result=Success\n\
                   JobID=63e40a1ab2c3d400012a5679 \n\
                   Done\n";
        assert_eq!(
            read_job_ids(out),
            vec![
                "63e40a1ab2c3d400012a5678".to_string(),
                "63e40a1ab2c3d400012a5679".to_string(),
            ]
        );
        assert!(read_job_ids("no ids here\n").is_empty());
    }

    #[test]
    fn nice_ages_convert_to_seconds() {
        assert_eq!(age_from_nice("2w").unwrap(), 2 * 7 * 24 * 60 * 60);
        assert!(age_from_nice("2d").is_err());
        assert!(age_from_nice("w").is_err());
    }

    #[test]
    fn update_py_passes_syntax_check() {
        let outputs = vec![Output::new(
            "/jobs/test/render/bg_v001.%04d.exr",
            "shot010",
            "bg",
            pini_pipe::output::ContentType::Render,
        )];
        let py = build_update_py(Path::new("/jobs/test/work/shot010_lighting_v001.ma"), &outputs);
        crate::pycheck::check(&py).unwrap();
        assert!(py.contains("pipe.to_output(\"/jobs/test/render/bg_v001.%04d.exr\")"));
    }
}
