use clap::{Parser, Subcommand};
use pini_farm::{CmdlineKind, Farm, FarmConfig, Job, JobKind, JobOpts, SubmitError};
use pini_pipe::{Confirm, PipeJob};
use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    process::ExitCode,
};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pini-farm")]
#[command(version)]
#[command(about = "Submit pipeline jobs to the render farm")]
struct Args {
    /// Farm config file (yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pipeline job name
    #[arg(long, default_value = "unnamed")]
    job_name: String,

    /// Pipeline job root dir
    #[arg(long, default_value = ".")]
    job_root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a python job
    SubmitPy {
        /// Job name
        name: String,

        /// Python file to execute
        py_file: PathBuf,

        /// Job priority (1-99)
        #[arg(long, default_value = "50")]
        priority: u32,

        /// Job comment
        #[arg(long, default_value = "")]
        comment: String,

        /// Write submission files without submitting
        #[arg(long)]
        dry_run: bool,
    },

    /// Submit a command-line job
    SubmitCmd {
        /// Job name
        name: String,

        /// Command and arguments to run
        #[arg(required = true, trailing_var_arg = true)]
        cmds: Vec<String>,

        /// Job priority (1-99)
        #[arg(long, default_value = "50")]
        priority: u32,

        /// Job comment
        #[arg(long, default_value = "")]
        comment: String,

        /// Write submission files without submitting
        #[arg(long)]
        dry_run: bool,
    },

    /// Flush old submission dirs for the current user
    Flush {
        /// Remove submissions older than this (weeks notation, eg. 2w)
        #[arg(long)]
        max_age: Option<String>,

        /// Keep this many recent submissions
        #[arg(long)]
        count: Option<usize>,

        /// Flush without confirmation
        #[arg(long)]
        force: bool,
    },

    /// List available submission groups
    Groups,
}

/// Prompts on stdin for flush confirmation.
struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&mut self, msg: &str) -> bool {
        print!("{msg} [y/N] ");
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim(), "y" | "Y" | "yes")
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "Command failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), SubmitError> {
    let config = match &args.config {
        Some(path) => FarmConfig::load(path)?,
        None => {
            let mut config = FarmConfig::default();
            config.apply_env();
            config
        }
    };
    let pipe_job = PipeJob::new(args.job_name.clone(), args.job_root.clone());
    let farm = Farm::new(config, pipe_job);

    match args.command {
        Command::SubmitPy {
            name,
            py_file,
            priority,
            comment,
            dry_run,
        } => {
            let py = std::fs::read_to_string(&py_file)?;
            let opts = JobOpts {
                priority,
                comment,
                scene: Some(py_file),
                ..JobOpts::default()
            };
            let job = farm.submit_py(py, &name, opts, !dry_run)?;
            match &job.jid {
                Some(jid) => println!("Submitted job {jid}"),
                None => println!("Wrote submission files to {}", job.info_file().display()),
            }
        }

        Command::SubmitCmd {
            name,
            cmds,
            priority,
            comment,
            dry_run,
        } => {
            let opts = JobOpts {
                priority,
                comment,
                ..JobOpts::default()
            };
            let mut job = Job::new(&farm, name, JobKind::Cmdline(CmdlineKind { cmds }), opts)?;
            let jid = farm.submit_job(&mut job, !dry_run)?;
            match jid {
                Some(jid) => println!("Submitted job {jid}"),
                None => println!("Wrote submission files to {}", job.info_file().display()),
            }
        }

        Command::Flush {
            max_age,
            count,
            force,
        } => {
            let max_age = max_age.unwrap_or_else(|| farm.config().flush_max_age.clone());
            let count = count.unwrap_or(farm.config().flush_count);
            let mut confirm = StdinConfirm;
            let flushed = farm.flush_old_submissions(&max_age, count, force, &mut confirm)?;
            println!("Flushed {flushed} submissions");
        }

        Command::Groups => {
            for group in farm.find_groups()? {
                println!("{group}");
            }
        }
    }

    Ok(())
}
