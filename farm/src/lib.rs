pub mod config;
pub mod job;
pub mod maya;
pub mod pycheck;
pub mod submit;
pub mod wrap;
pub mod writer;

pub use config::{ConfigError, FarmConfig};
pub use job::{CmdlineKind, Dependency, Job, JobKind, JobOpts, PyKind};
pub use maya::{CacheTask, DccScene, MayaPyKind, MayaRenderKind, RenderLayer};
pub use submit::{Farm, SubmitError};
