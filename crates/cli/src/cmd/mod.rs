mod build;
mod clean;
mod compdb;
mod order;

use mei_lib::config::BuildConfig;

use crate::DirArgs;

pub use build::{BuildOptions, cmd_build};
pub use clean::cmd_clean;
pub use compdb::cmd_compdb;
pub use order::cmd_order;

/// Environment configuration with command-line overrides applied.
fn build_config(dirs: &DirArgs, jobs: Option<usize>) -> BuildConfig {
  let mut config = BuildConfig::from_env();
  if let Some(dir) = &dirs.build_dir {
    config = config.with_build_dir(dir);
  }
  if let Some(jobs) = jobs {
    config = config.with_jobs(jobs);
  }
  config
}
