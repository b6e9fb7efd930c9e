mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mei_lib::consts::DEFAULT_SCRIPT;

use crate::output::OutputFormat;

/// mei - parallel, incremental builds for native C and C++ targets
#[derive(Parser)]
#[command(name = "mei")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging (overridden by RUST_LOG)
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

/// Options shared by commands that touch the build directory.
#[derive(Args, Debug, Clone, Default)]
pub struct DirArgs {
  /// Output directory for objects and artifacts (default: $MEI_BUILD_DIR or ./build)
  #[arg(long, value_name = "DIR")]
  pub build_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
  /// Build every target declared by a build script
  Build {
    /// Path to the build script
    #[arg(default_value = DEFAULT_SCRIPT)]
    script: PathBuf,

    #[command(flatten)]
    dirs: DirArgs,

    /// Maximum number of concurrent tool invocations (default: $MEI_JOBS or CPU count)
    #[arg(short, long, value_name = "N")]
    jobs: Option<usize>,

    /// Compiler driver (default: $CXX or c++)
    #[arg(long, value_name = "PROGRAM")]
    cxx: Option<String>,

    /// Static library archiver (default: $AR or ar)
    #[arg(long, value_name = "PROGRAM")]
    ar: Option<String>,

    /// Print the build report as JSON
    #[arg(long)]
    json: bool,
  },

  /// Print targets in build order
  Order {
    /// Path to the build script
    #[arg(default_value = DEFAULT_SCRIPT)]
    script: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Write compile_commands.json into the build directory
  Compdb {
    /// Path to the build script
    #[arg(default_value = DEFAULT_SCRIPT)]
    script: PathBuf,

    #[command(flatten)]
    dirs: DirArgs,
  },

  /// Remove the build directory
  Clean {
    #[command(flatten)]
    dirs: DirArgs,
  },
}

fn main() -> Result<ExitCode> {
  let cli = Cli::parse();

  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "warn" }));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Build {
      script,
      dirs,
      jobs,
      cxx,
      ar,
      json,
    } => {
      let options = cmd::BuildOptions { dirs, jobs, cxx, ar };
      let output = if json { OutputFormat::Json } else { OutputFormat::Text };
      cmd::cmd_build(&script, &options, output)
    }
    Commands::Order { script, output } => cmd::cmd_order(&script, output).map(|()| ExitCode::SUCCESS),
    Commands::Compdb { script, dirs } => cmd::cmd_compdb(&script, &dirs).map(|()| ExitCode::SUCCESS),
    Commands::Clean { dirs } => cmd::cmd_clean(&dirs).map(|()| ExitCode::SUCCESS),
  }
}
