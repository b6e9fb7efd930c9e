/// Length of the truncated hex digest used for flag signatures.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Default build script evaluated by the CLI.
pub const DEFAULT_SCRIPT: &str = "mei.lua";

/// Default output directory, relative to the working directory.
pub const DEFAULT_BUILD_DIR: &str = "build";

/// Name of the fingerprint cache file inside the build directory.
pub const CACHE_FILENAME: &str = ".mei-cache.json";

/// Format version of the persisted fingerprint cache.
pub const CACHE_VERSION: u32 = 2;

/// Source file extensions treated as compilation units.
pub const SOURCE_EXTENSIONS: &[&str] = &["c", "cc", "cpp", "cxx", "c++", "m", "mm"];

pub const ENV_BUILD_DIR: &str = "MEI_BUILD_DIR";
pub const ENV_JOBS: &str = "MEI_JOBS";
