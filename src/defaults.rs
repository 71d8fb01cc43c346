//! Default values for flags the CLI leaves unset (spec §6).

use directories::ProjectDirs;
use std::path::PathBuf;
use std::time::Duration;

const ORGANIZATION: &str = "";
const QUALIFIER: &str = "";
const APPLICATION: &str = "httpfs";

fn project_dirs() -> Result<ProjectDirs, anyhow::Error> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
        .ok_or_else(|| anyhow::anyhow!("could not determine the user's home directory"))
}

/// Default cache data-file path: `<data dir>/cache`. The index file lives
/// alongside it at the same path with `.idx` appended (spec §6 `-C`).
pub fn cache_path() -> Result<PathBuf, anyhow::Error> {
    Ok(project_dirs()?.data_dir().join("cache"))
}

/// Default cache byte cap (spec §6 `-S`): 256 MiB.
pub const fn cache_max_bytes() -> u64 {
    256 * 1024 * 1024
}

/// Default socket receive timeout (spec §6 `-t`).
pub const fn timeout() -> Duration {
    Duration::from_secs(30)
}

/// Default reset-retry cap (spec §6 `-r`).
pub const fn reset_retry_limit() -> u32 {
    3
}

/// Default SSL debug verbosity (spec §6 `-d`): silent.
pub const fn ssl_log_level() -> u32 {
    0
}
