//! Command-line surface (spec §6 "Command-line surface").

use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "httpfs",
    about = "Present a remote HTTP(S) resource as a read-only range-fetching file."
)]
pub struct Options {
    /// Route stdio to a tty instead of the default console device.
    #[structopt(short = "c", long = "console")]
    pub console: Option<Option<PathBuf>>,

    /// Stay in the foreground instead of forking to the background.
    #[structopt(short = "f")]
    pub foreground: bool,

    /// Trust an additional CA certificate file, beyond the bundled roots.
    #[structopt(short = "a", long = "ca-file")]
    pub ca_file: Option<PathBuf>,

    /// TLS debug verbosity.
    #[structopt(short = "d", long = "ssl-log-level", default_value = "0")]
    pub ssl_log_level: u32,

    /// Permit RSA-MD5 certificate signatures (disabled by default).
    #[structopt(short = "5")]
    pub allow_md5: bool,

    /// Permit RSA-MD2 certificate signatures (disabled by default).
    #[structopt(short = "2")]
    pub allow_md2: bool,

    /// Socket receive timeout, in seconds.
    #[structopt(short = "t", long = "timeout")]
    pub timeout_seconds: Option<u64>,

    /// Maximum number of `ECONNRESET` retries before giving up.
    #[structopt(short = "r", long = "reset-retries")]
    pub reset_retry_limit: Option<u32>,

    /// Cache data-file path (the index file is this path plus `.idx`).
    #[structopt(short = "C", long = "cache-path")]
    pub cache_path: Option<PathBuf>,

    /// Cache size cap, in bytes. `0` disables the cache.
    #[structopt(short = "S", long = "cache-size")]
    pub cache_max_bytes: Option<u64>,

    /// The remote resource to present as a file.
    pub url: String,

    /// Arguments forwarded to the mount point (consumed by the
    /// kernel-facing adapter, not interpreted here).
    pub mount_arguments: Vec<String>,
}
