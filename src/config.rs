//! Runtime configuration, assembled from [`crate::cli::Options`] with
//! [`crate::defaults`] filling in anything left unset.

use std::path::PathBuf;

use crate::cli::Options;
use crate::defaults;

#[derive(Debug, Clone)]
pub struct Config {
    pub url: String,
    pub foreground: bool,
    pub console: Option<Option<PathBuf>>,
    pub ca_file: Option<PathBuf>,
    pub ssl_log_level: u32,
    pub allow_md5: bool,
    pub allow_md2: bool,
    pub timeout_seconds: u64,
    pub reset_retry_limit: u32,
    pub cache_path: PathBuf,
    pub cache_max_bytes: u64,
}

impl Config {
    pub fn from_options(opts: Options) -> Result<Self, anyhow::Error> {
        Ok(Config {
            url: opts.url,
            foreground: opts.foreground,
            console: opts.console,
            ca_file: opts.ca_file,
            ssl_log_level: opts.ssl_log_level,
            allow_md5: opts.allow_md5,
            allow_md2: opts.allow_md2,
            timeout_seconds: opts.timeout_seconds.unwrap_or_else(|| defaults::timeout().as_secs()),
            reset_retry_limit: opts.reset_retry_limit.unwrap_or_else(defaults::reset_retry_limit),
            cache_path: match opts.cache_path {
                Some(path) => path,
                None => defaults::cache_path()?,
            },
            cache_max_bytes: opts.cache_max_bytes.unwrap_or_else(defaults::cache_max_bytes),
        })
    }

    /// The cache is disabled entirely when the configured size is zero.
    pub fn cache_enabled(&self) -> bool {
        self.cache_max_bytes > 0
    }
}
