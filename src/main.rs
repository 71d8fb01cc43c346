use std::process::ExitCode;

use structopt::StructOpt;
use tracing::{error, info};

use httpfs::cache::RangeCache;
use httpfs::cli::Options;
use httpfs::config::Config;
use httpfs::error::Error;
use httpfs::transport::exchange;
use httpfs::transport::header::Method;
use httpfs::transport::socket::Socket;
use httpfs::transport::tls::TlsContext;
use httpfs::url::UrlState;

#[tokio::main]
async fn main() -> ExitCode {
    // The process sets TZ=UTC at startup so Last-Modified conversions are
    // timezone-stable regardless of the host's local timezone (spec §6
    // "Environment").
    std::env::set_var("TZ", "UTC");

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run() -> Result<(), Error> {
    let options = Options::from_args();
    let config = Config::from_options(options)
        .map_err(|e| Error::InvalidArgument(e.to_string()))?;

    let master = UrlState::new(&config.url, "master", config.timeout_seconds, config.reset_retry_limit)?;
    info!(url = %master.master_raw(), "parsed mount URL");

    let extra_roots = match &config.ca_file {
        Some(path) => httpfs::transport::pem::read_certificates(path)
            .map_err(|e| Error::Permission(format!("reading CA file '{}': {}", path.display(), e)))?,
        None => Vec::new(),
    };
    let tls = TlsContext::new(config.allow_md5, config.allow_md2, extra_roots);

    let mut url = master.clone();
    let mut socket = Socket::new();
    exchange::exchange(&mut socket, &mut url, &tls, Method::Head, 0, 0).await?;
    socket.close(&mut url, false).await?;

    info!(
        file_size = ?url.file_size,
        last_modified = ?url.last_modified,
        "initial HEAD succeeded"
    );

    if config.cache_enabled() {
        if let Some(parent) = config.cache_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Permission(format!("creating cache directory: {}", e)))?;
        }
        let cache = RangeCache::open(&config.cache_path, config.cache_max_bytes)
            .map_err(|e| Error::Permission(format!("initializing cache: {}", e)))?;
        drop(cache);
        info!(path = %config.cache_path.display(), max_bytes = config.cache_max_bytes, "cache initialized");
    }

    println!(
        "httpfs: ready to serve '{}' ({} bytes) at mount point(s): {:?}",
        url.name,
        url.file_size.unwrap_or(0),
        std::env::args().skip(1).collect::<Vec<_>>()
    );

    Ok(())
}
