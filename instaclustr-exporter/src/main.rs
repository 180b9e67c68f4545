use std::env;
use std::net::{SocketAddr, ToSocketAddrs};
use std::num::NonZeroUsize;
use std::process::ExitCode;
use std::time::Duration;

use getopts::{Matches, Options};
use instaclustr_exporter::{shutdown_on_signal, BuildError, ExporterBuilder, InstaclustrConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

fn opts() -> Options {
    let mut opts = Options::new();

    opts.optopt("", "web.listen-address", "address to listen on for HTTP requests", "[HOST]:PORT");
    opts.optopt("", "web.telemetry-path", "path under which to expose metrics", "PATH");
    opts.optopt("", "web.read-timeout", "seconds a client may take to send headers", "SECONDS");
    opts.optopt("", "instaclustr.url", "base URL of the Instaclustr APIs", "URL");
    opts.optopt("", "instaclustr.user", "Instaclustr account user name", "USER");
    opts.optopt("", "instaclustr.provisioning-apikey", "provisioning API key", "KEY");
    opts.optopt("", "instaclustr.monitoring-apikey", "monitoring API key", "KEY");
    opts.optopt("", "instaclustr.scrape-timeout", "seconds a scrape may take", "SECONDS");
    opts.optopt(
        "",
        "instaclustr.max-concurrent-requests",
        "maximum number of upstream requests in flight",
        "INTEGER",
    );
    opts.optflag("", "version", "print version information");
    opts.optflag("h", "help", "print this help menu");

    opts
}

/// Reads an option, falling back to an environment variable.
fn opt_or_env(matches: &Matches, name: &str, var: &str) -> String {
    matches.opt_str(name).or_else(|| env::var(var).ok()).unwrap_or_default()
}

fn parse_listen_address(value: &str) -> Result<SocketAddr, BuildError> {
    let value =
        if value.starts_with(':') { format!("0.0.0.0{}", value) } else { value.to_string() };
    value
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or(BuildError::InvalidListenAddress(value))
}

fn parse_seconds(matches: &Matches, name: &str) -> Result<Option<Duration>, String> {
    matches
        .opt_str(name)
        .map(|s| {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| format!("invalid value `{}` for --{}: {}", s, name, e))
        })
        .transpose()
}

fn builder_from(matches: &Matches) -> Result<ExporterBuilder, String> {
    let config = InstaclustrConfig {
        url: opt_or_env(matches, "instaclustr.url", "INSTACLUSTR_URL"),
        user: opt_or_env(matches, "instaclustr.user", "INSTACLUSTR_USER"),
        provisioning_api_key: opt_or_env(
            matches,
            "instaclustr.provisioning-apikey",
            "INSTACLUSTR_PROVISIONING_APIKEY",
        ),
        monitoring_api_key: opt_or_env(
            matches,
            "instaclustr.monitoring-apikey",
            "INSTACLUSTR_MONITORING_APIKEY",
        ),
    };

    let listen_address =
        matches.opt_str("web.listen-address").unwrap_or_else(|| ":9999".to_owned());
    let listen_address = parse_listen_address(&listen_address).map_err(|e| e.to_string())?;
    let mut builder = ExporterBuilder::new(config).with_http_listener(listen_address);

    if let Some(path) = matches.opt_str("web.telemetry-path") {
        builder = builder.with_telemetry_path(path).map_err(|e| e.to_string())?;
    }
    if let Some(timeout) = parse_seconds(matches, "web.read-timeout")? {
        builder = builder.with_read_timeout(timeout);
    }
    if let Some(timeout) = parse_seconds(matches, "instaclustr.scrape-timeout")? {
        builder = builder.with_scrape_timeout(timeout);
    }
    if let Some(limit) = matches.opt_str("instaclustr.max-concurrent-requests") {
        let limit = limit.parse::<NonZeroUsize>().map_err(|e| {
            format!("invalid value `{}` for --instaclustr.max-concurrent-requests: {}", limit, e)
        })?;
        builder = builder.with_max_concurrent_requests(limit);
    }

    Ok(builder)
}

fn run(builder: ExporterBuilder) -> Result<(), String> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()).to_string())?;

    runtime.block_on(async move {
        let (exporter, shutdown) = builder.build().map_err(|e| e.to_string())?;
        tokio::spawn(shutdown_on_signal(shutdown));
        exporter.await.map_err(|e| e.to_string())
    })
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or(env!("CARGO_PKG_NAME"));
    let opts = opts();

    let matches = match opts.parse(&args[1.min(args.len())..]) {
        Ok(m) => m,
        Err(f) => {
            error!("Failed to parse command line args: {}", f);
            return ExitCode::FAILURE;
        }
    };

    if matches.opt_present("help") {
        print_usage(program, &opts);
        return ExitCode::SUCCESS;
    }
    if matches.opt_present("version") {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let builder = match builder_from(&matches) {
        Ok(builder) => builder,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), "Starting InstaClustr exporter");
    match run(builder) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{builder_from, opts, parse_listen_address};

    #[test]
    fn test_parse_listen_address() {
        let addr = parse_listen_address(":9999").unwrap();
        assert!(addr.ip().is_unspecified());
        assert_eq!(addr.port(), 9999);

        let addr = parse_listen_address("127.0.0.1:8080").unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:8080");

        assert!(parse_listen_address("not an address").is_err());
    }

    #[test]
    fn test_invalid_flags_are_rejected() {
        let matches = opts().parse(["--web.telemetry-path", "metrics"]).unwrap();
        assert!(builder_from(&matches).err().unwrap().contains("invalid telemetry path"));

        let matches = opts().parse(["--instaclustr.max-concurrent-requests", "0"]).unwrap();
        assert!(builder_from(&matches).is_err());

        let matches = opts().parse(["--web.read-timeout", "ten"]).unwrap();
        assert!(builder_from(&matches).err().unwrap().contains("--web.read-timeout"));
    }
}
