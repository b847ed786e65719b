use crate::cli::app_config::Cli;
use crate::http::handler::http_request_with_trace;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

pub async fn main_with_error() -> Result<(), anyhow::Error> {
    let cli: Cli = Cli::parse();

    do_request(cli).await
}

async fn do_request(cli: Cli) -> Result<(), anyhow::Error> {
    init_logging(cli.verbosity)?;

    let uri: hyper::Uri = cli.url.parse()?;
    match uri.scheme_str() {
        Some("http") | Some("https") => http_request_with_trace(&cli).await,
        Some(_) | None => Err(anyhow!("Can not find scheme in the uri:{}.", uri)),
    }
}

fn init_logging(verbosity: u8) -> Result<(), anyhow::Error> {
    let log_level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy()
        .add_directive("hyper=off".parse()?)
        .add_directive("rustls=off".parse()?);
    // try_init also routes `log` records (rustls) through the filter below
    let _ = tracing_subscriber::fmt()
        .without_time()
        .with_level(false)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rustls_log_records_are_filtered_out() {
        init_logging(0).unwrap();

        assert!(!log::log_enabled!(target: "rustls::client", log::Level::Error));
        assert!(log::log_enabled!(target: "rtrace", log::Level::Info));
        // a second call keeps the first subscriber instead of failing
        init_logging(2).unwrap();
    }
}
