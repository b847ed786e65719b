use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about)]
pub struct Cli {
    /// The request url,like http://www.google.com
    pub url: String,
    ///  Specify request method to use
    #[arg(short = 'X', long = "request", value_name = "method")]
    pub method_option: Option<String>,
    /// HTTP POST data.
    #[arg(short = 'd', long = "data", value_name = "data")]
    pub body_option: Option<String>,
    /// The http headers.
    #[arg(short = 'H', long = "header", value_name = "header")]
    pub headers: Vec<String>,
    ///  Send User-Agent <name> to server
    #[arg(short = 'A', long = "user-agent", value_name = "name")]
    pub user_agent_option: Option<String>,
    /// The Cookie option.
    #[arg(short = 'b', long = "cookie", value_name = "data")]
    pub cookie_option: Option<String>,
    ///  Referrer URL
    #[arg(short = 'e', long = "referer", value_name = "URL")]
    pub refer_option: Option<String>,
    /// Retrieve only the bytes within RANGE
    #[arg(short = 'r', long = "range", value_name = "range")]
    pub range_option: Option<String>,
    /// Send a HEAD request
    #[arg(long = "head", short = 'I')]
    pub header_option: bool,
    /// The pem path.
    #[arg(short = 'c', long = "cacert", value_name = "file")]
    pub certificate_path_option: Option<PathBuf>,
    /// Allow insecure server connections
    #[arg(short = 'k', long = "insecure")]
    pub skip_certificate_validate: bool,
    ///  Write the body to file instead of discarding it.
    #[arg(long = "output", short = 'o', value_name = "file")]
    pub file_path_option: Option<String>,
    /// Follow redirects, tracing every hop separately
    #[arg(short = 'L', long = "location")]
    pub follow_redirects: bool,
    /// Send the request this many times in a row over one client
    #[arg(short = 'n', long = "repeat", value_name = "count", default_value_t = 1)]
    pub repeat: u32,
    /// Maximum time allowed for connecting and receiving the response head
    #[arg(
        short = 'm',
        long = "max-time",
        value_name = "seconds",
        default_value = "30",
        value_parser = parse_seconds
    )]
    pub max_time: Duration,
    /// Maximum time allowed for each TCP connect
    #[arg(
        long = "connect-timeout",
        value_name = "seconds",
        default_value = "10",
        value_parser = parse_seconds
    )]
    pub connect_timeout: Duration,
    /// Print timing results as JSON lines
    #[arg(long = "json")]
    pub json: bool,
    ///  Make the operation more talkative
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbosity: u8,
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|e| format!("invalid number of seconds '{value}': {e}"))?;
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| format!("invalid number of seconds '{value}': {e}"))
}
