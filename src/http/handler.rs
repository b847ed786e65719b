use crate::cli::app_config::Cli;
use crate::http::client::{ClientOptions, TracingClient};
use crate::trace::body::TracedBody;
use crate::trace::ledger::Trace;
use crate::trace::request::do_request_with_trace;
use anyhow::Context;
use bytes::Bytes;
use futures::StreamExt;
use http::header::{
    HeaderName, HeaderValue, ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION, RANGE,
    REFERER, USER_AGENT,
};
use http_body_util::{BodyExt, BodyStream, Full};
use hyper::body::{Body, Incoming};
use hyper::{Request, Response, Uri};
use indicatif::{ProgressBar, ProgressStyle};
use std::cmp::min;
use std::fs::OpenOptions;
use std::io::Write as WriteStd;
use std::str::FromStr;
use std::sync::Arc;
use url::Url;

const MAX_REDIRECTS: u8 = 10;

/// Runs the configured number of traced attempts over one client and prints
/// a timing line for each.
pub async fn http_request_with_trace(cli: &Cli) -> Result<(), anyhow::Error> {
    let client = TracingClient::new(ClientOptions::from(cli))?;
    for attempt in 0..cli.repeat {
        if cli.repeat > 1 {
            debug!("Attempt {}/{}", attempt + 1, cli.repeat);
        }
        request_with_redirects(cli, &client).await?;
    }
    Ok(())
}

/// Performs one traced attempt per hop, following redirects when `-L` is set,
/// and returns the ledger of every hop in order.
pub async fn request_with_redirects(
    cli: &Cli,
    client: &TracingClient,
) -> Result<Vec<Arc<Trace>>, anyhow::Error> {
    let mut current_url: Url = cli.url.parse().context("Failed to parse initial URL")?;
    let mut hops = Vec::new();

    for i in 0..MAX_REDIRECTS {
        let uri: Uri = current_url.to_string().parse()?;
        let request = build_request(cli, &uri)?;

        let (trace, outcome) = do_request_with_trace(client, request).await;
        let res = match outcome {
            Ok(res) => res,
            Err(e) => {
                report(cli, &trace)?;
                return Err(e);
            }
        };
        log_response_head(cli, &res)?;

        if cli.follow_redirects && res.status().is_redirection() {
            let location = res
                .headers()
                .get(LOCATION)
                .map(|value| value.to_str().map(str::to_string))
                .transpose()?
                .ok_or(anyhow!("Redirect response missing 'location' header"))?;
            drain_body(res.into_body()).await?;
            report(cli, &trace)?;
            hops.push(trace);

            current_url = current_url.join(&location)?;
            debug!(
                "Redirecting to: {current_url} ({}/{MAX_REDIRECTS})",
                i + 1
            );
            continue;
        }

        handle_response(cli, res).await?;
        report(cli, &trace)?;
        hops.push(trace);
        return Ok(hops);
    }

    Err(anyhow!(
        "Exceeded maximum number of redirects ({MAX_REDIRECTS})"
    ))
}

fn report(cli: &Cli, trace: &Trace) -> Result<(), anyhow::Error> {
    let result = trace.result();
    if cli.json {
        println!("{}", serde_json::to_string(&result)?);
    } else {
        println!("{result}");
    }
    Ok(())
}

fn build_request(cli: &Cli, uri: &Uri) -> Result<Request<Full<Bytes>>, anyhow::Error> {
    let mut method = String::from("GET");
    let mut content_type_option = None;

    if cli.body_option.is_some() {
        method = String::from("POST");
        content_type_option = Some(String::from("application/x-www-form-urlencoded"));
    }
    if let Some(method_userdefined) = cli.method_option.as_ref() {
        method = method_userdefined.clone();
    }
    if cli.header_option {
        method = String::from("HEAD");
    }

    let mut request_builder = Request::builder().method(method.as_str()).uri(uri.clone());

    let mut header_map = http::HeaderMap::new();
    if let Some(content_type) = content_type_option {
        header_map.insert(CONTENT_TYPE, HeaderValue::from_str(&content_type)?);
    }
    header_map.insert(ACCEPT, HeaderValue::from_str("*/*")?);
    let user_agent = cli
        .user_agent_option
        .as_deref()
        .unwrap_or(concat!("rtrace/", env!("CARGO_PKG_VERSION")));
    header_map.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);
    if let Some(cookie) = cli.cookie_option.as_ref() {
        header_map.insert(COOKIE, HeaderValue::from_str(cookie)?);
    }
    if let Some(referer) = cli.refer_option.as_ref() {
        header_map.insert(REFERER, HeaderValue::from_str(referer)?);
    }
    if let Some(range) = cli.range_option.as_ref() {
        header_map.insert(RANGE, HeaderValue::from_str(&format!("bytes={range}"))?);
    }

    for x in &cli.headers {
        let split: Vec<&str> = x.splitn(2, ':').collect();
        if split.len() == 2 {
            header_map.insert(
                HeaderName::from_str(split[0])?,
                HeaderValue::from_str(split[1].trim_start())?,
            );
        } else {
            return Err(anyhow!("header error: '{}'", x));
        }
    }

    for (key, val) in header_map {
        request_builder = request_builder.header(key.ok_or(anyhow!("Key is null"))?, val);
    }

    let body_bytes = cli
        .body_option
        .as_ref()
        .map_or(Bytes::new(), |body| Bytes::from(body.clone()));
    let request = request_builder.body(Full::new(body_bytes))?;

    if cli.verbosity >= 1 {
        debug!(
            "> {} {} {:?}",
            request.method(),
            request.uri().path(),
            request.version()
        );
        for (key, value) in request.headers().iter() {
            debug!("> {}: {}", key, value.to_str()?);
        }
        debug!(
            "> Content-Length: {}",
            request.body().size_hint().exact().unwrap_or(0)
        );
        debug!(">");
    }

    Ok(request)
}

fn log_response_head<B>(cli: &Cli, res: &Response<B>) -> Result<(), anyhow::Error> {
    if cli.verbosity >= 1 {
        debug!("< {:?} {}", res.version(), res.status());
        for (key, value) in res.headers().iter() {
            debug!("< {}: {}", key, value.to_str()?);
        }
        debug!("<");
    }
    Ok(())
}

/// Reads the body to the end without keeping it, returning the byte count.
async fn drain_body(mut body: TracedBody<Incoming>) -> Result<u64, anyhow::Error> {
    let mut received = 0u64;
    while let Some(frame) = body.frame().await {
        let frame = frame.context("Error while reading response body")?;
        if let Ok(data) = frame.into_data() {
            received += data.len() as u64;
        }
    }
    Ok(received)
}

async fn download_file_with_progress(
    file_path: &str,
    total_size: u64,
    mut body_stream: BodyStream<TracedBody<Incoming>>,
) -> Result<(), anyhow::Error> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(file_path)
        .context(format!("Failed to open or create file: {}", file_path))?;

    let pb = ProgressBar::new(total_size);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        )?
        .progress_chars("#>-"),
    );

    let mut downloaded = 0;
    while let Some(chunk_result) = body_stream.next().await {
        let frame = chunk_result.context("Error while downloading file stream")?;
        let Ok(bytes) = frame.into_data() else {
            continue;
        };

        file.write_all(&bytes)
            .context("Error writing chunk to file")?;
        let new = min(downloaded + bytes.len() as u64, total_size);
        downloaded = new;
        pb.set_position(new);
    }

    pb.finish_with_message("Download complete");
    Ok(())
}

/// Consumes the response body, which is what completes the trace.
pub async fn handle_response(
    cli: &Cli,
    res: Response<TracedBody<Incoming>>,
) -> Result<(), anyhow::Error> {
    let (parts, body) = res.into_parts();

    if let Some(file_path) = cli.file_path_option.as_ref() {
        let content_length = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        download_file_with_progress(file_path, content_length, BodyStream::new(body)).await
    } else {
        let received = drain_body(body).await?;
        debug!("* Discarded {received} bytes of response body");
        Ok(())
    }
}
