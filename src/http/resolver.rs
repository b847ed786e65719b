use crate::trace::hooks::{ClientTrace, DnsDoneInfo, DnsStartInfo};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

/// Resolves `host` with the system resolver, reporting the lookup window to
/// `trace`.
///
/// Literal addresses are returned as-is and never reach the hooks.
pub async fn resolve(
    host: &str,
    port: u16,
    trace: &ClientTrace,
) -> Result<Vec<SocketAddr>, anyhow::Error> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        trace!("Skipping DNS for literal address {ip}");
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    debug!("Resolving DNS for: {}", host);
    trace.dns_start(&DnsStartInfo { host });

    let owned = host.to_string();
    let lookup = tokio::task::spawn_blocking(move || {
        (owned.as_str(), port)
            .to_socket_addrs()
            .map(|addrs| addrs.collect::<Vec<_>>())
    })
    .await?;

    match &lookup {
        Ok(addrs) => trace.dns_done(&DnsDoneInfo { addrs, err: None }),
        Err(err) => trace.dns_done(&DnsDoneInfo {
            addrs: &[],
            err: Some(err),
        }),
    }

    let addresses = lookup?;
    if addresses.is_empty() {
        error!("DNS resolution for {} returned no addresses.", host);
        return Err(anyhow!("No IP addresses found for host {}", host));
    }

    for (i, addr) in addresses.iter().enumerate() {
        if i == 0 {
            debug!("Resolved IP: {}", addr.ip());
        } else {
            debug!("Resolved IP (alternative): {}", addr.ip());
        }
    }

    Ok(addresses)
}
