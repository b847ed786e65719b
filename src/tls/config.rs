use crate::tls::cert_verifier::TracingCertVerifier;
use anyhow::Context;
use rustls::crypto::ring::{default_provider, DEFAULT_CIPHER_SUITES};
use rustls::{ClientConfig, RootCertStore};
use std::path::Path;
use std::sync::Arc;

/// Builds the client TLS configuration shared by every connection of a
/// [`TracingClient`](crate::http::client::TracingClient).
///
/// Roots come from `ca_file` (PEM) when given, the bundled webpki roots
/// otherwise. Only HTTP/1.1 is offered over ALPN.
pub fn build_tls_config(
    ca_file: Option<&Path>,
    insecure: bool,
    verbosity: u8,
) -> Result<Arc<ClientConfig>, anyhow::Error> {
    let mut root_store = RootCertStore::empty();
    if let Some(file_path) = ca_file {
        let f = std::fs::File::open(file_path)
            .with_context(|| format!("Failed to open CA file: {}", file_path.display()))?;
        let mut rd = std::io::BufReader::new(f);
        for cert in rustls_pemfile::certs(&mut rd) {
            root_store.add(cert?)?;
        }
    } else {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    };

    let provider = Arc::new(rustls::crypto::CryptoProvider {
        cipher_suites: DEFAULT_CIPHER_SUITES.to_vec(),
        ..default_provider()
    });

    let verifier = TracingCertVerifier::new(verbosity, insecure, provider.clone(), &root_store)?;

    let mut tls_config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(rustls::DEFAULT_VERSIONS)?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    tls_config
        .dangerous()
        .set_certificate_verifier(Arc::new(verifier));
    tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(tls_config))
}
