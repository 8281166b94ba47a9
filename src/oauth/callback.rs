//! Loopback listener for the authorization code redirect.
//!
//! The redirect URI configured for the auth code grant must point at a
//! loopback address with an explicit port, e.g. `http://127.0.0.1:7464/callback`.
//! One request is accepted, its `code`/`state`/`error` query parameters are
//! returned and a small HTML page tells the user to close the window.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::debug;
use url::Url;

use super::AuthError;

/// How long the user has to finish the browser step.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

const MAX_REQUEST_BYTES: usize = 16 * 1024;

const SUCCESS_PAGE: &str = "<html><body><h1>Authentication complete</h1><p>You can close this window and return to pingcli.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h1>Authentication failed</h1><p>You can close this window. Details are shown in the terminal.</p></body></html>";

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Where to listen and which request path to expect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    pub addr: SocketAddr,
    pub path: String,
}

/// Validate a redirect URI and resolve the local address to bind.
pub fn parse_redirect_uri(redirect_uri: &str) -> Result<RedirectTarget, AuthError> {
    let invalid = || AuthError::InvalidRedirectUri(redirect_uri.to_string());
    let url = Url::parse(redirect_uri).map_err(|_| invalid())?;
    if url.scheme() != "http" {
        return Err(invalid());
    }

    let ip = match url.host() {
        Some(url::Host::Domain("localhost")) => std::net::Ipv4Addr::LOCALHOST.into(),
        Some(url::Host::Ipv4(ip)) if ip.is_loopback() => ip.into(),
        Some(url::Host::Ipv6(ip)) if ip.is_loopback() => ip.into(),
        _ => return Err(invalid()),
    };
    let port = url.port().ok_or_else(invalid)?;

    Ok(RedirectTarget {
        addr: SocketAddr::new(ip, port),
        path: url.path().to_string(),
    })
}

/// Bind the listener before the browser is opened so the redirect cannot race it.
pub async fn bind(target: &RedirectTarget) -> Result<TcpListener, AuthError> {
    TcpListener::bind(target.addr)
        .await
        .map_err(|e| AuthError::Callback(format!("failed to listen on {}: {e}", target.addr)))
}

/// Accept one redirect and return its query parameters.
///
/// Requests for other paths (a browser asking for `/favicon.ico`) get a 404
/// and the listener keeps waiting. Fails with [`AuthError::FlowExpired`] once
/// `timeout` elapses.
pub async fn wait_for_callback(
    listener: &TcpListener,
    expected_path: &str,
    timeout: Duration,
) -> Result<CallbackParams, AuthError> {
    tokio::time::timeout(timeout, accept_callback(listener, expected_path))
        .await
        .map_err(|_| AuthError::FlowExpired)
}

/// Serve connections until one hits `expected_path`. Broken connections are skipped.
async fn accept_callback(listener: &TcpListener, expected_path: &str) -> CallbackParams {
    loop {
        let (mut stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                debug!(error = %e, "Failed to accept callback connection");
                continue;
            }
        };

        let mut buffer = vec![0u8; MAX_REQUEST_BYTES];
        let read = match stream.read(&mut buffer).await {
            Ok(0) => {
                debug!(%peer, "Callback connection closed without a request");
                continue;
            }
            Ok(read) => read,
            Err(e) => {
                debug!(%peer, error = %e, "Failed to read callback request");
                continue;
            }
        };
        let request = String::from_utf8_lossy(&buffer[..read]);
        let target = request
            .lines()
            .next()
            .and_then(|line| {
                let mut parts = line.split_whitespace();
                (parts.next() == Some("GET")).then(|| parts.next()).flatten()
            })
            .unwrap_or("");

        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        if path != expected_path {
            debug!(%peer, path, "Ignoring request to unexpected callback path");
            respond(&mut stream, "404 Not Found", "").await;
            continue;
        }

        let params = parse_query(query);
        let page = if params.error.is_some() || params.code.is_none() {
            FAILURE_PAGE
        } else {
            SUCCESS_PAGE
        };
        respond(&mut stream, "200 OK", page).await;
        return params;
    }
}

async fn respond(stream: &mut tokio::net::TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!(error = %e, "Failed to write callback response");
    }
}

/// Parse `code`, `state` and `error` out of a query string.
pub fn parse_query(query: &str) -> CallbackParams {
    let mut params = CallbackParams::default();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = value.replace('+', " ");
        let decoded = urlencoding::decode(&value)
            .map(|v| v.into_owned())
            .unwrap_or(value.clone());
        match key {
            "code" => params.code = Some(decoded),
            "state" => params.state = Some(decoded),
            "error" => params.error = Some(decoded),
            "error_description" => params.error_description = Some(decoded),
            _ => {}
        }
    }
    params
}
