use crate::types::{ConnectionError, HEALTH_PATH, Result, TRANSPORT_PATH};
use url::Url;

/// Builds `{base}/ws` with the scheme mapped to `ws`/`wss`
pub fn transport_url(base: &str) -> Result<Url> {
    let mut url = Url::parse(base)?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(ConnectionError::Config(format!(
                "unsupported transport scheme '{}'",
                other
            )));
        }
    };
    set_scheme(&mut url, scheme)?;
    append_path(url, TRANSPORT_PATH)
}

/// Converts a transport base URL into its HTTP counterpart, dropping the query
pub fn ws_to_http_endpoint(base: &str) -> Result<Url> {
    let mut url = Url::parse(base)?;
    let scheme = match url.scheme() {
        "ws" | "http" => "http",
        "wss" | "https" => "https",
        other => {
            return Err(ConnectionError::Config(format!(
                "cannot derive an HTTP endpoint from scheme '{}'",
                other
            )));
        }
    };
    set_scheme(&mut url, scheme)?;
    url.set_query(None);
    Ok(url)
}

/// Builds `{http_base}/health`
pub fn health_url(http_base: &str) -> Result<Url> {
    let url = Url::parse(http_base)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConnectionError::Config(format!(
            "health endpoint must be http(s), got '{}'",
            url.scheme()
        )));
    }
    append_path(url, HEALTH_PATH)
}

fn set_scheme(url: &mut Url, scheme: &str) -> Result<()> {
    url.set_scheme(scheme)
        .map_err(|_| ConnectionError::Config(format!("cannot switch '{}' to {}", url, scheme)))
}

fn append_path(mut url: Url, segment: &str) -> Result<Url> {
    let display = url.to_string();
    url.path_segments_mut()
        .map_err(|_| ConnectionError::Config(format!("'{}' cannot be a base URL", display)))?
        .pop_if_empty()
        .push(segment);
    Ok(url)
}
