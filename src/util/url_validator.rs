use thiserror::Error;
use url::Url;

/// Errors that can occur during URL validation.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// Plain HTTP to a non-local host.
    #[error("Insecure base URL: HTTPS required (except localhost for testing)")]
    InsecureBaseUrl,
}

/// Validates the base URL of a backend service (document store or object storage).
///
/// HTTPS is required, except for `localhost` / `127.0.0.1` which may use plain
/// HTTP for local development and tests. The session token is sent to this
/// host, so a plaintext remote endpoint is refused outright.
///
/// # Examples
///
/// ```
/// use reelfeed::util::validate_base_url;
///
/// assert!(validate_base_url("https://api.example.com/v1").is_ok());
/// assert!(validate_base_url("http://127.0.0.1:8080").is_ok());
/// assert!(validate_base_url("http://api.example.com").is_err());
/// ```
pub fn validate_base_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = parse_http_url(url_str)?;

    if url.scheme() == "http" {
        let is_localhost = matches!(url.host_str(), Some("localhost") | Some("127.0.0.1"));
        if !is_localhost {
            tracing::error!(base_url = %url, "Rejecting non-HTTPS base URL (HTTPS required except for localhost)");
            return Err(UrlValidationError::InsecureBaseUrl);
        }
        tracing::warn!(base_url = %url, "Using non-HTTPS base URL (localhost only)");
    }

    Ok(url)
}

/// Validates a media URL handed back by object storage.
///
/// Only `http`/`https` URLs with a host are accepted; anything else would be
/// embedded into a public content document.
pub fn validate_media_url(url_str: &str) -> Result<Url, UrlValidationError> {
    parse_http_url(url_str)
}

fn parse_http_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(UrlValidationError::MissingHost),
    }
}
