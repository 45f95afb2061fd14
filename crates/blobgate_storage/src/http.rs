//! HTTP helpers shared by the remote API backends.

use blobgate_error::{StorageError, StorageErrorKind};

/// Map a transport error onto the storage taxonomy.
pub(crate) fn map_reqwest_error(err: reqwest::Error, path: &str) -> StorageError {
    let context = format!("{}: {}", path, err);
    let kind = if err.is_timeout() {
        StorageErrorKind::Timeout(context)
    } else if err.is_connect() || err.is_request() {
        StorageErrorKind::Connection(context)
    } else if let Some(status) = err.status() {
        StorageErrorKind::from_status(status.as_u16(), context)
    } else if err.is_decode() {
        StorageErrorKind::Unknown(format!("{}: malformed response: {}", path, err))
    } else {
        StorageErrorKind::Connection(context)
    };
    StorageError::new(kind)
}

/// Fail on non-success statuses, keeping the response body as context.
pub(crate) async fn check_status(
    response: reqwest::Response,
    path: &str,
) -> Result<reqwest::Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        path.to_string()
    } else {
        format!("{}: {}", path, body)
    };
    Err(StorageError::new(StorageErrorKind::from_status(
        status.as_u16(),
        message,
    )))
}

/// Map an application-level error code carried in a JSON envelope.
pub(crate) fn envelope_error(code: i64, message: &str, path: &str) -> StorageError {
    let context = format!("{}: {}", path, message);
    let kind = match u16::try_from(code) {
        Ok(status) if (400..600).contains(&status) => StorageErrorKind::from_status(status, context),
        _ => StorageErrorKind::Unknown(format!("code {}: {}", code, context)),
    };
    StorageError::new(kind)
}

/// Append a route and a normalized object path to a base URL.
///
/// Each segment is percent-encoded.
pub(crate) fn build_url(base: &url::Url, route: &str, path: &str) -> url::Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty();
        segments.extend(route.split('/').filter(|s| !s.is_empty()));
        segments.extend(path.split('/').filter(|s| !s.is_empty()));
    }
    url
}

/// Parse a configured base URL.
pub(crate) fn parse_base_url(raw: &str) -> Result<url::Url, StorageError> {
    let url = url::Url::parse(raw).map_err(|e| {
        StorageError::new(StorageErrorKind::Config(format!("invalid URL {:?}: {}", raw, e)))
    })?;
    if url.cannot_be_a_base() {
        return Err(StorageError::new(StorageErrorKind::Config(format!(
            "URL {:?} cannot be used as a base",
            raw
        ))));
    }
    Ok(url)
}
