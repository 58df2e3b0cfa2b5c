//! URL construction helpers.

use reqwest::Url;

use crate::error::ConfigError;

/// Query parameter identifying the calling application.
pub const APP_PARAM: &str = "app";

/// Join `segments` onto `base` with exactly one `/` between parts, then
/// append form-encoded `query` pairs.
pub fn make_url<S: AsRef<str>>(
    base: &str,
    segments: &[S],
    query: &[(&str, &str)],
) -> Result<Url, ConfigError> {
    let mut joined = base.trim_end_matches('/').to_string();
    for segment in segments {
        let segment = segment.as_ref().trim_matches('/');
        if segment.is_empty() {
            continue;
        }
        joined.push('/');
        joined.push_str(segment);
    }

    let mut url = parse(&joined)?;
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}

/// Add `app=<app_id>` unless the URL already carries an `app` parameter.
pub fn with_app_identifier(mut url: Url, app_id: &str) -> Url {
    if !url.query_pairs().any(|(k, _)| k == APP_PARAM) {
        url.query_pairs_mut().append_pair(APP_PARAM, app_id);
    }
    url
}

pub(crate) fn parse(url: &str) -> Result<Url, ConfigError> {
    Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}
