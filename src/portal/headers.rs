use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT,
};

use crate::error::{Error, Result};
use crate::models::EnvironmentType;

const ACCEPT_LANGUAGE_VALUE: &str = "en-US,en;q=0.9";

/// Build browser-like request headers for a session
///
/// The header set follows the browser family of `environment`, with
/// `identity` sent as the User-Agent. Accept-Encoding is left to reqwest so
/// that response decompression stays automatic.
///
/// # Examples
///
/// ```
/// use portalwatch::models::EnvironmentType;
/// use portalwatch::portal::headers::build_browser_headers;
///
/// let headers = build_browser_headers(
///     EnvironmentType::Firefox,
///     "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
///     Some("https://portal.example.com/login"),
/// )
/// .unwrap();
/// assert!(headers.contains_key("referer"));
/// ```
pub fn build_browser_headers(
    environment: EnvironmentType,
    identity: &str,
    referer: Option<&str>,
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    headers.insert(USER_AGENT, header_value(identity, "identity")?);
    if let Some(referer) = referer {
        headers.insert(REFERER, header_value(referer, "referer")?);
    }
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static(ACCEPT_LANGUAGE_VALUE),
    );
    headers.insert(
        HeaderName::from_static("upgrade-insecure-requests"),
        HeaderValue::from_static("1"),
    );

    match environment {
        EnvironmentType::Chromium => {
            headers.insert(
                ACCEPT,
                HeaderValue::from_static(
                    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
                ),
            );
            headers.insert(
                HeaderName::from_static("sec-ch-ua-mobile"),
                HeaderValue::from_static("?0"),
            );
            insert_fetch_metadata(&mut headers);
        }
        EnvironmentType::Firefox => {
            headers.insert(
                ACCEPT,
                HeaderValue::from_static(
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                ),
            );
            headers.insert(
                HeaderName::from_static("dnt"),
                HeaderValue::from_static("1"),
            );
            insert_fetch_metadata(&mut headers);
        }
        // Safari sends no client hints and no Sec-Fetch-User
        EnvironmentType::Webkit => {
            headers.insert(
                ACCEPT,
                HeaderValue::from_static(
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                ),
            );
        }
    }

    Ok(headers)
}

fn insert_fetch_metadata(headers: &mut HeaderMap) {
    headers.insert(
        HeaderName::from_static("sec-fetch-dest"),
        HeaderValue::from_static("document"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-mode"),
        HeaderValue::from_static("navigate"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-site"),
        HeaderValue::from_static("same-origin"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-user"),
        HeaderValue::from_static("?1"),
    );
}

fn header_value(value: &str, what: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::browser(format!("{what} is not a valid header value: {e}")))
}
