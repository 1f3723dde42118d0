// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;

use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use reqwest::{Client, StatusCode, Url, cookie::Jar, header};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    client::apply_headers,
    config::{COOKIE_KEY, Credentials, Headers},
    error::{
        DownloadError, InvalidUrlSnafu, MaxRedirectsSnafu, MissingLocationSnafu, NetworkSnafu,
        Result, UnexpectedStatusSnafu,
    },
    session::Session,
};

pub const MAX_REDIRECTS: usize = 10;

static RE_CONTENT_DISPOSITION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"filename[^;\n=]*=(['"](.*?)['"]|[^;\n]*)"#).expect("static regex"));

/// Follows redirects from a user supplied URL and produces the [`Session`]
/// describing the final resource.
pub struct Resolver {
    pub client:      Client,
    pub jar:         Arc<Jar>,
    pub headers:     Headers,
    pub credentials: Option<Credentials>,
    pub cancel:      CancellationToken,
}

impl Resolver {
    /// Resolve `user_url` to a session skeleton.
    ///
    /// Redirects are followed by hand, at most [`MAX_REDIRECTS`] hops. The
    /// output name is taken from `output_override`, else from
    /// `Content-Disposition`, else from the final URL's last path segment.
    pub async fn follow(&self, user_url: &str, output_override: Option<&str>) -> Result<Session> {
        self.follow_inner(user_url, output_override)
            .await
            .map_err(|e| e.annotate("follow"))
    }

    async fn follow_inner(
        &self,
        user_url: &str,
        output_override: Option<&str>,
    ) -> Result<Session> {
        self.seed_cookies(user_url);

        let mut location = Url::parse(user_url).context(InvalidUrlSnafu { url: user_url })?;
        for _ in 0..MAX_REDIRECTS {
            debug!("GET: {location}");
            let request = apply_headers(
                self.client.get(location.clone()),
                &self.headers,
                self.credentials.as_ref(),
            );
            let response = tokio::select! {
                () = self.cancel.cancelled() => return Err(DownloadError::Canceled),
                response = request.send() => response.context(NetworkSnafu)?,
            };
            let status = response.status();
            debug!("HTTP response: {status}");

            if status.is_redirection() {
                let next = response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                let Some(next) = next else {
                    return MissingLocationSnafu.fail();
                };
                location = location
                    .join(&next)
                    .context(InvalidUrlSnafu { url: next })?;
                continue;
            }

            if status != StatusCode::OK {
                return UnexpectedStatusSnafu {
                    status: status.as_u16(),
                }
                .fail();
            }

            let header_str = |name: header::HeaderName| {
                response
                    .headers()
                    .get(&name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_owned()
            };
            let content_length = response
                .headers()
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(-1);

            let suggested_file_name = match output_override {
                Some(name) => name.to_owned(),
                None => {
                    parse_content_disposition(&header_str(header::CONTENT_DISPOSITION))
                        .unwrap_or_else(|| file_name_from_url(&location))
                }
            };

            return Ok(Session {
                location: location.to_string(),
                suggested_file_name,
                content_md5: header_str(header::HeaderName::from_static("content-md5")),
                accept_ranges: header_str(header::ACCEPT_RANGES),
                content_type: header_str(header::CONTENT_TYPE),
                status_code: status.as_u16(),
                content_length,
                header_map: self.headers.clone(),
                parts: Vec::new(),
            });
        }
        MaxRedirectsSnafu {
            limit: MAX_REDIRECTS,
        }
        .fail()
    }

    /// A user supplied `Cookie` header is never sent verbatim; its pairs are
    /// seeded into the shared jar against the entry URL so every component
    /// carries them through the cookie provider.
    fn seed_cookies(&self, user_url: &str) {
        let Some(raw) = self.headers.get(COOKIE_KEY) else {
            return;
        };
        let Ok(url) = Url::parse(user_url) else {
            return;
        };
        for pair in raw.split("; ") {
            if let Some((name, value)) = pair.split_once('=') {
                self.jar.add_cookie_str(&format!("{name}={value}"), &url);
            }
        }
    }
}

/// Extract a filename from a `Content-Disposition` value.
///
/// Quoted values win; `utf-8''…` extended values are percent-decoded; a bare
/// token is taken as-is. Returns `None` when nothing usable matched.
pub(crate) fn parse_content_disposition(input: &str) -> Option<String> {
    for caps in RE_CONTENT_DISPOSITION.captures_iter(input) {
        if let Some(quoted) = caps.get(2)
            && !quoted.as_str().is_empty()
        {
            return Some(quoted.as_str().to_owned());
        }
        let raw = caps.get(1).map_or("", |m| m.as_str());
        let split: Vec<&str> = raw.split('\'').collect();
        if split.len() == 3 && split[0].eq_ignore_ascii_case("utf-8") {
            let decoded = percent_decode_str(split[2])
                .decode_utf8()
                .map(|c| c.into_owned())
                .unwrap_or_else(|_| split[2].to_owned());
            return Some(decoded);
        }
        if split[0] != "\"\"" && !split[0].is_empty() {
            return Some(split[0].to_owned());
        }
    }
    None
}

/// Last path segment of the final URL, query stripped, percent-decoded when
/// the decode succeeds and kept raw otherwise.
pub(crate) fn file_name_from_url(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty());
    match segment {
        Some(seg) => percent_decode_str(seg)
            .decode_utf8()
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| seg.to_owned()),
        None => url.host_str().unwrap_or("download").to_owned(),
    }
}
