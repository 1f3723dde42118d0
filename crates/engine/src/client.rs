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

use reqwest::{Client, RequestBuilder, cookie::Jar, redirect};
use snafu::ResultExt;

use crate::{
    config::{COOKIE_KEY, Config, Credentials, Headers},
    error::{NetworkSnafu, Result},
};

/// Build the single shared transport.
///
/// Redirects stay disabled: the resolver follows them by hand so it can
/// bound the chain and record the final location. The connect timeout plays
/// the role of a handshake timeout; the cookie jar is shared with every
/// part worker.
pub fn build_client(config: &Config, jar: Arc<Jar>) -> Result<Client> {
    let mut builder = Client::builder()
        .redirect(redirect::Policy::none())
        .cookie_provider(jar)
        .connect_timeout(config.timeout);
    if config.insecure_skip_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }
    builder.build().context(NetworkSnafu)
}

/// A plain redirect-following client for mirror probes, which only care
/// whether a URL eventually answers 200.
pub fn build_probe_client(config: &Config) -> Result<Client> {
    let mut builder = Client::builder().connect_timeout(config.timeout);
    if config.insecure_skip_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }
    builder.build().context(NetworkSnafu)
}

/// Apply the frozen header map and credentials to an outbound request.
///
/// The `Cookie` entry is never sent verbatim; its pairs were seeded into the
/// shared jar by the resolver and travel through the cookie provider.
pub fn apply_headers(
    mut request: RequestBuilder,
    headers: &Headers,
    credentials: Option<&Credentials>,
) -> RequestBuilder {
    for (name, value) in headers.iter() {
        if name.eq_ignore_ascii_case(COOKIE_KEY) {
            continue;
        }
        request = request.header(name, value);
    }
    if let Some(creds) = credentials {
        request = request.basic_auth(&creds.username, Some(&creds.password));
    }
    request
}
