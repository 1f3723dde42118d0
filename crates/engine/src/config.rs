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

use std::{collections::BTreeMap, time::Duration};

use bon::Builder;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use strum_macros::{Display, EnumString};

pub const USER_AGENT_KEY: &str = "User-Agent";
pub const COOKIE_KEY: &str = "Cookie";

/// Canned browser identities selectable with `-a/--user-agent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum UserAgentProfile {
    #[default]
    Chrome,
    Firefox,
    Safari,
}

impl UserAgentProfile {
    #[must_use]
    pub const fn agent(self) -> &'static str {
        match self {
            UserAgentProfile::Chrome => {
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_13_4) AppleWebKit/537.36 (KHTML, like \
                 Gecko) Chrome/65.0.3325.181 Safari/537.36"
            }
            UserAgentProfile::Firefox => {
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.13; rv:59.0) Gecko/20100101 \
                 Firefox/59.0"
            }
            UserAgentProfile::Safari => {
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_13_4) AppleWebKit/605.1.15 (KHTML, \
                 like Gecko) Version/11.1 Safari/605.1.15"
            }
        }
    }
}

/// Request headers frozen at startup and replayed on resume.
///
/// Lookup is case-insensitive while iteration yields the names exactly as the
/// user typed them. Serializes as a plain JSON object inside the session
/// sidecar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool { self.get(name).is_some() }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Inject the canned agent unless the user already supplied one under any
    /// capitalization.
    pub fn ensure_user_agent(&mut self, agent: &str) {
        if !self.contains(USER_AGENT_KEY) {
            self.insert(USER_AGENT_KEY, agent);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Headers(iter.into_iter().collect())
    }
}

/// HTTP basic auth credentials applied to every outbound request.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Engine configuration assembled by the front end from CLI options.
#[derive(Debug, Clone, SmartDefault, Builder)]
pub struct Config {
    /// Desired part count; 0 disables part planning entirely.
    #[default = 2]
    pub parts: u32,

    /// Max retries per part before giving up.
    #[default = 10]
    pub max_retry: u32,

    /// Base per-attempt timeout; doubles per retry, capped at ten minutes.
    #[default(Duration::from_secs(15))]
    pub timeout: Duration,

    /// User supplied output filename, overrides server suggestions.
    pub output: Option<String>,

    #[default(UserAgentProfile::Chrome)]
    pub user_agent: UserAgentProfile,

    /// Suppress the progress UI and informational lines.
    #[default = false]
    pub quiet: bool,

    /// Skip TLS certificate validation.
    #[default = false]
    pub insecure_skip_verify: bool,

    pub credentials: Option<Credentials>,

    /// Arbitrary extra request headers (`-H key:value`).
    #[default(Headers::default())]
    pub headers: Headers,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = Headers::default();
        headers.insert("X-Custom-Token", "abc");
        assert_eq!(headers.get("x-custom-token"), Some("abc"));
        assert_eq!(headers.get("X-CUSTOM-TOKEN"), Some("abc"));
        assert!(headers.get("x-other").is_none());
    }

    #[test]
    fn header_iteration_preserves_typed_case() {
        let mut headers = Headers::default();
        headers.insert("X-CuStOm", "v");
        let names: Vec<_> = headers.iter().map(|(k, _)| k.to_owned()).collect();
        assert_eq!(names, vec!["X-CuStOm"]);
    }

    #[test]
    fn user_agent_injected_only_when_absent() {
        let mut headers = Headers::default();
        headers.ensure_user_agent(UserAgentProfile::Chrome.agent());
        assert_eq!(
            headers.get("user-agent"),
            Some(UserAgentProfile::Chrome.agent())
        );

        let mut custom = Headers::default();
        custom.insert("user-agent", "my-crawler/1.0");
        custom.ensure_user_agent(UserAgentProfile::Firefox.agent());
        assert_eq!(custom.get("User-Agent"), Some("my-crawler/1.0"));
    }

    #[test]
    fn profile_parsing_round_trips() {
        use std::str::FromStr;

        for name in ["chrome", "firefox", "safari"] {
            let profile = UserAgentProfile::from_str(name).unwrap();
            assert_eq!(profile.to_string(), name);
        }
        assert!(UserAgentProfile::from_str("netscape").is_err());
    }
}
