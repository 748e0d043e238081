//! Purpose: Fetch result pages from the public query endpoint over HTTPS.
//! Exports: `TransportConfig`, `HttpPageSource`.
//! Role: `PageSource` implementation backed by a blocking `ureq` agent.
//! Invariants: All endpoint/header settings come from an immutable `TransportConfig`.
//! Invariants: Every request is bounded by the configured timeout.
//! Invariants: Timeouts, connection failures and non-2xx statuses map to `ErrorKind::Transport`.
#![allow(clippy::result_large_err)]

use std::time::Duration;

use url::Url;

use crate::api::query::QueryTemplate;
use crate::core::cursor::ResumeCursor;
use crate::core::error::{Error, ErrorKind};
use crate::core::paginate::PageSource;

pub const DEFAULT_ENDPOINT: &str = "https://wabi-us-gov-virginia-api.analysis.usgovcloudapi.net/public/reports/querydata?synchronous=true";
pub const DEFAULT_RESOURCE_KEY: &str = "bedd740d-2544-405d-b74b-578d6f1c4674";
pub const DEFAULT_ORIGIN: &str = "https://app.powerbigov.us";
/// The public endpoint serves browser clients; requests present as one.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const RESOURCE_KEY_HEADER: &str = "X-PowerBI-ResourceKey";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
const ACTIVITY_ID: &str = "0442498d-f0ef-dddd-aede-067f2528e0e5";
const BODY_SNIPPET_BYTES: usize = 200;

#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub endpoint: Url,
    pub resource_key: String,
    pub origin: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl TransportConfig {
    pub fn new(endpoint: &str, resource_key: impl Into<String>) -> Result<Self, Error> {
        Ok(Self {
            endpoint: parse_endpoint(endpoint)?,
            resource_key: resource_key.into(),
            origin: DEFAULT_ORIGIN.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    fn referer(&self) -> String {
        format!("{}/", self.origin.trim_end_matches('/'))
    }
}

pub struct HttpPageSource {
    config: TransportConfig,
    template: QueryTemplate,
    agent: ureq::Agent,
}

impl HttpPageSource {
    pub fn new(config: TransportConfig, template: QueryTemplate) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build();
        Self {
            config,
            template,
            agent,
        }
    }

    pub fn template(&self) -> &QueryTemplate {
        &self.template
    }

    fn request(&self) -> ureq::Request {
        self.agent
            .post(self.config.endpoint.as_str())
            .set("Accept", "application/json, text/plain, */*")
            .set("Accept-Language", ACCEPT_LANGUAGE)
            .set("ActivityId", ACTIVITY_ID)
            .set("Content-Type", "application/json;charset=UTF-8")
            .set("Cache-Control", "no-cache")
            .set("Origin", &self.config.origin)
            .set("Referer", &self.config.referer())
            .set(RESOURCE_KEY_HEADER, &self.config.resource_key)
    }
}

impl PageSource for HttpPageSource {
    fn fetch(&mut self, cursor: Option<&ResumeCursor>) -> Result<String, Error> {
        let payload = serde_json::to_string(&self.template.payload(cursor)).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode request json")
                .with_source(err)
        })?;

        match self.request().send_string(&payload) {
            Ok(resp) => resp.into_string().map_err(|err| {
                Error::new(ErrorKind::Transport)
                    .with_message("failed to read response body")
                    .with_source(err)
            }),
            Err(ureq::Error::Status(code, resp)) => Err(status_error(code, resp)),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Transport)
                .with_message("request failed")
                .with_source(err)),
        }
    }
}

fn parse_endpoint(raw: &str) -> Result<Url, Error> {
    let url = Url::parse(raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid endpoint url")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(
            Error::new(ErrorKind::Usage).with_message("endpoint url must use http or https scheme")
        );
    }
    Ok(url)
}

fn status_error(status: u16, response: ureq::Response) -> Error {
    let body = response.into_string().unwrap_or_default();
    let snippet = snippet(&body);
    let mut message = format!("query service returned status {status}");
    if !snippet.is_empty() {
        message.push_str(": ");
        message.push_str(snippet);
    }
    Error::new(ErrorKind::Transport)
        .with_message(message)
        .with_status(status)
}

fn snippet(body: &str) -> &str {
    let body = body.trim();
    if body.len() <= BODY_SNIPPET_BYTES {
        return body;
    }
    let mut end = BODY_SNIPPET_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
