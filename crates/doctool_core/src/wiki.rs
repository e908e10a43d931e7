use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::DocToolConfig;

/// Read access to a wiki, after a single authenticated login.
pub trait WikiSite {
    fn login(&mut self, username: &str, password: &str) -> Result<()>;
    /// Titles of the pages linked from `title` (its "contents" listing).
    fn internal_links(&mut self, title: &str) -> Result<Vec<String>>;
    /// Absolute URLs linked from `title` to outside the wiki.
    fn external_links(&mut self, title: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &DocToolConfig) -> Self {
        Self {
            api_url: config.api_url(),
            user_agent: config.user_agent(),
            timeout_ms: config.timeout_ms(),
        }
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    request_count: usize,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        Url::parse(&config.api_url)
            .with_context(|| format!("invalid wiki API URL: {}", config.api_url))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            request_count: 0,
        })
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let pairs = api_pairs(params);
        self.request_count += 1;
        let response = self
            .client
            .get(&self.config.api_url)
            .header("User-Agent", self.config.user_agent.clone())
            .query(&pairs)
            .send()
            .context("failed to call MediaWiki API")?;
        decode_api_response(response)
    }

    fn request_json_post(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let pairs = api_pairs(params);
        self.request_count += 1;
        let response = self
            .client
            .post(&self.config.api_url)
            .header("User-Agent", self.config.user_agent.clone())
            .form(&pairs)
            .send()
            .context("failed to call MediaWiki API")?;
        decode_api_response(response)
    }

    fn query_page_prop(&mut self, title: &str, prop: PageProp) -> Result<Vec<String>> {
        let mut values = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("action", "query".to_string()),
                ("titles", title.to_string()),
                ("prop", prop.name().to_string()),
                (prop.limit_key(), "max".to_string()),
            ];
            if let Some(token) = &continue_token {
                params.push((prop.continue_key(), token.clone()));
            }

            let response = self.request_json_get(&params)?;
            let page = parse_page_prop(response, prop)?;
            values.extend(page.values);

            continue_token = page.continue_token;
            if continue_token.is_none() {
                break;
            }
        }

        debug!(title, prop = prop.name(), count = values.len(), "fetched page listing");
        Ok(values)
    }
}

impl WikiSite for MediaWikiClient {
    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let token_response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.request_json_post(&[
            ("action", "login".to_string()),
            ("lgname", username.to_string()),
            ("lgpassword", password.to_string()),
            ("lgtoken", login_token),
        ])?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => Ok(()),
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    fn internal_links(&mut self, title: &str) -> Result<Vec<String>> {
        self.query_page_prop(title, PageProp::Links)
    }

    fn external_links(&mut self, title: &str) -> Result<Vec<String>> {
        self.query_page_prop(title, PageProp::ExtLinks)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageProp {
    Links,
    ExtLinks,
}

impl PageProp {
    fn name(self) -> &'static str {
        match self {
            Self::Links => "links",
            Self::ExtLinks => "extlinks",
        }
    }

    fn limit_key(self) -> &'static str {
        match self {
            Self::Links => "pllimit",
            Self::ExtLinks => "ellimit",
        }
    }

    fn continue_key(self) -> &'static str {
        match self {
            Self::Links => "plcontinue",
            Self::ExtLinks => "elcontinue",
        }
    }
}

#[derive(Debug, Default)]
struct PagePropBatch {
    values: Vec<String>,
    continue_token: Option<String>,
}

fn parse_page_prop(payload: Value, prop: PageProp) -> Result<PagePropBatch> {
    let parsed: QueryResponse =
        serde_json::from_value(payload).context("failed to decode page query response")?;
    let Some(page) = parsed.query.pages.into_iter().next() else {
        bail!("invalid MediaWiki response shape");
    };
    if page.missing.unwrap_or(false) {
        bail!("page does not exist: {}", page.title);
    }

    let values = match prop {
        PageProp::Links => page.links.into_iter().map(|link| link.title).collect(),
        PageProp::ExtLinks => page.extlinks.into_iter().map(|link| link.url).collect(),
    };
    let continue_token = parsed.continuation.and_then(|cont| match prop {
        PageProp::Links => cont.plcontinue,
        PageProp::ExtLinks => cont.elcontinue,
    });
    Ok(PagePropBatch {
        values,
        continue_token,
    })
}

fn api_pairs(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        if !value.is_empty() {
            pairs.push(((*key).to_string(), value.clone()));
        }
    }
    pairs
}

fn decode_api_response(response: reqwest::blocking::Response) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        bail!("MediaWiki API request failed with HTTP {status}");
    }
    let payload: Value = response
        .json()
        .context("failed to decode MediaWiki API JSON response")?;
    check_api_error(&payload)?;
    Ok(payload)
}

fn check_api_error(payload: &Value) -> Result<()> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        bail!("MediaWiki API error [{code}]: {info}");
    }
    Ok(())
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<ContinuationPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize, Default)]
struct ContinuationPayload {
    plcontinue: Option<String>,
    elcontinue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    title: String,
    missing: Option<bool>,
    #[serde(default)]
    links: Vec<LinkQueryItem>,
    #[serde(default)]
    extlinks: Vec<ExtLinkQueryItem>,
}

#[derive(Debug, Deserialize)]
struct LinkQueryItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ExtLinkQueryItem {
    url: String,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}
