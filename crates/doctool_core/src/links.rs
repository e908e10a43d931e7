use std::env;
use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use reqwest::{Proxy, StatusCode};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::DocToolConfig;
use crate::wiki::WikiSite;

/// Status codes that count as a reachable link.
const GOOD_CODES: &[StatusCode] = &[
    StatusCode::OK,
    StatusCode::FOUND,
    StatusCode::MOVED_PERMANENTLY,
];

/// Hosts answering HEAD with 501 even though the page exists.
const HEAD_UNSUPPORTED_MARKER: &str = "github";

pub trait LinkProbe {
    /// Issue a HEAD request; `None` means the request never got a response.
    fn head_status(&self, url: &str) -> Option<u16>;
}

#[derive(Debug, Clone)]
pub struct HttpProbeConfig {
    pub user_agent: String,
    pub timeout_ms: u64,
    pub proxy: Option<String>,
}

impl HttpProbeConfig {
    pub fn from_config(config: &DocToolConfig) -> Self {
        Self {
            user_agent: config.user_agent(),
            timeout_ms: config.timeout_ms(),
            proxy: config.proxy(),
        }
    }
}

pub struct HttpProbe {
    client: Client,
    user_agent: String,
}

impl HttpProbe {
    pub fn new(config: HttpProbeConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .redirect(Policy::none());
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(
                Proxy::all(proxy).with_context(|| format!("invalid HTTP proxy: {proxy}"))?,
            );
        }
        let client = builder
            .build()
            .context("failed to build link probe HTTP client")?;
        Ok(Self {
            client,
            user_agent: config.user_agent,
        })
    }
}

impl LinkProbe for HttpProbe {
    fn head_status(&self, url: &str) -> Option<u16> {
        match self
            .client
            .head(url)
            .header("User-Agent", self.user_agent.clone())
            .send()
        {
            Ok(response) => Some(response.status().as_u16()),
            Err(error) => {
                debug!(url, %error, "HEAD request failed");
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkCheck {
    pub url: String,
    pub status: Option<u16>,
    pub reachable: bool,
}

/// Classify a HEAD outcome. Transport failures and unknown codes are broken.
pub fn is_reachable(url: &str, status: Option<u16>) -> bool {
    let Some(code) = status.and_then(|code| StatusCode::from_u16(code).ok()) else {
        return false;
    };
    if GOOD_CODES.contains(&code) {
        return true;
    }
    code == StatusCode::NOT_IMPLEMENTED && url.contains(HEAD_UNSUPPORTED_MARKER)
}

pub fn check_url<P: LinkProbe + ?Sized>(probe: &P, url: &str) -> LinkCheck {
    let status = probe.head_status(url);
    let reachable = is_reachable(url, status);
    debug!(url, ?status, reachable, "checked link");
    LinkCheck {
        url: url.to_string(),
        status,
        reachable,
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PageAudit {
    pub title: String,
    pub checked: usize,
    pub broken: Vec<LinkCheck>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub pages: Vec<PageAudit>,
}

impl AuditReport {
    pub fn checked_links(&self) -> usize {
        self.pages.iter().map(|page| page.checked).sum()
    }

    pub fn broken_links(&self) -> usize {
        self.pages.iter().map(|page| page.broken.len()).sum()
    }

    /// Whether the run should exit non-zero.
    pub fn fails_run(&self, fail_on_broken: bool) -> bool {
        fail_on_broken && self.broken_links() > 0
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Read WIKI_BOT_USER / WIKI_BOT_PASS; an explicit username wins over the env.
    pub fn from_env(username: Option<&str>) -> Result<Self> {
        Self::resolve(
            username,
            env::var("WIKI_BOT_USER").ok(),
            env::var("WIKI_BOT_PASS").ok(),
        )
    }

    pub fn resolve(
        username: Option<&str>,
        env_user: Option<String>,
        env_pass: Option<String>,
    ) -> Result<Self> {
        let username = match username {
            Some(value) => value.to_string(),
            None => env_user.unwrap_or_default(),
        };
        if username.trim().is_empty() {
            bail!("WIKI_BOT_USER is required for the link audit (or pass --username)");
        }
        let password = env_pass.unwrap_or_default();
        if password.trim().is_empty() {
            bail!("WIKI_BOT_PASS is required for the link audit");
        }
        Ok(Self {
            username: username.trim().to_string(),
            password: password.trim().to_string(),
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Log in once, then run [`audit`].
pub fn login_and_audit<S, P, W>(
    site: &mut S,
    credentials: &Credentials,
    probe: &P,
    root_pages: &[String],
    out: &mut W,
) -> Result<AuditReport>
where
    S: WikiSite + ?Sized,
    P: LinkProbe + ?Sized,
    W: Write,
{
    site.login(&credentials.username, &credentials.password)
        .context("wiki login failed")?;
    info!(user = %credentials.username, "logged in to wiki");
    audit(site, probe, root_pages, out)
}

/// Check the external links of every page listed on each root page, printing
/// broken links as they are found. Remote failures never abort the run.
pub fn audit<S, P, W>(
    site: &mut S,
    probe: &P,
    root_pages: &[String],
    out: &mut W,
) -> Result<AuditReport>
where
    S: WikiSite + ?Sized,
    P: LinkProbe + ?Sized,
    W: Write,
{
    let mut report = AuditReport::default();
    for root in root_pages {
        let titles = match site.internal_links(root) {
            Ok(titles) => titles,
            Err(error) => {
                warn!(page = %root, error = %format!("{error:#}"), "skipping contents page");
                continue;
            }
        };
        for title in titles {
            report.pages.push(audit_page(site, probe, &title, out)?);
        }
    }
    info!(
        pages = report.pages.len(),
        checked = report.checked_links(),
        broken = report.broken_links(),
        "link audit finished"
    );
    Ok(report)
}

fn audit_page<S, P, W>(site: &mut S, probe: &P, title: &str, out: &mut W) -> Result<PageAudit>
where
    S: WikiSite + ?Sized,
    P: LinkProbe + ?Sized,
    W: Write,
{
    writeln!(out, "Checking {title}").context("failed to write audit output")?;
    let links = match site.external_links(title) {
        Ok(links) => links,
        Err(error) => {
            warn!(page = %title, error = %format!("{error:#}"), "could not list external links");
            Vec::new()
        }
    };

    let mut page = PageAudit {
        title: title.to_string(),
        checked: links.len(),
        broken: Vec::new(),
    };
    for link in &links {
        let check = check_url(probe, link);
        if !check.reachable {
            page.broken.push(check);
        }
    }
    for check in &page.broken {
        writeln!(out, "\t{} is BROKEN", check.url).context("failed to write audit output")?;
    }
    out.flush().context("failed to flush audit output")?;
    Ok(page)
}
