//! Post-deployment verification.
//!
//! Executes a scenario's verification steps in order against a live endpoint.
//! Every step runs regardless of earlier failures; each yields a
//! [`StepResult`] that is attached to the run.
//!
//! `navigate` steps are checked with a plain HTTP GET (expected status and
//! optional body content) and, when a browser is attached, also loaded in
//! it. Element steps (`click`, `type`, `assert_*`, `screenshot`) need a
//! [`BrowserDriver`].

pub mod driver;
pub mod endpoint;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analyzer::StepOutcome;
use crate::error::VerifierError;
use crate::metrics::MetricsCollector;
use crate::runner::supervisor::deadline_after;
use crate::scenario::{VerificationAction, VerificationStep};

pub use driver::{BrowserDriver, WebDriverClient};
pub use endpoint::{parse_env_values, pick_endpoint, EndpointResolver};

/// Default expected status for `navigate`.
pub const DEFAULT_STATUS_CODE: u16 = 200;
/// Default `wait` duration when the step gives none.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(1);

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const VISIBILITY_POLL: Duration = Duration::from_millis(250);

/// Outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub action: VerificationAction,
    pub passed: bool,
    pub details: String,
    pub elapsed_ms: u64,
}

impl StepResult {
    pub fn outcome(&self) -> StepOutcome {
        StepOutcome {
            passed: self.passed,
            details: self.details.clone(),
        }
    }
}

/// Collects step results into the map stored on a run.
pub fn outcomes(results: &[StepResult]) -> BTreeMap<String, StepOutcome> {
    results
        .iter()
        .map(|r| (r.name.clone(), r.outcome()))
        .collect()
}

/// Whether `url` answers a GET with a success status (after redirects).
pub async fn endpoint_responds(url: &str) -> bool {
    let client = match Client::builder().timeout(HTTP_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "Failed to build HTTP client");
            return false;
        }
    };
    match client.get(url).send().await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            debug!(url = %url, error = %e, "Endpoint probe failed");
            false
        }
    }
}

/// Runs verification steps.
pub struct Verifier {
    driver: Option<Box<dyn BrowserDriver>>,
    http: Client,
    artifact_dir: PathBuf,
    metrics: MetricsCollector,
}

impl Verifier {
    /// Creates an HTTP-only verifier writing screenshots under `artifact_dir`.
    pub fn new(artifact_dir: impl Into<PathBuf>) -> Result<Self, VerifierError> {
        Ok(Self {
            driver: None,
            http: Client::builder().timeout(HTTP_TIMEOUT).build()?,
            artifact_dir: artifact_dir.into(),
            metrics: MetricsCollector::new(),
        })
    }

    /// Attaches a browser session.
    pub fn with_driver(mut self, driver: Box<dyn BrowserDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn has_browser(&self) -> bool {
        self.driver.is_some()
    }

    /// Executes `steps` in order, substituting `endpoint` into placeholders.
    pub async fn run(&self, steps: &[VerificationStep], endpoint: Option<&str>) -> Vec<StepResult> {
        let mut results = Vec::with_capacity(steps.len());

        for step in steps {
            let started = Instant::now();
            let resolved = match (endpoint, step.references_endpoint()) {
                (Some(endpoint), _) => Ok(step.with_endpoint(endpoint)),
                (None, false) => Ok(step.clone()),
                (None, true) => Err(VerifierError::EndpointUnavailable),
            };

            let outcome = match resolved {
                Ok(step) => self.execute(&step).await,
                Err(e) => Err(e),
            };
            let (passed, details) = match outcome {
                Ok(outcome) => (outcome.passed, outcome.details),
                Err(e) => (false, e.to_string()),
            };

            self.metrics
                .record_verification_step(&step.action.to_string(), passed);
            if passed {
                info!(step = %step.name, action = %step.action, "Verification step passed");
            } else {
                warn!(step = %step.name, action = %step.action, details = %details, "Verification step failed");
            }

            results.push(StepResult {
                name: step.name.clone(),
                action: step.action,
                passed,
                details,
                elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            });
        }

        results
    }

    /// Closes the browser session, if any.
    pub async fn finish(self) {
        if let Some(driver) = self.driver {
            if let Err(e) = driver.close().await {
                warn!(error = %e, "Failed to close browser session");
            }
        }
    }

    /// GETs `url` and checks the status and, optionally, body content.
    pub async fn http_check(
        &self,
        url: &str,
        expected_status: u16,
        contains: Option<&str>,
    ) -> Result<StepOutcome, VerifierError> {
        let response = self.http.get(url).send().await?;
        let status = response.status().as_u16();
        if status != expected_status {
            return Ok(fail(format!(
                "expected status {}, got {}",
                expected_status, status
            )));
        }

        if let Some(needle) = contains.filter(|n| !n.is_empty()) {
            let body = response.text().await?;
            if !body.contains(needle) {
                return Ok(fail(format!("status {} but body lacks '{}'", status, needle)));
            }
            return Ok(pass(format!("status {}, body contains '{}'", status, needle)));
        }
        Ok(pass(format!("status {}", status)))
    }

    async fn execute(&self, step: &VerificationStep) -> Result<StepOutcome, VerifierError> {
        match step.action {
            VerificationAction::Navigate => {
                let url = required(step, step.url.as_deref(), "url")?;
                let expected = step.status_code.unwrap_or(DEFAULT_STATUS_CODE);
                let outcome = self.http_check(url, expected, step.value.as_deref()).await?;
                if let Some(driver) = &self.driver {
                    driver.navigate(url).await?;
                }
                Ok(outcome)
            }
            VerificationAction::Click => {
                let selector = required(step, step.selector.as_deref(), "selector")?;
                self.browser()?.click(selector).await?;
                Ok(pass(format!("clicked {}", selector)))
            }
            VerificationAction::Type => {
                let selector = required(step, step.selector.as_deref(), "selector")?;
                let text = required(step, step.value.as_deref(), "value")?;
                self.browser()?.type_text(selector, text).await?;
                Ok(pass(format!("typed into {}", selector)))
            }
            VerificationAction::Wait => {
                let duration = step
                    .value
                    .as_deref()
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_WAIT);
                match step.selector.as_deref() {
                    Some(selector) => self.wait_visible(selector, duration).await,
                    None => {
                        tokio::time::sleep(duration).await;
                        Ok(pass(format!("waited {}ms", duration.as_millis())))
                    }
                }
            }
            VerificationAction::AssertVisible => {
                let selector = required(step, step.selector.as_deref(), "selector")?;
                if self.browser()?.is_visible(selector).await? {
                    Ok(pass(format!("{} is visible", selector)))
                } else {
                    Ok(fail(format!("{} is not visible", selector)))
                }
            }
            VerificationAction::AssertNonempty => {
                let selector = required(step, step.selector.as_deref(), "selector")?;
                let text = self.browser()?.text(selector).await?;
                if text.trim().is_empty() {
                    Ok(fail(format!("{} is empty", selector)))
                } else {
                    Ok(pass(format!("{} has {} chars", selector, text.trim().len())))
                }
            }
            VerificationAction::Screenshot => {
                let png = self.browser()?.screenshot().await?;
                let path = self.screenshot_path(step);
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, &png).await?;
                Ok(pass(format!("saved {}", path.display())))
            }
        }
    }

    async fn wait_visible(
        &self,
        selector: &str,
        limit: Duration,
    ) -> Result<StepOutcome, VerifierError> {
        let driver = self.browser()?;
        let deadline = deadline_after(tokio::time::Instant::now(), limit);
        loop {
            if driver.is_visible(selector).await? {
                return Ok(pass(format!("{} appeared", selector)));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(fail(format!(
                    "{} not visible after {}ms",
                    selector,
                    limit.as_millis()
                )));
            }
            tokio::time::sleep(VISIBILITY_POLL).await;
        }
    }

    fn browser(&self) -> Result<&dyn BrowserDriver, VerifierError> {
        self.driver
            .as_deref()
            .ok_or_else(|| VerifierError::WebDriver("no WebDriver endpoint configured".to_string()))
    }

    fn screenshot_path(&self, step: &VerificationStep) -> PathBuf {
        let file = step
            .value
            .as_deref()
            .and_then(|v| Path::new(v).file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{}.png", step.name));
        self.artifact_dir.join(file)
    }
}

fn required<'a>(
    step: &VerificationStep,
    value: Option<&'a str>,
    field: &str,
) -> Result<&'a str, VerifierError> {
    value.ok_or_else(|| {
        VerifierError::WebDriver(format!("step '{}' is missing '{}'", step.name, field))
    })
}

fn pass(details: String) -> StepOutcome {
    StepOutcome {
        passed: true,
        details,
    }
}

fn fail(details: String) -> StepOutcome {
    StepOutcome {
        passed: false,
        details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct FakeBrowser {
        calls: Arc<Mutex<Vec<String>>>,
        visible: Vec<String>,
    }

    #[async_trait]
    impl BrowserDriver for FakeBrowser {
        async fn navigate(&self, url: &str) -> Result<(), VerifierError> {
            self.calls.lock().unwrap().push(format!("navigate {}", url));
            Ok(())
        }
        async fn click(&self, selector: &str) -> Result<(), VerifierError> {
            self.calls.lock().unwrap().push(format!("click {}", selector));
            if selector == "#missing" {
                return Err(VerifierError::ElementNotFound(selector.to_string()));
            }
            Ok(())
        }
        async fn type_text(&self, selector: &str, text: &str) -> Result<(), VerifierError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("type {} {}", selector, text));
            Ok(())
        }
        async fn is_visible(&self, selector: &str) -> Result<bool, VerifierError> {
            Ok(self.visible.iter().any(|s| s == selector))
        }
        async fn text(&self, selector: &str) -> Result<String, VerifierError> {
            Ok(if selector == "#items" { "a, b".to_string() } else { String::new() })
        }
        async fn screenshot(&self) -> Result<Vec<u8>, VerifierError> {
            Ok(vec![0x89, b'P', b'N', b'G'])
        }
        async fn close(&self) -> Result<(), VerifierError> {
            Ok(())
        }
    }

    fn step(name: &str, action: VerificationAction) -> VerificationStep {
        VerificationStep {
            name: name.to_string(),
            action,
            selector: None,
            url: None,
            value: None,
            status_code: None,
        }
    }

    /// Serves `responses` HTTP responses with the given status and body.
    async fn serve(status: u16, body: &'static str, responses: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for _ in 0..responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_navigate_checks_status_and_body() {
        let endpoint = serve(200, "<h1>Welcome</h1>", 2).await;
        let verifier = Verifier::new(std::env::temp_dir()).unwrap();

        let mut ok = step("home", VerificationAction::Navigate);
        ok.url = Some("{{endpoint}}/".to_string());
        ok.value = Some("Welcome".to_string());
        let mut wrong = step("other", VerificationAction::Navigate);
        wrong.url = Some("{{endpoint}}/".to_string());
        wrong.status_code = Some(404);

        let results = verifier.run(&[ok, wrong], Some(&endpoint)).await;
        assert!(results[0].passed, "{}", results[0].details);
        assert!(!results[1].passed);
        assert!(results[1].details.contains("expected status 404"));
    }

    #[tokio::test]
    async fn test_failures_do_not_halt_later_steps() {
        let dir = tempfile::TempDir::new().unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let browser = FakeBrowser {
            calls: calls.clone(),
            visible: vec!["h1".to_string()],
        };
        let verifier = Verifier::new(dir.path())
            .unwrap()
            .with_driver(Box::new(browser));

        let mut missing = step("missing", VerificationAction::Click);
        missing.selector = Some("#missing".to_string());
        let mut typed = step("type-name", VerificationAction::Type);
        typed.selector = Some("#name".to_string());
        typed.value = Some("harness".to_string());
        let mut header = step("header", VerificationAction::AssertVisible);
        header.selector = Some("h1".to_string());
        let mut hidden = step("hidden", VerificationAction::AssertVisible);
        hidden.selector = Some("#nope".to_string());
        let mut list = step("list", VerificationAction::AssertNonempty);
        list.selector = Some("#items".to_string());
        let mut shot = step("shot", VerificationAction::Screenshot);
        shot.value = Some("../escape/home.png".to_string());

        let results = verifier
            .run(&[missing, typed, header, hidden, list, shot], None)
            .await;
        let passed: Vec<_> = results.iter().map(|r| r.passed).collect();
        assert_eq!(passed, vec![false, true, true, false, true, true]);
        assert!(results[0].details.contains("#missing"));
        assert!(dir.path().join("home.png").exists());
        assert_eq!(calls.lock().unwrap().len(), 2);

        let map = outcomes(&results);
        assert_eq!(map.len(), 6);
        assert!(!map["hidden"].passed);
    }

    #[tokio::test]
    async fn test_placeholder_without_endpoint_fails_step() {
        let verifier = Verifier::new(std::env::temp_dir()).unwrap();
        let mut nav = step("home", VerificationAction::Navigate);
        nav.url = Some("{{endpoint}}/".to_string());
        let mut wait = step("settle", VerificationAction::Wait);
        wait.value = Some("1".to_string());

        let results = verifier.run(&[nav, wait], None).await;
        assert!(!results[0].passed);
        assert!(results[0].details.contains("endpoint"));
        assert!(results[1].passed);
    }

    #[tokio::test]
    async fn test_element_steps_need_browser() {
        let verifier = Verifier::new(std::env::temp_dir()).unwrap();
        assert!(!verifier.has_browser());
        let mut click = step("click", VerificationAction::Click);
        click.selector = Some("#start".to_string());

        let results = verifier.run(&[click], Some("http://localhost")).await;
        assert!(!results[0].passed);
        assert!(results[0].details.contains("WebDriver"));
    }
}
