//! Browser automation surface.
//!
//! [`BrowserDriver`] is the seam the verifier drives; [`WebDriverClient`]
//! implements it over the W3C WebDriver HTTP protocol (chromedriver,
//! geckodriver, Selenium grid).

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::VerifierError;

/// W3C element reference key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Operations the verifier needs from a browser.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Loads `url` in the current window.
    async fn navigate(&self, url: &str) -> Result<(), VerifierError>;

    /// Clicks the first element matching `selector`.
    async fn click(&self, selector: &str) -> Result<(), VerifierError>;

    /// Types `text` into the first element matching `selector`.
    async fn type_text(&self, selector: &str, text: &str) -> Result<(), VerifierError>;

    /// Whether an element matching `selector` exists and is displayed.
    async fn is_visible(&self, selector: &str) -> Result<bool, VerifierError>;

    /// Rendered text of the first element matching `selector`.
    async fn text(&self, selector: &str) -> Result<String, VerifierError>;

    /// PNG screenshot of the current window.
    async fn screenshot(&self) -> Result<Vec<u8>, VerifierError>;

    /// Ends the browser session.
    async fn close(&self) -> Result<(), VerifierError>;
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    value: Value,
}

/// WebDriver client bound to one browser session.
#[derive(Debug, Clone)]
pub struct WebDriverClient {
    http: Client,
    base_url: String,
    session_id: String,
}

impl WebDriverClient {
    /// Creates a headless Chrome session on the WebDriver server at `base_url`.
    pub async fn connect(base_url: &str) -> Result<Self, VerifierError> {
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": ["--headless=new", "--no-sandbox", "--disable-gpu"]
                    }
                }
            }
        });
        Self::connect_with(base_url, capabilities).await
    }

    /// Creates a session with explicit capabilities.
    pub async fn connect_with(base_url: &str, capabilities: Value) -> Result<Self, VerifierError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let response = http
            .post(format!("{}/session", base_url))
            .json(&capabilities)
            .send()
            .await
            .map_err(|e| VerifierError::SessionCreation(e.to_string()))?;
        let value = decode(response)
            .await
            .map_err(|e| VerifierError::SessionCreation(e.to_string()))?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                VerifierError::SessionCreation("response carried no sessionId".to_string())
            })?
            .to_string();

        debug!(webdriver = %base_url, session_id = %session_id, "WebDriver session created");
        Ok(Self {
            http,
            base_url,
            session_id,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, VerifierError> {
        let url = format!("{}/session/{}{}", self.base_url, self.session_id, path);
        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        decode(request.send().await?).await
    }

    async fn find(&self, selector: &str) -> Result<String, VerifierError> {
        let value = self
            .command(
                Method::POST,
                "/element",
                Some(json!({ "using": "css selector", "value": selector })),
            )
            .await
            .map_err(|e| match e {
                VerifierError::WebDriver(msg) if msg.starts_with("no such element") => {
                    VerifierError::ElementNotFound(selector.to_string())
                }
                other => other,
            })?;

        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| VerifierError::ElementNotFound(selector.to_string()))
    }
}

/// Unwraps the `value` envelope, turning WebDriver error payloads into errors.
async fn decode(response: reqwest::Response) -> Result<Value, VerifierError> {
    let status = response.status();
    let body = response.text().await?;
    let parsed: WireResponse = serde_json::from_str(&body).map_err(|_| {
        VerifierError::WebDriver(format!("unexpected response ({}): {}", status, body))
    })?;

    if let Some(error) = parsed.value.get("error").and_then(Value::as_str) {
        let message = parsed
            .value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(VerifierError::WebDriver(format!("{}: {}", error, message)));
    }
    if !status.is_success() {
        return Err(VerifierError::WebDriver(format!("HTTP {}", status)));
    }
    Ok(parsed.value)
}

#[async_trait]
impl BrowserDriver for WebDriverClient {
    async fn navigate(&self, url: &str) -> Result<(), VerifierError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), VerifierError> {
        let element = self.find(selector).await?;
        self.command(
            Method::POST,
            &format!("/element/{}/click", element),
            Some(json!({})),
        )
        .await?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), VerifierError> {
        let element = self.find(selector).await?;
        self.command(
            Method::POST,
            &format!("/element/{}/value", element),
            Some(json!({ "text": text })),
        )
        .await?;
        Ok(())
    }

    async fn is_visible(&self, selector: &str) -> Result<bool, VerifierError> {
        let element = match self.find(selector).await {
            Ok(element) => element,
            Err(VerifierError::ElementNotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let value = self
            .command(Method::GET, &format!("/element/{}/displayed", element), None)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn text(&self, selector: &str) -> Result<String, VerifierError> {
        let element = self.find(selector).await?;
        let value = self
            .command(Method::GET, &format!("/element/{}/text", element), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, VerifierError> {
        let value = self.command(Method::GET, "/screenshot", None).await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| VerifierError::WebDriver("screenshot was not a string".to_string()))?;
        Ok(base64::engine::general_purpose::STANDARD.decode(encoded)?)
    }

    async fn close(&self) -> Result<(), VerifierError> {
        let url = format!("{}/session/{}", self.base_url, self.session_id);
        if let Err(e) = self.http.delete(&url).send().await {
            warn!(session_id = %self.session_id, error = %e, "Failed to close WebDriver session");
        }
        Ok(())
    }
}
