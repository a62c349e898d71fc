//! W3C WebDriver sessions over plain HTTP

use crate::agent::{Agent, AgentError, AgentFactory, AgentId, AgentResult};
use crate::config::{AgentConfig, Browser};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Scripts run by [`WebDriverAgent::reset`]
const RESET_STORAGE_SCRIPT: &str = r#"
    try { window.localStorage.clear(); } catch (e) {}
    try { window.sessionStorage.clear(); } catch (e) {}
    return true;
"#;

/// One WebDriver session
pub struct WebDriverAgent {
    id: AgentId,
    client: Client,
    base: String,
    session_id: String,
}

impl WebDriverAgent {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn session_url(&self, path: &str) -> String {
        if path.is_empty() {
            format!("{}/session/{}", self.base, self.session_id)
        } else {
            format!("{}/session/{}/{}", self.base, self.session_id, path)
        }
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> AgentResult<Value> {
        let mut request = self.client.request(method, self.session_url(path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        decode_response(response).await
    }
}

#[async_trait]
impl Agent for WebDriverAgent {
    fn id(&self) -> AgentId {
        self.id
    }

    async fn navigate(&self, url: &str) -> AgentResult<()> {
        self.command(Method::POST, "url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    async fn current_url(&self) -> AgentResult<String> {
        let value = self.command(Method::GET, "url", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AgentError::Response(format!("url is not a string: {}", value)))
    }

    async fn page_source(&self) -> AgentResult<String> {
        let value = self.command(Method::GET, "source", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AgentError::Response("page source is not a string".to_string()))
    }

    async fn back(&self) -> AgentResult<()> {
        self.command(Method::POST, "back", Some(json!({})))
            .await
            .map(|_| ())
    }

    async fn execute(&self, script: &str, args: Vec<Value>) -> AgentResult<Value> {
        self.command(
            Method::POST,
            "execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    async fn reset(&self) -> AgentResult<()> {
        self.command(Method::DELETE, "cookie", None).await?;
        self.execute(RESET_STORAGE_SCRIPT, Vec::new()).await?;
        self.navigate("about:blank").await
    }

    async fn close(&self) -> AgentResult<()> {
        self.command(Method::DELETE, "", None).await.map(|_| ())
    }
}

/// Starts WebDriver sessions against one endpoint
pub struct WebDriverFactory {
    client: Client,
    endpoint: String,
    browser: Browser,
    headless: bool,
    user_agent: String,
    page_load_timeout: Duration,
}

impl WebDriverFactory {
    /// Creates a factory for sessions on `endpoint`
    ///
    /// The HTTP client timeout is a little longer than the page-load timeout
    /// so the driver reports slow loads itself.
    pub fn new(endpoint: &str, config: &AgentConfig, user_agent: &str) -> AgentResult<Self> {
        let page_load_timeout = config.page_timeout();
        let client = Client::builder()
            .timeout(page_load_timeout + Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            browser: config.browser,
            headless: config.headless,
            user_agent: user_agent.to_string(),
            page_load_timeout,
        })
    }

    fn capabilities(&self) -> Value {
        let timeouts = json!({
            "pageLoad": self.page_load_timeout.as_millis() as u64,
            "script": 30_000,
        });

        match self.browser {
            Browser::Chrome => {
                let mut args = vec![
                    "--disable-gpu".to_string(),
                    "--no-sandbox".to_string(),
                    "--disable-dev-shm-usage".to_string(),
                    "--window-size=1920,1080".to_string(),
                    format!("--user-agent={}", self.user_agent),
                ];
                if self.headless {
                    args.push("--headless=new".to_string());
                }
                json!({
                    "capabilities": {
                        "alwaysMatch": {
                            "browserName": "chrome",
                            "pageLoadStrategy": "normal",
                            "timeouts": timeouts,
                            "goog:chromeOptions": { "args": args }
                        }
                    }
                })
            }
            Browser::Firefox => {
                let mut args = Vec::<String>::new();
                if self.headless {
                    args.push("-headless".to_string());
                }
                json!({
                    "capabilities": {
                        "alwaysMatch": {
                            "browserName": "firefox",
                            "pageLoadStrategy": "normal",
                            "timeouts": timeouts,
                            "moz:firefoxOptions": {
                                "args": args,
                                "prefs": { "general.useragent.override": self.user_agent }
                            }
                        }
                    }
                })
            }
        }
    }
}

#[async_trait]
impl AgentFactory for WebDriverFactory {
    async fn create(&self, id: AgentId) -> AgentResult<Arc<dyn Agent>> {
        let response = self
            .client
            .post(format!("{}/session", self.endpoint))
            .json(&self.capabilities())
            .send()
            .await
            .map_err(|e| AgentError::Start(format!("session create request failed: {}", e)))?;

        let value = decode_response(response).await.map_err(|e| match e {
            AgentError::Protocol { code, message } => {
                AgentError::Start(format!("{}: {}", code, message))
            }
            other => other,
        })?;

        let session_id = value
            .pointer("/sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::Start(format!("session id missing in response: {}", value)))?
            .to_string();

        debug!("Created WebDriver session {} for agent {}", session_id, id);

        Ok(Arc::new(WebDriverAgent {
            id,
            client: self.client.clone(),
            base: self.endpoint.clone(),
            session_id,
        }))
    }
}

/// Unwraps the `value` member of a WebDriver response, mapping error payloads
async fn decode_response(response: reqwest::Response) -> AgentResult<Value> {
    let status = response.status();
    let body = response.text().await?;

    let mut parsed: Value = if body.trim().is_empty() {
        json!({ "value": null })
    } else {
        serde_json::from_str(&body).map_err(|e| {
            AgentError::Response(format!("HTTP {}: {} ({})", status.as_u16(), truncate(&body, 200), e))
        })?
    };

    if let Some(code) = parsed.pointer("/value/error").and_then(Value::as_str) {
        let message = parsed
            .pointer("/value/message")
            .and_then(Value::as_str)
            .unwrap_or("unknown webdriver error");
        return Err(AgentError::Protocol {
            code: code.to_string(),
            message: truncate(message, 300),
        });
    }

    if !status.is_success() {
        return Err(AgentError::Response(format!(
            "HTTP {}: {}",
            status.as_u16(),
            truncate(&body, 200)
        )));
    }

    Ok(parsed
        .get_mut("value")
        .map(Value::take)
        .unwrap_or(Value::Null))
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
