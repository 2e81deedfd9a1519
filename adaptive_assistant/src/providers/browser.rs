//! Browser provider. Turns instruction text into a short action plan and
//! runs it through a [`BrowserDriver`] that owns the browser session.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::{
    instruction::Instruction,
    provider::{CapabilityProvider, ProviderOutput},
    settings::BrowserProviderConfig,
};

const KEYWORDS: &[&str] = &[
    "browser", "chrome", "firefox", "website", "login", "gmail", "email", "web", "navigate", "click", "open",
    "url",
];

static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s'\x22]+").expect("valid url regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrowserAction {
    OpenBrowser { browser: String },
    Navigate { url: String },
    Login { service: String },
    ClickFirstEmail,
}

/// Session-level browser operations. Implementations own one browser
/// session; the provider serialises access to it.
#[async_trait]
pub trait BrowserDriver: Send {
    async fn open(&mut self, browser: &str) -> Result<Value>;
    async fn navigate(&mut self, url: &str) -> Result<Value>;
    async fn login(&mut self, service: &str) -> Result<Value>;
    async fn click_first_email(&mut self) -> Result<Value>;
}

/// Opens URLs with the platform's default opener. Anything that needs DOM
/// access is reported as unsupported.
pub struct SystemOpenerDriver {
    current_browser: Option<String>,
    headless: bool,
}

impl SystemOpenerDriver {
    pub fn new(headless: bool) -> Self {
        Self {
            current_browser: None,
            headless,
        }
    }

    fn opener() -> (&'static str, &'static [&'static str]) {
        if cfg!(target_os = "macos") {
            ("open", &[])
        } else if cfg!(target_os = "windows") {
            ("cmd", &["/C", "start", ""])
        } else {
            ("xdg-open", &[])
        }
    }
}

#[async_trait]
impl BrowserDriver for SystemOpenerDriver {
    async fn open(&mut self, browser: &str) -> Result<Value> {
        self.current_browser = Some(browser.to_string());
        Ok(json!({ "message": format!("Selected {} browser", browser) }))
    }

    async fn navigate(&mut self, url: &str) -> Result<Value> {
        if self.headless {
            return Err(anyhow!("Headless navigation needs an automation driver; the system opener is interactive only"));
        }
        let (program, prefix) = Self::opener();
        let status = Command::new(program)
            .args(prefix)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| anyhow!("Failed to launch '{}': {}", program, e))?;

        if !status.success() {
            return Err(anyhow!("'{}' exited with {} while opening {}", program, status, url));
        }
        Ok(json!({
            "message": format!("Navigated to {}", url),
            "current_url": url,
            "browser": self.current_browser,
        }))
    }

    async fn login(&mut self, service: &str) -> Result<Value> {
        Err(anyhow!("Login to '{}' requires a browser automation driver", service))
    }

    async fn click_first_email(&mut self) -> Result<Value> {
        Err(anyhow!("Clicking page elements requires a browser automation driver"))
    }
}

pub struct BrowserProvider {
    driver: Mutex<Box<dyn BrowserDriver>>,
    default_browser: String,
    timeout: Duration,
}

impl BrowserProvider {
    pub fn new(config: &BrowserProviderConfig, driver: Box<dyn BrowserDriver>) -> Self {
        Self {
            driver: Mutex::new(driver),
            default_browser: config.default_browser.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    pub fn with_system_opener(config: &BrowserProviderConfig) -> Self {
        Self::new(config, Box::new(SystemOpenerDriver::new(config.headless)))
    }

    pub fn plan(&self, instruction: &Instruction) -> Vec<BrowserAction> {
        let text = instruction.normalized_text();
        let mut actions = Vec::new();

        if text.contains("chrome") {
            actions.push(BrowserAction::OpenBrowser { browser: "chrome".to_string() });
        } else if text.contains("browser") {
            actions.push(BrowserAction::OpenBrowser { browser: self.default_browser.clone() });
        }
        if text.contains("firefox") {
            actions.push(BrowserAction::OpenBrowser { browser: "firefox".to_string() });
        }

        if let Some(url) = URL.find(instruction.text()) {
            actions.push(BrowserAction::Navigate { url: url.as_str().to_string() });
        } else if text.contains("gmail") {
            actions.push(BrowserAction::Navigate { url: "https://gmail.com".to_string() });
        }

        if text.contains("login") {
            actions.push(BrowserAction::Login { service: "gmail".to_string() });
        }
        if text.contains("first email") || text.contains("first mail") {
            actions.push(BrowserAction::ClickFirstEmail);
        }
        actions
    }
}

#[async_trait]
impl CapabilityProvider for BrowserProvider {
    fn id(&self) -> &str {
        "browser"
    }

    fn description(&self) -> &str {
        "Handles web browser automation, login, navigation and interactions"
    }

    fn examples(&self) -> Vec<String> {
        vec!["open chrome and go to gmail".to_string()]
    }

    fn can_handle(&self, instruction: &Instruction) -> bool {
        let text = instruction.normalized_text();
        KEYWORDS.iter().any(|k| text.contains(k))
    }

    #[instrument(skip_all, fields(instruction_id = %instruction.id()))]
    async fn execute(&self, instruction: &Instruction) -> Result<ProviderOutput> {
        let actions = self.plan(instruction);
        if actions.is_empty() {
            return Ok(ProviderOutput::failure(json!([]), "No browser actions recognised in instruction")
                .with_metadata("actions_executed", 0));
        }

        let mut driver = self.driver.lock().await;
        let mut steps = Vec::with_capacity(actions.len());
        let mut failures = 0;

        for action in &actions {
            let outcome = match action {
                BrowserAction::OpenBrowser { browser } => driver.open(browser).await,
                BrowserAction::Navigate { url } => driver.navigate(url).await,
                BrowserAction::Login { service } => driver.login(service).await,
                BrowserAction::ClickFirstEmail => driver.click_first_email().await,
            };
            match outcome {
                Ok(detail) => {
                    info!(action = ?action, "Browser action completed");
                    steps.push(json!({ "action": action, "success": true, "detail": detail }));
                }
                Err(e) => {
                    warn!(action = ?action, "Browser action failed: {:#}", e);
                    failures += 1;
                    steps.push(json!({ "action": action, "success": false, "error": format!("{:#}", e) }));
                }
            }
        }
        drop(driver);

        let payload = Value::Array(steps);
        let output = if failures == 0 {
            ProviderOutput::success(payload)
        } else {
            ProviderOutput::failure(payload, format!("{} of {} browser actions failed", failures, actions.len()))
        };
        Ok(output.with_metadata("actions_executed", actions.len()))
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    fn requires_exclusive(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct RecordingDriver {
        calls: Arc<parking_lot::Mutex<Vec<String>>>,
        fail_login: bool,
    }

    #[async_trait]
    impl BrowserDriver for RecordingDriver {
        async fn open(&mut self, browser: &str) -> Result<Value> {
            self.calls.lock().push(format!("open:{browser}"));
            Ok(json!("opened"))
        }

        async fn navigate(&mut self, url: &str) -> Result<Value> {
            self.calls.lock().push(format!("navigate:{url}"));
            Ok(json!({ "current_url": url }))
        }

        async fn login(&mut self, service: &str) -> Result<Value> {
            self.calls.lock().push(format!("login:{service}"));
            if self.fail_login {
                Err(anyhow!("credentials unavailable"))
            } else {
                Ok(json!("logged in"))
            }
        }

        async fn click_first_email(&mut self) -> Result<Value> {
            self.calls.lock().push("click_first_email".to_string());
            Ok(json!("clicked"))
        }
    }

    fn provider(driver: RecordingDriver) -> BrowserProvider {
        BrowserProvider::new(&BrowserProviderConfig::default(), Box::new(driver))
    }

    #[test]
    fn plans_actions_from_text() {
        let p = provider(RecordingDriver::default());
        assert_eq!(
            p.plan(&Instruction::new("Open Chrome and go to Gmail, then open first email")),
            vec![
                BrowserAction::OpenBrowser { browser: "chrome".into() },
                BrowserAction::Navigate { url: "https://gmail.com".into() },
                BrowserAction::ClickFirstEmail,
            ]
        );
        assert_eq!(
            p.plan(&Instruction::new("navigate to https://example.com/Docs in the browser")),
            vec![
                BrowserAction::OpenBrowser { browser: "chrome".into() },
                BrowserAction::Navigate { url: "https://example.com/Docs".into() },
            ]
        );
    }

    #[test]
    fn claims_browser_keywords() {
        let p = provider(RecordingDriver::default());
        assert!(p.can_handle(&Instruction::new("login to gmail")));
        assert!(!p.can_handle(&Instruction::new("check disk space")));
        assert!(p.requires_exclusive());
    }

    #[tokio::test]
    async fn runs_plan_through_driver() {
        let driver = RecordingDriver::default();
        let calls = driver.calls.clone();
        let output = provider(driver)
            .execute(&Instruction::new("open chrome and go to gmail"))
            .await
            .unwrap();

        assert!(output.success);
        assert_eq!(output.metadata["actions_executed"], json!(2));
        assert_eq!(*calls.lock(), vec!["open:chrome", "navigate:https://gmail.com"]);
        assert_eq!(output.payload[1]["action"]["type"], json!("navigate"));
    }

    #[tokio::test]
    async fn any_failed_action_fails_the_run() {
        let driver = RecordingDriver { fail_login: true, ..Default::default() };
        let output = provider(driver)
            .execute(&Instruction::new("login to gmail"))
            .await
            .unwrap();

        assert!(!output.success);
        assert_eq!(output.error.as_deref(), Some("1 of 2 browser actions failed"));
        assert_eq!(output.payload[1]["error"], json!("credentials unavailable"));
    }

    #[tokio::test]
    async fn empty_plan_is_a_reported_failure() {
        let output = provider(RecordingDriver::default())
            .execute(&Instruction::new("what is on the web today"))
            .await
            .unwrap();
        assert!(!output.success);
        assert_eq!(output.metadata["actions_executed"], json!(0));
    }

    #[tokio::test]
    async fn opener_driver_refuses_dom_actions() {
        let mut driver = SystemOpenerDriver::new(true);
        assert!(driver.open("firefox").await.is_ok());
        assert!(driver.navigate("https://example.com").await.is_err());
        assert!(driver.login("gmail").await.is_err());
        assert!(driver.click_first_email().await.is_err());
    }
}
