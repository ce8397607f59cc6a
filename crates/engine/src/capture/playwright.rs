//! Playwright-driven capture
//!
//! Each capture writes a small Node script into a scratch directory and runs
//! it. The script reports its outcome as one JSON line on stdout; failures
//! carry a `kind` that maps onto [`CaptureError`].
//!
//! Pages behind the login are captured in a context that signed in first.
//! Credentials reach the script through its environment and are never
//! written into the script file.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as TokioCommand;
use tracing::debug;

use visreg_common::{CaptureError, Credentials, Readiness};

use super::{CaptureRequest, CapturedImage, Capturer};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Playwright configuration
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub node_binary: String,
    pub browser: Browser,
    pub headless: bool,
    /// Deadline for one run of the script; each Playwright step gets the same bound
    pub attempt_timeout_ms: u64,
    /// Account for pages behind the login
    pub credentials: Option<Credentials>,
    /// Scratch directory for scripts and raw screenshots; a fresh temp dir when unset
    pub work_dir: Option<PathBuf>,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            node_binary: "node".to_string(),
            browser: Browser::Chromium,
            headless: true,
            attempt_timeout_ms: 15_000,
            credentials: None,
            work_dir: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScriptOutcome {
    success: bool,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct PlaywrightCapturer {
    config: PlaywrightConfig,
}

impl PlaywrightCapturer {
    pub fn new(config: PlaywrightConfig) -> Self {
        Self { config }
    }

    /// Build the Node script capturing `request` into `output`
    pub fn build_script(&self, request: &CaptureRequest, output: &str) -> String {
        let (width, height) = request.viewport.dimensions();
        let timeout = self.config.attempt_timeout_ms;

        let mut script = format!(
            r#"
const {{ chromium, firefox, webkit }} = require('playwright');

function report(outcome) {{
  console.log(JSON.stringify(outcome));
}}

(async () => {{
  const browser = await {browser}.launch({{ headless: {headless} }});
  const context = await browser.newContext({{
    viewport: {{ width: {width}, height: {height} }}
  }});
  const page = await context.newPage();
  let stage = 'navigation';

  try {{
{login}    await page.goto({url}, {{ timeout: {timeout} }});
    stage = 'element';
"#,
            browser = self.config.browser.as_str(),
            headless = self.config.headless,
            width = width,
            height = height,
            login = request
                .login_url
                .as_deref()
                .map(|login_url| login_to_js(login_url, timeout))
                .unwrap_or_default(),
            url = js_string(&request.url),
            timeout = timeout,
        );

        script.push_str(&readiness_to_js(&request.readiness, timeout));

        script.push_str(&format!(
            r#"
    stage = 'screenshot';
    await page.screenshot({{ path: {output}, fullPage: true }});
    report({{ success: true }});
  }} catch (error) {{
    const kind = stage === 'login'
      ? 'login'
      : error.name === 'TimeoutError' && stage !== 'element' ? 'timeout' : stage;
    report({{ success: false, kind, error: error.message }});
    process.exitCode = 1;
  }} finally {{
    await browser.close();
  }}
}})();
"#,
            output = js_string(output),
        ));

        script
    }

    fn outcome_to_error(&self, request: &CaptureRequest, outcome: ScriptOutcome) -> CaptureError {
        let message = outcome.error.unwrap_or_else(|| "unknown failure".to_string());
        match outcome.kind.as_deref() {
            Some("timeout") => CaptureError::Timeout {
                ms: self.config.attempt_timeout_ms,
            },
            Some("login") => CaptureError::Authentication(message),
            Some("navigation") => CaptureError::Navigation(format!("{}: {}", request.url, message)),
            Some("element") => CaptureError::ElementNotFound(message),
            _ => CaptureError::Process(message),
        }
    }
}

#[async_trait]
impl Capturer for PlaywrightCapturer {
    async fn capture(&self, request: &CaptureRequest) -> Result<CapturedImage, CaptureError> {
        let process_err = |e: std::io::Error| CaptureError::Process(e.to_string());
        let credentials = match (&request.login_url, &self.config.credentials) {
            (Some(_), None) => {
                return Err(CaptureError::Authentication(format!(
                    "{} requires a signed-in session but no credentials are configured",
                    request.key
                )))
            }
            (Some(_), Some(credentials)) => Some(credentials),
            (None, _) => None,
        };

        let temp_dir = match &self.config.work_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await.map_err(process_err)?;
                tempfile::tempdir_in(dir).map_err(process_err)?
            }
            None => tempfile::tempdir().map_err(process_err)?,
        };
        let script_path = temp_dir.path().join("capture.js");
        let output_path = temp_dir.path().join(request.key.file_name());
        let script = self.build_script(request, &output_path.to_string_lossy());
        tokio::fs::write(&script_path, script).await.map_err(process_err)?;

        debug!(key = %request.key, url = %request.url, "Running capture script");

        let mut command = TokioCommand::new(&self.config.node_binary);
        command
            .arg(&script_path)
            .current_dir(temp_dir.path())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(credentials) = credentials {
            command
                .env(LOGIN_ID_ENV, &credentials.login_id)
                .env(PASSWORD_ENV, &credentials.password);
        }

        let deadline = Duration::from_millis(self.config.attempt_timeout_ms);
        let output = tokio::time::timeout(deadline, command.output())
            .await
            .map_err(|_| CaptureError::Timeout {
                ms: self.config.attempt_timeout_ms,
            })?
            .map_err(|e| {
                CaptureError::Process(format!("failed to spawn {}: {}", self.config.node_binary, e))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let outcome = stdout
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str::<ScriptOutcome>(line).ok());

        match outcome {
            Some(outcome) if outcome.success && output.status.success() => {}
            Some(outcome) if !outcome.success => return Err(self.outcome_to_error(request, outcome)),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(CaptureError::Process(format!(
                    "script failed:\nstdout: {}\nstderr: {}",
                    stdout, stderr
                )));
            }
        }

        let bytes = tokio::fs::read(&output_path).await.map_err(process_err)?;
        let (width, height) = image::load_from_memory_with_format(&bytes, image::ImageFormat::Png)
            .map(|img| (img.width(), img.height()))
            .map_err(|e| CaptureError::Process(format!("unreadable screenshot: {}", e)))?;

        Ok(CapturedImage {
            bytes,
            width,
            height,
            captured_at: Utc::now(),
        })
    }
}

const LOGIN_ID_ENV: &str = "VISREG_LOGIN_ID";
const PASSWORD_ENV: &str = "VISREG_PASSWORD";

/// Sign in through the login form and wait until it redirects away from it
fn login_to_js(login_url: &str, timeout: u64) -> String {
    format!(
        r#"    stage = 'login';
    await page.goto({url}, {{ timeout: {timeout} }});
    await page.fill('[name="login_id"]', process.env.{login_id} || '', {{ timeout: {timeout} }});
    await page.fill('[name="password"]', process.env.{password} || '', {{ timeout: {timeout} }});
    await Promise.all([
      page.waitForURL(url => !url.pathname.endsWith('/login'), {{ timeout: {timeout} }}),
      page.press('[name="password"]', 'Enter'),
    ]);
    stage = 'navigation';
"#,
        url = js_string(login_url),
        timeout = timeout,
        login_id = LOGIN_ID_ENV,
        password = PASSWORD_ENV,
    )
}

fn readiness_to_js(readiness: &Readiness, timeout: u64) -> String {
    match readiness {
        Readiness::Selector { selector } => format!(
            "    await page.waitForSelector({}, {{ state: 'visible', timeout: {} }});\n",
            js_string(selector),
            timeout
        ),
        Readiness::ClickThenSelector { click, selector } => format!(
            "    await page.click({}, {{ timeout: {} }});\n    await page.waitForSelector({}, {{ state: 'visible', timeout: {} }});\n",
            js_string(click),
            timeout,
            js_string(selector),
            timeout
        ),
        Readiness::NetworkIdle => format!(
            "    await page.waitForLoadState('networkidle', {{ timeout: {} }});\n",
            timeout
        ),
    }
}

/// Quote `s` as a JavaScript string literal
fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}
