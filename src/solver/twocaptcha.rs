//! 2captcha HTTP API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{ChallengeSolver, SolverError};

/// Configuration for the solving service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// API key. The solver is disabled when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Seconds between result polls.
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
    /// Seconds to wait before the first poll.
    #[serde(default = "default_initial_wait")]
    pub initial_wait: u64,
    /// Seconds before a solve is abandoned.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_endpoint() -> String {
    "https://2captcha.com".to_string()
}

fn default_polling_interval() -> u64 {
    10
}

fn default_initial_wait() -> u64 {
    15
}

fn default_timeout() -> u64 {
    120
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_endpoint(),
            polling_interval: default_polling_interval(),
            initial_wait: default_initial_wait(),
            timeout: default_timeout(),
        }
    }
}

impl SolverConfig {
    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `TWO_CAPTCHA_API_KEY`: API key
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var("TWO_CAPTCHA_API_KEY") {
            if !key.trim().is_empty() {
                self.api_key = Some(key.trim().to_string());
            }
        }
        self
    }

    /// Whether the key has a plausible shape. Does not contact the service.
    pub fn key_looks_valid(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| k.len() >= 10)
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Response envelope shared by `in.php` and `res.php` with `json=1`.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: u8,
    request: String,
}

/// Client for the 2captcha recaptcha API.
pub struct TwoCaptchaSolver {
    config: SolverConfig,
    api_key: String,
    client: Client,
}

impl TwoCaptchaSolver {
    /// Build a solver, or `None` when no API key is configured.
    pub fn from_config(config: SolverConfig) -> Result<Option<Self>, SolverError> {
        let Some(api_key) = config.api_key.clone() else {
            return Ok(None);
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SolverError::Connection(e.to_string()))?;
        Ok(Some(Self {
            config,
            api_key,
            client,
        }))
    }

    async fn call(&self, path: &str, params: &[(&str, &str)]) -> Result<ApiResponse, SolverError> {
        let url = format!("{}/{}", self.config.endpoint.trim_end_matches('/'), path);
        let resp = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str()), ("json", "1")])
            .query(params)
            .send()
            .await
            .map_err(|e| SolverError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SolverError::Api(format!("HTTP {}", resp.status())));
        }

        resp.json::<ApiResponse>()
            .await
            .map_err(|e| SolverError::Api(format!("unreadable response: {}", e)))
    }
}

#[async_trait]
impl ChallengeSolver for TwoCaptchaSolver {
    async fn submit(&self, site_key: &str, page_url: &str) -> Result<String, SolverError> {
        info!("Submitting challenge to solver for {}", page_url);
        let resp = self
            .call(
                "in.php",
                &[
                    ("method", "userrecaptcha"),
                    ("googlekey", site_key),
                    ("pageurl", page_url),
                ],
            )
            .await?;
        interpret(resp)
    }

    async fn poll(&self, ticket: &str, timeout: Duration) -> Result<String, SolverError> {
        let started = tokio::time::Instant::now();
        let interval = Duration::from_secs(self.config.polling_interval);
        let wait = async {
            tokio::time::sleep(Duration::from_secs(self.config.initial_wait)).await;
            loop {
                let resp = self
                    .call("res.php", &[("action", "get"), ("id", ticket)])
                    .await?;
                if resp.status == 0 && resp.request == "CAPCHA_NOT_READY" {
                    debug!("Ticket {} not ready", ticket);
                    tokio::time::sleep(interval).await;
                    continue;
                }
                return interpret(resp);
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(token)) => {
                info!(
                    "Solver returned a token in {:.1}s ({} chars)",
                    started.elapsed().as_secs_f64(),
                    token.len()
                );
                Ok(token)
            }
            Ok(Err(e)) => {
                warn!("Solver failed: {}", e);
                Err(e)
            }
            Err(_) => Err(SolverError::Timeout(timeout)),
        }
    }
}

fn interpret(resp: ApiResponse) -> Result<String, SolverError> {
    if resp.status == 1 {
        Ok(resp.request)
    } else {
        Err(classify_error(&resp.request))
    }
}

/// Map a service error code onto [`SolverError`].
fn classify_error(code: &str) -> SolverError {
    match code {
        "ERROR_ZERO_BALANCE" => SolverError::ZeroBalance,
        "ERROR_WRONG_USER_KEY" | "ERROR_KEY_DOES_NOT_EXIST" => SolverError::InvalidKey,
        "ERROR_NO_SLOT_AVAILABLE" => SolverError::NoSlot,
        "ERROR_CAPTCHA_UNSOLVABLE" | "ERROR_BAD_DUPLICATES" => {
            SolverError::Unsolvable(code.to_string())
        }
        other => SolverError::Api(other.to_string()),
    }
}
