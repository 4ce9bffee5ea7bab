//! An HTTP client that fetches CMAB predictions from the prediction service.
use std::time::Duration;

use rand::Rng;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::{AttributeValue, Attributes, Error, Result};

/// Fetches a predicted variation id from a CMAB prediction service.
pub trait CmabClient: Send + Sync {
    /// Predicted variation id of `rule_id` for the user. `cmab_uuid` correlates the prediction with
    /// later events.
    fn fetch_decision(
        &self,
        rule_id: &str,
        user_id: &str,
        attributes: &Attributes,
        cmab_uuid: &str,
    ) -> Result<String>;
}

/// Retry policy of [`HttpCmabClient`]. Delays grow exponentially and carry a random jitter of up
/// to 10%.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound of the delay.
    pub max_backoff: Duration,
    /// Factor applied to the delay after each retry.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 1,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

/// Configuration for [`HttpCmabClient`].
#[derive(Debug, Clone)]
pub struct CmabClientConfig {
    pub(crate) prediction_endpoint: String,
    pub(crate) retry: RetryConfig,
    pub(crate) timeout: Duration,
}

impl CmabClientConfig {
    /// Default timeout of a single prediction request.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a configuration posting to `prediction_endpoint`. Requests go to
    /// `{prediction_endpoint}/{rule_id}`.
    ///
    /// ```
    /// # use decision_core::cmab::CmabClientConfig;
    /// let client = CmabClientConfig::new("https://predictions.example.com/predict")
    ///     .to_client()
    ///     .unwrap();
    /// ```
    pub fn new(prediction_endpoint: impl Into<String>) -> CmabClientConfig {
        CmabClientConfig {
            prediction_endpoint: prediction_endpoint.into(),
            retry: RetryConfig::default(),
            timeout: CmabClientConfig::DEFAULT_TIMEOUT,
        }
    }

    /// Override the retry policy.
    pub fn retry(&mut self, retry: RetryConfig) -> &mut Self {
        self.retry = retry;
        self
    }

    /// Override the timeout of a single request.
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = timeout;
        self
    }

    /// Create a new [`HttpCmabClient`] using this configuration.
    ///
    /// Fails if the prediction endpoint is not a valid URL.
    pub fn to_client(&self) -> Result<HttpCmabClient> {
        HttpCmabClient::new(self.clone())
    }
}

/// [`CmabClient`] talking to the prediction service over HTTP.
pub struct HttpCmabClient {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    endpoint: Url,
    retry: RetryConfig,
}

#[derive(Debug, Serialize)]
struct PredictionRequest<'a> {
    instances: [Instance<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Instance<'a> {
    visitor_id: &'a str,
    experiment_id: &'a str,
    attributes: Vec<InstanceAttribute<'a>>,
    #[serde(rename = "cmabUUID")]
    cmab_uuid: &'a str,
}

#[derive(Debug, Serialize)]
struct InstanceAttribute<'a> {
    id: &'a str,
    value: &'a AttributeValue,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    variation_id: String,
}

impl HttpCmabClient {
    fn new(config: CmabClientConfig) -> Result<HttpCmabClient> {
        let endpoint = Url::parse(config.prediction_endpoint.trim_end_matches('/'))
            .map_err(Error::InvalidEndpoint)?;
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(HttpCmabClient {
            client,
            endpoint,
            retry: config.retry,
        })
    }

    fn url_for(&self, rule_id: &str) -> Result<Url> {
        Url::parse(&format!("{}/{rule_id}", self.endpoint.as_str().trim_end_matches('/')))
            .map_err(Error::InvalidEndpoint)
    }

    fn fetch_with_retry(&self, url: &Url, request: &PredictionRequest) -> Result<String> {
        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 0;
        loop {
            match self.fetch(url, request) {
                Ok(variation_id) => return Ok(variation_id),
                // The service answered; asking again won't produce a different body.
                Err(Error::CmabInvalidResponse) => return Err(Error::CmabInvalidResponse),
                Err(err) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    log::warn!(target: "decision_core", attempt; "CMAB request failed, retrying: {err}");
                    std::thread::sleep(with_jitter(backoff));
                    backoff = backoff
                        .mul_f64(self.retry.backoff_multiplier)
                        .min(self.retry.max_backoff);
                }
                Err(err) => {
                    log::warn!(target: "decision_core", attempt; "CMAB request failed, giving up: {err}");
                    return Err(err);
                }
            }
        }
    }

    fn fetch(&self, url: &Url, request: &PredictionRequest) -> Result<String> {
        log::debug!(target: "decision_core", url = url.as_str(); "fetching CMAB prediction");
        let response = self.client.post(url.clone()).json(request).send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::CmabRequestFailed {
                status: status.as_u16(),
            });
        }

        let body = response.bytes()?;
        let response: PredictionResponse =
            serde_json::from_slice(&body).map_err(|_| Error::CmabInvalidResponse)?;
        response
            .predictions
            .into_iter()
            .next()
            .map(|prediction| prediction.variation_id)
            .ok_or(Error::CmabInvalidResponse)
    }
}

impl CmabClient for HttpCmabClient {
    fn fetch_decision(
        &self,
        rule_id: &str,
        user_id: &str,
        attributes: &Attributes,
        cmab_uuid: &str,
    ) -> Result<String> {
        let url = self.url_for(rule_id)?;
        let request = PredictionRequest {
            instances: [Instance {
                visitor_id: user_id,
                experiment_id: rule_id,
                attributes: attributes
                    .iter()
                    .map(|(id, value)| InstanceAttribute {
                        id,
                        value,
                        kind: "custom_attribute",
                    })
                    .collect(),
                cmab_uuid,
            }],
        };

        self.fetch_with_retry(&url, &request)
    }
}

fn with_jitter(backoff: Duration) -> Duration {
    backoff.mul_f64(1.0 + rand::thread_rng().gen_range(0.0..0.1))
}
