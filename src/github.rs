use crate::classifier::{classify, RateLimitRules};
use crate::error::ErrorSignal;
use crate::parser::{parse_observation, WildlifeObservation};
use crate::ImageAnalyzer;
use reqwest::header::{ACCEPT, RETRY_AFTER};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Species the model may choose from.
pub const DEFAULT_SPECIES: [&str; 13] = [
    "Bartgeier",
    "Steinadler",
    "Kolkrabe",
    "Alpendohle",
    "Fuchs",
    "Gams",
    "Steinbock",
    "Murmeltier",
    "Marder",
    "Reh",
    "Hirsch",
    "Rabenkrähe",
    "Mensch",
];

/// Token variables, in lookup order.
pub const TOKEN_VARS: [&str; 2] = ["GITHUB_MODELS_TOKEN", "GITHUB_TOKEN"];

/// One API base plus the model to request there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEndpoint {
    pub api_base: String,
    pub model: String,
}

impl ModelEndpoint {
    pub fn new(api_base: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            model: model.into(),
        }
    }
}

/// Configuration for [`GithubModelsAnalyzer`].
#[derive(Debug, Clone)]
pub struct GithubModelsConfig {
    /// Tried in order until one answers
    pub endpoints: Vec<ModelEndpoint>,
    /// Bearer token
    pub token: String,
    /// Per-request timeout (default: 30s)
    pub timeout: Duration,
    /// Completion budget (default: 500)
    pub max_tokens: u32,
    /// Sampling temperature (default: 0.1)
    pub temperature: f32,
    /// Species list offered in the prompt
    pub species: Vec<String>,
}

impl Default for GithubModelsConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![
                ModelEndpoint::new("https://models.inference.ai.azure.com", "gpt-4o"),
                ModelEndpoint::new("https://api.github.com/models", "gpt-4o"),
            ],
            token: String::new(),
            timeout: Duration::from_secs(30),
            max_tokens: 500,
            temperature: 0.1,
            species: DEFAULT_SPECIES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl GithubModelsConfig {
    /// Default config with the given token.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Default::default()
        }
    }

    /// Default config with the token from `GITHUB_MODELS_TOKEN` or `GITHUB_TOKEN`.
    pub fn from_env() -> Option<Self> {
        token_from(|name| std::env::var(name).ok()).map(Self::with_token)
    }

    /// Replace the endpoint list.
    pub fn endpoints(mut self, endpoints: Vec<ModelEndpoint>) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Replace the species list offered in the prompt.
    pub fn species(mut self, species: Vec<String>) -> Self {
        self.species = species;
        self
    }
}

/// First non-empty token among [`TOKEN_VARS`].
fn token_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    TOKEN_VARS
        .iter()
        .filter_map(|name| lookup(name))
        .map(|token| token.trim().to_string())
        .find(|token| !token.is_empty())
}

/// [`ImageAnalyzer`] backed by the GitHub Models chat completions API.
///
/// Endpoints are tried in order. A rate-limit answer is returned at once,
/// because the limit applies to the whole account; any other failure moves
/// on to the next endpoint and the last one is reported.
pub struct GithubModelsAnalyzer {
    client: Client,
    config: GithubModelsConfig,
    rules: RateLimitRules,
}

impl GithubModelsAnalyzer {
    pub fn new(config: GithubModelsConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    /// Use an existing `reqwest` client (shared connection pool, proxies).
    pub fn with_client(client: Client, config: GithubModelsConfig) -> Self {
        Self {
            client,
            config,
            rules: RateLimitRules::default(),
        }
    }

    /// Rules deciding which failures stop the endpoint fallback.
    pub fn with_rules(mut self, rules: RateLimitRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn config(&self) -> &GithubModelsConfig {
        &self.config
    }

    /// The instruction sent along with every image.
    pub fn prompt(&self) -> String {
        format!(
            r#"Analysiere dieses Kamerafallen-Bild und gib die folgenden Informationen:

1. TIERE: Identifiziere alle sichtbaren Tiere im Bild. Wähle nur aus dieser Liste: {species}
- Für Bartgeier: Wenn das Individuum erkennbar ist, füge es in Klammern hinzu, z.B. "Bartgeier (Luisa)". Wenn unsicher, sage "Bartgeier (unbestimmt)".
- Für alle anderen Tiere: inklusive Anzahl (z.B. "1 Fuchs", "3 Gämsen")
- Wenn Kolkrabe oder Rabenkrähe erkannt wird: Gib "Rabenvogel/Rabenvögel" aus.
- Wenn keine Tiere sichtbar sind, sage "Keine erkannt"

2. METADATEN: Lies den Text am unteren Rand des Bildes und extrahiere:
- Standort: FP1, FP2, FP3 oder Nische (ignoriere ein "NLP"-Präfix)
- Uhrzeit im Format HH:MM:SS
- Datum im Format DD.MM.YYYY

Antworte genau so:
TIERE: [Tiername mit Anzahl oder "Keine erkannt"]
STANDORT: [FP1/FP2/FP3/Nische]
UHRZEIT: [HH:MM:SS]
DATUM: [DD.MM.YYYY]"#,
            species = self.config.species.join(", ")
        )
    }

    fn stops_fallback(&self, signal: &ErrorSignal) -> bool {
        signal.status == Some(429) || classify(signal, &self.rules).is_rate_limited()
    }

    async fn complete(
        &self,
        endpoint: &ModelEndpoint,
        prompt: &str,
        image_url: &str,
    ) -> Result<String, ErrorSignal> {
        let body = json!({
            "model": endpoint.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": image_url } },
                ],
            }],
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        });

        let url = format!("{}/chat/completions", endpoint.api_base.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.config.token)
            .header(ACCEPT, "application/json")
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ErrorSignal::timeout(self.config.timeout)
                } else {
                    ErrorSignal::transport(format!("Cannot reach {}: {}", endpoint.api_base, e))
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let text = resp.text().await.unwrap_or_default();
            let signal = ErrorSignal::http(status, text);
            return Err(match retry_after {
                Some(secs) => signal.with_retry_after(secs),
                None => signal,
            });
        }

        let json: serde_json::Value = resp.json().await.map_err(|e| {
            ErrorSignal::transport(format!("Invalid response from {}: {}", endpoint.api_base, e))
        })?;

        Ok(json
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

impl ImageAnalyzer for GithubModelsAnalyzer {
    type Output = WildlifeObservation;

    async fn analyze(&self, image: &Path) -> Result<WildlifeObservation, ErrorSignal> {
        if self.config.token.is_empty() {
            return Err(ErrorSignal::transport(
                "Unauthorized: no token configured (set GITHUB_MODELS_TOKEN)",
            ));
        }

        let image_url = read_image_data_url(image)?;
        let prompt = self.prompt();
        let mut last_error = ErrorSignal::transport("No model endpoint configured");

        for endpoint in &self.config.endpoints {
            match self.complete(endpoint, &prompt, &image_url).await {
                Ok(content) => match parse_observation(&content) {
                    Ok(observation) => return Ok(observation),
                    Err(e) => {
                        debug!(model = %endpoint.model, api = %endpoint.api_base, error = %e, "Unusable model answer");
                        last_error = ErrorSignal::transport(e.to_string());
                    }
                },
                Err(signal) if self.stops_fallback(&signal) => return Err(signal),
                Err(signal) => {
                    debug!(model = %endpoint.model, api = %endpoint.api_base, error = %signal, "Endpoint failed");
                    last_error = signal;
                }
            }
        }

        Err(last_error)
    }

    fn name(&self) -> &str {
        "github-models"
    }
}

fn read_image_data_url(path: &Path) -> Result<String, ErrorSignal> {
    let bytes = std::fs::read(path).map_err(|e| {
        ErrorSignal::transport(format!("Failed to read image {}: {}", path.display(), e))
    })?;
    let mime = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        _ => "image/jpeg",
    };
    let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &bytes);
    Ok(format!("data:{};base64,{}", mime, encoded))
}
