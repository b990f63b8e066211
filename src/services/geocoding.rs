use crate::config::AppConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

/// One structured suggestion for a free-text address query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressSuggestion {
    pub line1: String,
    pub city: String,
    pub postal_code: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
struct SuggestionResponse {
    suggestions: Vec<AddressSuggestion>,
}

/// Address autocomplete against the external geocoding provider.
///
/// Strictly best-effort: any failure (no endpoint configured, timeout,
/// bad payload) degrades to an empty suggestion list. Order placement
/// never depends on this service being up.
pub struct GeocodingService {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl GeocodingService {
    pub fn new(config: Arc<AppConfig>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self {
            client,
            endpoint: config.geocoding_url.clone(),
        }
    }

    /// Resolves a free-text query to structured suggestions.
    #[instrument(skip(self))]
    pub async fn suggest(&self, query: &str) -> Vec<AddressSuggestion> {
        let Some(endpoint) = &self.endpoint else {
            return Vec::new();
        };
        if query.trim().len() < 3 {
            return Vec::new();
        }

        let request = self
            .client
            .get(endpoint)
            .query(&[("q", query), ("limit", "5")]);

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<SuggestionResponse>().await {
                    Ok(parsed) => parsed.suggestions,
                    Err(e) => {
                        warn!(error = %e, "Malformed geocoding response");
                        Vec::new()
                    }
                }
            }
            Ok(response) => {
                warn!(status = %response.status(), "Geocoding provider error");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Geocoding provider unreachable");
                Vec::new()
            }
        }
    }
}
