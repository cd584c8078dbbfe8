use serde::Deserialize;
use tracing::error;
use url::Url;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: Coordinates,
}

/// Resolves a place name to coordinates through a Google-style geocoding
/// endpoint. One request, no retries; failures surface as localized errors.
#[derive(Clone)]
pub struct GeocodeService {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeocodeService {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            base_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub async fn lookup(&self, address: &str) -> Result<Coordinates, AppError> {
        if self.api_key.is_empty() {
            return Err(AppError::Config(
                "GEOCODING_API_KEY is not set".to_string(),
            ));
        }

        let mut url = Url::parse(&format!("{}/maps/api/geocode/json", self.base_url))
            .map_err(|err| AppError::Config(format!("invalid geocoding base url: {err}")))?;
        url.query_pairs_mut()
            .append_pair("address", address)
            .append_pair("key", &self.api_key)
            .append_pair("language", "ja");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| AppError::Upstream(format!("地図サービスへの接続に失敗しました: {err}")))?;

        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "地図サービスへのリクエストに失敗しました: {}",
                response.status()
            )));
        }

        let payload: GeocodeResponse = response
            .json()
            .await
            .map_err(|err| AppError::Upstream(format!("地図サービスの応答を読み取れませんでした: {err}")))?;

        if payload.status != "OK" || payload.results.is_empty() {
            error!(
                status = %payload.status,
                message = payload.error_message.as_deref().unwrap_or("-"),
                "geocoding rejected the address"
            );
            return Err(AppError::Upstream(format!(
                "「{address}」の場所が見つかりませんでした"
            )));
        }

        Ok(payload.results[0].geometry.location)
    }
}
