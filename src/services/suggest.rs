use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use url::Url;

use crate::error::AppError;

/// Fixed fallback list served outside production, and whenever the real
/// provider is not worth bothering (e.g. in the BDD harness).
const MOCK_SUGGESTIONS: &[&str] = &[
    "予備のバッテリー",
    "トラベルピロー",
    "ウェットティッシュ",
    "常備薬",
    "エコバッグ",
];

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct SuggestionItems {
    #[serde(default)]
    items: Vec<String>,
}

/// Asks a generative-language endpoint for packing items specific to the
/// trip. Single request, no retry; a non-2xx answer or an unparseable body
/// is an upstream failure.
#[derive(Clone)]
pub struct SuggestionService {
    base_url: String,
    api_key: String,
    mock: bool,
    client: reqwest::Client,
}

impl SuggestionService {
    pub fn new(base_url: String, api_key: String, mock: bool) -> Self {
        Self {
            base_url,
            api_key,
            mock,
            client: reqwest::Client::new(),
        }
    }

    /// Mock mode answers from the static list and must not consume quota.
    pub fn is_mock(&self) -> bool {
        self.mock
    }

    pub fn mock_suggestions(&self) -> Vec<String> {
        MOCK_SUGGESTIONS.iter().map(|s| s.to_string()).collect()
    }

    pub async fn request_suggestions(
        &self,
        location_name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        existing_items: &[String],
    ) -> Result<Vec<String>, AppError> {
        if self.api_key.is_empty() {
            return Err(AppError::Config("AI_API_KEY is not set".to_string()));
        }

        let prompt = build_prompt(location_name, start_date, end_date, existing_items);

        let mut url = Url::parse(&format!(
            "{}/v1beta/models/gemini-1.5-flash-latest:generateContent",
            self.base_url
        ))
        .map_err(|err| AppError::Config(format!("invalid AI base url: {err}")))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);

        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseMimeType": "application/json" },
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|err| AppError::Upstream(format!("AIへの接続に失敗しました: {err}")))?;

        if !response.status().is_success() {
            error!(status = %response.status(), "generative API returned an error");
            return Err(AppError::Upstream(
                "AIからの応答取得に失敗しました".to_string(),
            ));
        }

        let payload: GenerateResponse = response
            .json()
            .await
            .map_err(|err| AppError::Upstream(format!("AIの応答を読み取れませんでした: {err}")))?;

        let text = payload
            .candidates
            .first()
            .and_then(|candidate| candidate.content.parts.first())
            .map(|part| part.text.as_str())
            .ok_or_else(|| AppError::Upstream("AIの応答が空でした".to_string()))?;

        let parsed: SuggestionItems = serde_json::from_str(text)
            .map_err(|err| AppError::Upstream(format!("AIの応答を解析できませんでした: {err}")))?;

        Ok(parsed.items)
    }
}

fn build_prompt(
    location_name: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
    existing_items: &[String],
) -> String {
    let existing = if existing_items.is_empty() {
        String::new()
    } else {
        format!(
            "現在のリストには「{}」が既にあります。これらを除外して提案してください。",
            existing_items.join("、")
        )
    };
    format!(
        "{location_name}へ{start_date}から{end_date}まで旅行します。\
         この旅行に特有の持ち物を10個提案してください。{existing}\
         回答は[\"アイテム1\", \"アイテム2\", ...]の形式のJSON配列で、キーは\"items\"としてください。"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_existing_items_once_present() {
        let start: NaiveDate = "2025-07-10".parse().unwrap();
        let end: NaiveDate = "2025-07-12".parse().unwrap();
        let prompt = build_prompt("京都", start, end, &["服".into(), "タオル".into()]);
        assert!(prompt.contains("京都"));
        assert!(prompt.contains("服、タオル"));

        let bare = build_prompt("京都", start, end, &[]);
        assert!(!bare.contains("既にあります"));
    }
}
