use std::io::Cursor;

use async_trait::async_trait;
use base64::Engine as _;
use image::{ImageFormat, RgbImage};

use crate::errors::{TileGridError, TileGridResult};
use crate::vision::provider::VisionClassifier;
use crate::vision::types::{CallConfig, ChatMessage};

/// Chat-completions client for any OpenAI-compatible endpoint with vision input.
pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    call: CallConfig,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String, call: CallConfig) -> Self {
        Self {
            id,
            api_base,
            api_key,
            call,
            client: reqwest::Client::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.call.model
    }
}

/// PNG-encode an image as a `data:` URL.
pub fn png_data_url(image: &RgbImage) -> TileGridResult<String> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(buf.into_inner());
    Ok(format!("data:image/png;base64,{encoded}"))
}

/// First balanced `{...}` object in `text`, parsed as JSON. Models often wrap
/// the object in prose or code fences.
pub fn extract_json_object(text: &str) -> TileGridResult<serde_json::Value> {
    let start = text
        .find('{')
        .ok_or_else(|| TileGridError::ClassifierFormat("no '{' in model output".into()))?;
    let mut depth = 0usize;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..start + offset + 1];
                    return serde_json::from_str(candidate)
                        .map_err(|e| TileGridError::ClassifierFormat(format!("invalid JSON object: {e}")));
                }
            }
            _ => {}
        }
    }
    Err(TileGridError::ClassifierFormat("unbalanced JSON object in model output".into()))
}

/// Replace inline images with a marker so request bodies can be logged.
fn sanitized_for_log(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) == Some("image_url") {
                    if let Some(url) = part.get_mut("image_url").and_then(|u| u.get_mut("url")) {
                        *url = serde_json::Value::String("<omitted_base64_image>".to_string());
                    }
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}

#[async_trait]
impl VisionClassifier for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn classify(
        &self,
        images: &[RgbImage],
        instructions: &str,
    ) -> TileGridResult<serde_json::Value> {
        let urls = images.iter().map(png_data_url).collect::<TileGridResult<Vec<_>>>()?;
        let messages = vec![ChatMessage::user_with_images(instructions, urls)];
        let body = serde_json::json!({
            "model": self.call.model,
            "messages": &messages,
            "stream": false,
            "temperature": self.call.temperature,
            "response_format": { "type": "json_object" },
        });

        tracing::debug!(
            provider = %self.id,
            model = %self.call.model,
            images = images.len(),
            "sending vision request"
        );
        tracing::trace!(body = %sanitized_for_log(&body), "request body (base64 omitted)");

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(TileGridError::Vision(format!("{status}: {err_body}")));
        }

        let json: serde_json::Value = response.json().await?;
        let content = json["choices"][0]["message"]["content"].as_str().unwrap_or("");
        tracing::debug!(provider = %self.id, content_len = content.len(), "vision response received");
        extract_json_object(content)
    }
}
