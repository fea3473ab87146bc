use crate::constants::{defaults, endpoints, models};
use crate::conversation::{Citation, MediaPayload, Role, Segment};
use crate::error::AntharaError;
use crate::llm::traits::*;
use futures::channel::mpsc;
use serde_json::Value;

pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    text_model: String,
    classifier_model: String,
    image_model: String,
    edit_model: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: endpoints::GEMINI_BASE_URL.to_string(),
            text_model: models::TEXT_MODEL.to_string(),
            classifier_model: models::CLASSIFIER_MODEL.to_string(),
            image_model: models::IMAGE_MODEL.to_string(),
            edit_model: models::EDIT_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_text_model(mut self, model: impl Into<String>) -> Self {
        self.text_model = model.into();
        self
    }

    pub fn with_classifier_model(mut self, model: impl Into<String>) -> Self {
        self.classifier_model = model.into();
        self
    }

    pub fn with_image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = model.into();
        self
    }

    pub fn with_edit_model(mut self, model: impl Into<String>) -> Self {
        self.edit_model = model.into();
        self
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        let model = model.trim();
        let model_path = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        format!("{}/{}:{}", self.base_url, model_path, method)
    }

    async fn post_json(&self, url: &str, body: &Value, label: &str) -> Result<Value, AntharaError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;

        if !status.is_success() {
            return Err(api_error(label, status, &response_text));
        }

        serde_json::from_str(&response_text)
            .map_err(|e| AntharaError::Provider(format!("Failed to parse {label} response: {e}")))
    }

    async fn generate_with_model(&self, prompt: &str) -> Result<MediaPayload, AntharaError> {
        let url = self.endpoint(&self.image_model, "generateContent");
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] },
        });
        let response = self.post_json(&url, &body, "Gemini image").await?;
        check_blocked(&response)?;
        segments_from_response(&response)
            .into_iter()
            .find_map(|segment| match segment {
                Segment::Media(media) => Some(media),
                Segment::Text(_) => None,
            })
            .ok_or_else(|| AntharaError::Provider("The model returned no image".into()))
    }
}

#[async_trait::async_trait]
impl LlmClient for GeminiClient {
    async fn stream_answer(
        &self,
        request: &GenerateRequest,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>, AntharaError> {
        let url = format!(
            "{}?alt=sse",
            self.endpoint(&self.text_model, "streamGenerateContent")
        );
        let body = build_generate_body(request);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(api_error("Gemini", status, &text));
        }

        let (tx, rx) = mpsc::unbounded();

        let mut stream = response.bytes_stream();
        tokio::spawn(async move {
            use futures::StreamExt;
            let mut sse = SseBuffer::default();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.unbounded_send(StreamEvent::Error(e.to_string()));
                        return;
                    }
                };

                for data in sse.push(&chunk) {
                    if !forward_payload(&tx, &data) {
                        return;
                    }
                }
            }

            // Last event may arrive without a trailing newline
            if let Some(data) = sse.finish() {
                if !forward_payload(&tx, &data) {
                    return;
                }
            }

            let _ = tx.unbounded_send(StreamEvent::Done);
        });

        Ok(rx)
    }

    async fn classify(
        &self,
        instruction: &str,
        input: &str,
        schema: &Value,
    ) -> Result<String, AntharaError> {
        let url = self.endpoint(&self.classifier_model, "generateContent");
        let body = serde_json::json!({
            "systemInstruction": { "parts": [{ "text": instruction }] },
            "contents": [{ "role": "user", "parts": [{ "text": input }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": schema,
            },
        });

        let response = self.post_json(&url, &body, "Gemini classifier").await?;
        check_blocked(&response)?;
        Ok(text_from_response(&response))
    }

    async fn generate_image(&self, prompt: &str) -> Result<MediaPayload, AntharaError> {
        if !self.image_model.starts_with("imagen") {
            return self.generate_with_model(prompt).await;
        }

        let url = self.endpoint(&self.image_model, "predict");
        let body = serde_json::json!({
            "instances": [{ "prompt": prompt }],
            "parameters": {
                "sampleCount": 1,
                "outputMimeType": defaults::IMAGE_MIME_TYPE,
            },
        });

        let response = self.post_json(&url, &body, "Imagen").await?;
        extract_prediction(&response)
    }

    async fn edit_image(
        &self,
        image: &MediaPayload,
        instruction: &str,
    ) -> Result<Vec<Segment>, AntharaError> {
        let url = self.endpoint(&self.edit_model, "generateContent");
        let body = serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "inlineData": { "mimeType": image.mime_type, "data": image.data } },
                    { "text": instruction },
                ],
            }],
            "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] },
        });

        let response = self.post_json(&url, &body, "Gemini image edit").await?;
        check_blocked(&response)?;
        Ok(segments_from_response(&response))
    }
}

fn api_error(label: &str, status: reqwest::StatusCode, body: &str) -> AntharaError {
    // Prefer the API's own message over the raw JSON envelope
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string());
    AntharaError::Provider(format!("{label} API error ({status}): {message}"))
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

fn segment_part(segment: &Segment) -> Value {
    match segment {
        Segment::Text(text) => serde_json::json!({ "text": text }),
        Segment::Media(media) => serde_json::json!({
            "inlineData": { "mimeType": media.mime_type, "data": media.data }
        }),
    }
}

fn build_generate_body(request: &GenerateRequest) -> Value {
    let contents: Vec<Value> = request
        .history
        .iter()
        .map(|turn| {
            serde_json::json!({
                "role": role_label(turn.role),
                "parts": turn.segments.iter().map(segment_part).collect::<Vec<_>>(),
            })
        })
        .collect();

    let mut body = serde_json::json!({ "contents": contents });

    if !request.system_instruction.is_empty() {
        body["systemInstruction"] = serde_json::json!({
            "parts": [{ "text": request.system_instruction }]
        });
    }

    if request.web_grounding {
        body["tools"] = serde_json::json!([{ "google_search": {} }]);
    }

    body
}

fn check_blocked(response: &Value) -> Result<(), AntharaError> {
    if let Some(reason) = response
        .get("promptFeedback")
        .and_then(|f| f.get("blockReason"))
        .and_then(Value::as_str)
    {
        return Err(AntharaError::Provider(format!("Request blocked: {reason}")));
    }
    Ok(())
}

fn first_candidate_parts(response: &Value) -> Vec<Value> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn text_from_response(response: &Value) -> String {
    first_candidate_parts(response)
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect()
}

fn segments_from_response(response: &Value) -> Vec<Segment> {
    first_candidate_parts(response)
        .iter()
        .filter_map(|part| {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                return (!text.trim().is_empty()).then(|| Segment::text(text));
            }
            let inline = part.get("inlineData").or_else(|| part.get("inline_data"))?;
            let data = inline.get("data").and_then(Value::as_str)?;
            if data.is_empty() {
                return None;
            }
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or("image/png");
            Some(Segment::Media(MediaPayload::new(mime_type, data)))
        })
        .collect()
}

fn citations_from_response(response: &Value) -> Vec<Citation> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(|c| c.get("groundingMetadata"))
        .and_then(|g| g.get("groundingChunks"))
        .and_then(Value::as_array)
        .map(|chunks| {
            chunks
                .iter()
                .filter_map(|chunk| {
                    let web = chunk.get("web")?;
                    // A source without a URI cannot be linked
                    let uri = web.get("uri").and_then(Value::as_str)?;
                    if uri.trim().is_empty() {
                        return None;
                    }
                    let title = web.get("title").and_then(Value::as_str).unwrap_or_default();
                    Some(Citation::new(uri, title))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Splits a server-sent event byte stream into `data:` payloads.
///
/// Bytes are buffered raw so a multi-byte character split across network
/// chunks survives.
#[derive(Debug, Default)]
pub(crate) struct SseBuffer {
    buffer: Vec<u8>,
}

impl SseBuffer {
    /// Append a chunk and return the payloads of every completed line.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            payloads.extend(sse_data(&line));
        }
        payloads
    }

    /// Payload of whatever is left once the byte stream has ended.
    pub(crate) fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        sse_data(&rest)
    }
}

fn sse_data(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim().strip_prefix("data:")?.trim();
    (!data.is_empty()).then(|| data.to_string())
}

/// Send the events for one payload. Returns false once the stream is over,
/// either because it ended or because the consumer went away.
fn forward_payload(tx: &mpsc::UnboundedSender<StreamEvent>, data: &str) -> bool {
    if data == "[DONE]" {
        let _ = tx.unbounded_send(StreamEvent::Done);
        return false;
    }
    for event in parse_sse_payload(data) {
        let terminal = matches!(event, StreamEvent::Error(_));
        if tx.unbounded_send(event).is_err() || terminal {
            return false;
        }
    }
    true
}

/// Turn one SSE `data:` payload into stream events.
pub(crate) fn parse_sse_payload(data: &str) -> Vec<StreamEvent> {
    let event: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!("Skipping unparseable stream payload: {}", e);
            return Vec::new();
        }
    };

    if let Some(message) = event
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
    {
        return vec![StreamEvent::Error(message.to_string())];
    }

    if let Err(e) = check_blocked(&event) {
        return vec![StreamEvent::Error(e.to_string())];
    }

    let text = text_from_response(&event);
    let sources = citations_from_response(&event);
    if text.is_empty() && sources.is_empty() {
        return Vec::new();
    }
    vec![StreamEvent::Delta { text, sources }]
}

fn extract_prediction(response: &Value) -> Result<MediaPayload, AntharaError> {
    let predictions = response
        .get("predictions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for row in predictions {
        let encoded = row
            .get("bytesBase64Encoded")
            .or_else(|| row.get("bytes_base64_encoded"))
            .and_then(Value::as_str);
        if let Some(encoded) = encoded.filter(|e| !e.is_empty()) {
            let mime_type = row
                .get("mimeType")
                .or_else(|| row.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or(defaults::IMAGE_MIME_TYPE);
            return Ok(MediaPayload::new(mime_type, encoded));
        }
    }

    Err(AntharaError::Provider(
        "Image generation returned no image (the prompt may have been filtered)".into(),
    ))
}
