//! Hosted Multimodal Model Backend
//!
//! Uploads the staged image to the model service, requests structured
//! output against the license schema, and parses the returned JSON into a
//! field map. The uploaded copy is deleted once the call finishes,
//! whether extraction succeeded or not.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use super::{BackendFault, BackendOutput, ExtractBackend, FieldMap, StagedImage};
use crate::schema::FieldSchema;

/// Hosted-model service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostedModelConfig {
    /// Service base URL
    pub base_url: String,
    /// Model name
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for HostedModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            timeout_secs: 120,
        }
    }
}

const EXTRACTION_PROMPT: &str = "Analyze the attached Myanmar Driving License image, which may be \
    blurry or at an angle. Extract ONLY the specified information into the provided JSON schema. \
    Pay close attention to the Burmese labels for 'No.', 'Name', 'NRC no', 'DOB', 'Blood Type', \
    and 'Valid up to'.";

/// Handle for the remote uploaded copy
#[derive(Debug, Deserialize)]
struct UploadedFile {
    name: String,
    uri: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: UploadedFile,
}

/// Extraction backend calling a hosted multimodal model with a
/// structured-output contract
pub struct HostedModelBackend {
    config: HostedModelConfig,
    api_key: String,
    schema: FieldSchema,
    http: reqwest::Client,
    rt: Runtime,
}

impl HostedModelBackend {
    /// Construct the backend, failing fast when the API key is missing or
    /// the client cannot be built
    pub fn new(config: HostedModelConfig, schema: FieldSchema) -> Result<Self, BackendFault> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| BackendFault::Unavailable(format!("{} is not set", config.api_key_env)))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendFault::Unavailable(format!("failed to build HTTP client: {e}")))?;

        let rt = Runtime::new()
            .map_err(|e| BackendFault::Unavailable(format!("failed to start runtime: {e}")))?;

        Ok(Self {
            config,
            api_key,
            schema,
            http,
            rt,
        })
    }

    async fn upload(&self, bytes: &[u8], mime: &str) -> Result<UploadedFile, BackendFault> {
        let url = format!(
            "{}/upload/v1beta/files?key={}",
            self.config.base_url, self.api_key
        );

        let response = self
            .http
            .post(&url)
            .header("X-Goog-Upload-Protocol", "raw")
            .header(reqwest::header::CONTENT_TYPE, mime)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| BackendFault::Unavailable(format!("upload request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(BackendFault::Extraction(format!(
                "upload rejected with status {}",
                response.status()
            )));
        }

        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| BackendFault::Extraction(format!("malformed upload response: {e}")))?;

        debug!(file = %parsed.file.name, "image uploaded");
        Ok(parsed.file)
    }

    async fn generate(&self, file: &UploadedFile, mime: &str) -> Result<FieldMap, BackendFault> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.config.base_url, self.config.model, self.api_key
        );

        let body = json!({
            "contents": [{
                "parts": [
                    { "text": EXTRACTION_PROMPT },
                    { "file_data": { "mime_type": mime, "file_uri": file.uri } },
                ],
            }],
            "generationConfig": {
                "response_mime_type": "application/json",
                "response_schema": response_schema(&self.schema),
            },
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendFault::Unavailable(format!("model request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(BackendFault::Extraction(format!(
                "model returned status {}",
                response.status()
            )));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BackendFault::Extraction(format!("malformed model response: {e}")))?;

        let text = value["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| {
                BackendFault::Extraction("response carries no structured text part".to_string())
            })?;

        parse_fields(text)
    }

    async fn delete(&self, file: &UploadedFile) -> Result<(), BackendFault> {
        let url = format!(
            "{}/v1beta/{}?key={}",
            self.config.base_url, file.name, self.api_key
        );

        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(|e| BackendFault::Unavailable(format!("delete request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(BackendFault::Extraction(format!(
                "delete rejected with status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

impl ExtractBackend for HostedModelBackend {
    fn name(&self) -> &'static str {
        "hosted-model"
    }

    fn extract(&mut self, image: &StagedImage<'_>) -> Result<BackendOutput, BackendFault> {
        let mime = sniff_mime(image.bytes)?;
        info!(model = %self.config.model, "running hosted extraction");

        self.rt.block_on(async {
            let uploaded = self.upload(image.bytes, mime).await?;
            let result = self.generate(&uploaded, mime).await;

            // the uploaded copy is released on success and failure alike
            if let Err(e) = self.delete(&uploaded).await {
                warn!("failed to delete uploaded image: {e}");
            }

            Ok(BackendOutput {
                fields: result?,
                regions: None,
            })
        })
    }
}

/// Accepts JPEG and PNG photographs only
fn sniff_mime(bytes: &[u8]) -> Result<&'static str, BackendFault> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Ok("image/jpeg")
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Ok("image/png")
    } else {
        Err(BackendFault::Extraction(
            "unsupported image format (expected JPEG or PNG)".to_string(),
        ))
    }
}

/// Structured-output contract built from the field schema
fn response_schema(schema: &FieldSchema) -> serde_json::Value {
    let mut properties = serde_json::Map::new();
    for field in schema.fields() {
        properties.insert(
            field.name.to_string(),
            json!({ "type": "STRING", "description": field.description }),
        );
    }

    let names: Vec<&str> = schema.fields().iter().map(|f| f.name).collect();
    json!({
        "type": "OBJECT",
        "properties": properties,
        "required": names,
        "propertyOrdering": names,
    })
}

/// Parse the model's JSON text into a field map. Values are never null:
/// absent text becomes the empty string
fn parse_fields(text: &str) -> Result<FieldMap, BackendFault> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| BackendFault::Extraction(format!("model returned malformed JSON: {e}")))?;

    let Some(object) = value.as_object() else {
        return Err(BackendFault::Extraction(
            "model output is not a JSON object".to_string(),
        ));
    };

    let mut fields = FieldMap::new();
    for (key, value) in object {
        let text = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        };
        fields.insert(key.clone(), text);
    }
    Ok(fields)
}
