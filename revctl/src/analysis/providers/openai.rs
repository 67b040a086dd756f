//! OpenAI adapter using the Batch API, with per-item fallback.
//!
//! Batch path: build a JSONL file of chat-completion requests, upload it
//! with purpose `batch`, create a batch against `/v1/chat/completions`,
//! poll until a terminal status, then download and align the output
//! lines. Any failure at any stage downgrades the whole call to
//! per-item `analyze_single` requests, so a batch call always returns
//! one response value per input.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::analysis::providers::{Provider, ProgressFn, ReasoningEffort, compose_prompt};
use crate::config::OpenAiConfig;
use crate::errors::Result;

pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    poll_interval: Duration,
    poll_deadline: Duration,
}

impl OpenAiProvider {
    pub fn new(api_key: String, config: &OpenAiConfig) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            poll_deadline: Duration::from_secs(config.poll_deadline_seconds),
        })
    }

    fn request_body(model: &str, full_prompt: &str, reasoning: Option<ReasoningEffort>) -> Value {
        let mut body = json!({
            "model": model,
            "messages": [{"role": "user", "content": full_prompt}],
        });
        if let Some(effort) = reasoning {
            body["reasoning_effort"] = Value::String(effort.as_str().to_string());
        }
        body
    }

    /// Run the batch state machine. `Ok(None)` means "downgrade to
    /// per-item calls".
    async fn try_batch(
        &self,
        inputs: &[String],
        prompt: &str,
        model: &str,
        reasoning: Option<ReasoningEffort>,
        completion_window: &str,
    ) -> Result<Option<Vec<Value>>> {
        let jsonl = inputs
            .iter()
            .enumerate()
            .map(|(index, input)| {
                json!({
                    "custom_id": index.to_string(),
                    "method": "POST",
                    "url": "/v1/chat/completions",
                    "body": Self::request_body(model, &compose_prompt(prompt, input), reasoning),
                })
                .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n");

        // Upload the request file.
        let part = reqwest::multipart::Part::bytes(jsonl.into_bytes())
            .file_name("requests.jsonl")
            .mime_str("application/jsonl")?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", "batch")
            .part("file", part);

        let upload = self
            .http
            .post(format!("{}/v1/files", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await;
        let Ok(upload) = upload else {
            return Ok(None);
        };
        if !upload.status().is_success() {
            warn!(status = %upload.status(), "Batch file upload rejected");
            return Ok(None);
        }
        let Ok(file) = upload.json::<Value>().await else {
            return Ok(None);
        };
        let Some(input_file_id) = file.get("id").and_then(Value::as_str) else {
            return Ok(None);
        };

        // Create the batch.
        let create = self
            .http
            .post(format!("{}/v1/batches", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "input_file_id": input_file_id,
                "endpoint": "/v1/chat/completions",
                "completion_window": completion_window,
            }))
            .send()
            .await;
        let Ok(create) = create else {
            return Ok(None);
        };
        if !create.status().is_success() {
            warn!(status = %create.status(), "Batch creation rejected");
            return Ok(None);
        }
        let Ok(mut batch) = create.json::<Value>().await else {
            return Ok(None);
        };
        let Some(batch_id) = batch.get("id").and_then(Value::as_str).map(str::to_string) else {
            return Ok(None);
        };

        // Poll until terminal or deadline.
        let deadline = Instant::now() + self.poll_deadline;
        while Instant::now() < deadline {
            tokio::time::sleep(self.poll_interval).await;
            let poll = self
                .http
                .get(format!("{}/v1/batches/{batch_id}", self.base_url))
                .bearer_auth(&self.api_key)
                .send()
                .await;
            let Ok(poll) = poll else {
                break;
            };
            if !poll.status().is_success() {
                break;
            }
            let Ok(current) = poll.json::<Value>().await else {
                break;
            };
            batch = current;
            match batch.get("status").and_then(Value::as_str) {
                Some("completed" | "failed" | "cancelled") => break,
                // validating / in_progress keep polling
                _ => {}
            }
        }

        if batch.get("status").and_then(Value::as_str) != Some("completed") {
            debug!(status = ?batch.get("status"), "Batch did not complete");
            return Ok(None);
        }
        let Some(output_file_id) = batch.get("output_file_id").and_then(Value::as_str) else {
            return Ok(None);
        };

        // Download the output file.
        let download = self
            .http
            .get(format!("{}/v1/files/{output_file_id}/content", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await;
        let Ok(download) = download else {
            return Ok(None);
        };
        if !download.status().is_success() {
            return Ok(None);
        }
        let Ok(content) = download.text().await else {
            return Ok(None);
        };

        Ok(Some(Self::align_outputs(&content, inputs.len())))
    }

    /// Align output lines with inputs via `custom_id`; unmatched lines
    /// fill remaining slots positionally, and anything still missing gets
    /// an error marker so the result stays `|inputs|` long.
    fn align_outputs(content: &str, input_count: usize) -> Vec<Value> {
        let mut slots: Vec<Option<Value>> = vec![None; input_count];
        let mut unmatched = Vec::new();

        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let value: Value =
                serde_json::from_str(line).unwrap_or_else(|_| json!({ "raw": line }));
            let index = value
                .get("custom_id")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<usize>().ok());
            match index {
                Some(i) if i < slots.len() && slots[i].is_none() => slots[i] = Some(value),
                _ => unmatched.push(value),
            }
        }

        let mut spill = unmatched.into_iter();
        slots
            .into_iter()
            .map(|slot| {
                slot.or_else(|| spill.next())
                    .unwrap_or_else(|| json!({"error": "missing batch output"}))
            })
            .collect()
    }

    async fn fallback_single(
        &self,
        inputs: &[String],
        prompt: &str,
        model: &str,
        reasoning: Option<ReasoningEffort>,
        progress: Option<ProgressFn>,
    ) -> Result<Vec<Value>> {
        let mut outputs = Vec::with_capacity(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            let output = self
                .analyze_single(&compose_prompt(prompt, input), model, reasoning)
                .await?;
            outputs.push(output);
            if let Some(progress) = &progress {
                progress(index + 1, inputs.len());
            }
        }
        Ok(outputs)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn analyze_batch(
        &self,
        inputs: &[String],
        prompt: &str,
        model: &str,
        reasoning: Option<ReasoningEffort>,
        completion_window: &str,
        progress: Option<ProgressFn>,
    ) -> Result<Vec<Value>> {
        match self
            .try_batch(inputs, prompt, model, reasoning, completion_window)
            .await?
        {
            Some(outputs) => Ok(outputs),
            None => {
                warn!("Falling back to per-item requests");
                self.fallback_single(inputs, prompt, model, reasoning, progress)
                    .await
            }
        }
    }

    /// Per-item chat completion. Transport and decode failures come back
    /// as `{"error": ...}` values so batch alignment is preserved and the
    /// error lands on the individual result row.
    async fn analyze_single(
        &self,
        full_prompt: &str,
        model: &str,
        reasoning: Option<ReasoningEffort>,
    ) -> Result<Value> {
        let body = Self::request_body(model, full_prompt, reasoning);
        let send = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await;
        match send {
            Ok(response) => match response.json::<Value>().await {
                Ok(value) => Ok(value),
                Err(e) => Ok(json!({"error": e.to_string()})),
            },
            Err(e) => Ok(json!({"error": e.to_string()})),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_sets_reasoning_effort_when_present() {
        let body = OpenAiProvider::request_body("gpt-5", "p", Some(ReasoningEffort::High));
        assert_eq!(body["reasoning_effort"], "high");
        let body = OpenAiProvider::request_body("gpt-5", "p", None);
        assert!(body.get("reasoning_effort").is_none());
    }

    #[test]
    fn align_outputs_reorders_by_custom_id() {
        let content = concat!(
            "{\"custom_id\":\"1\",\"response\":{\"body\":{\"ok\":1}}}\n",
            "{\"custom_id\":\"0\",\"response\":{\"body\":{\"ok\":0}}}\n",
        );
        let outputs = OpenAiProvider::align_outputs(content, 2);
        assert_eq!(outputs[0]["custom_id"], "0");
        assert_eq!(outputs[1]["custom_id"], "1");
    }

    #[test]
    fn align_outputs_fills_missing_slots() {
        let content = "{\"custom_id\":\"0\",\"ok\":true}\n";
        let outputs = OpenAiProvider::align_outputs(content, 2);
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[1]["error"], "missing batch output");
    }

    #[test]
    fn align_outputs_wraps_unparsable_lines() {
        let outputs = OpenAiProvider::align_outputs("not json\n", 1);
        assert_eq!(outputs[0]["raw"], "not json");
    }
}
