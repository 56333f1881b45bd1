/// Primary judge adapter
///
/// Speaks the Judge0-compatible wire protocol: one synchronous POST per
/// execution with base64-encoded payloads, limits passed explicitly,
/// and a numeric status id classifying the run. The service enforces
/// both time and memory limits natively.
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use gavel_common::types::Language;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{BackendError, ExecutionBackend, ExecutionRequest, ExecutionResponse};

/// Status ids as reported by the service.
const STATUS_ACCEPTED: u32 = 3;
const STATUS_WRONG_ANSWER: u32 = 4;
const STATUS_TIME_LIMIT: u32 = 5;
const STATUS_COMPILE_ERROR: u32 = 6;
const STATUS_INTERNAL_ERROR: u32 = 13;

pub struct PrimaryBackend {
    id: String,
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

#[derive(Serialize)]
struct WireRequest {
    source_code: String,
    language_id: u32,
    stdin: String,
    /// Seconds, fractional.
    cpu_time_limit: f64,
    /// Kilobytes.
    memory_limit: u64,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    stdout: Option<String>,
    stderr: Option<String>,
    compile_output: Option<String>,
    /// Seconds as a decimal string, e.g. "0.023".
    time: Option<String>,
    /// Kilobytes.
    memory: Option<u64>,
    exit_code: Option<i64>,
    exit_signal: Option<i32>,
    status: WireStatus,
}

#[derive(Debug, Deserialize)]
struct WireStatus {
    id: u32,
    description: String,
}

impl PrimaryBackend {
    pub fn new(id: &str, client: Client, base_url: &str, auth_token: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
        }
    }

    fn language_id(language: Language) -> u32 {
        match language {
            Language::Python => 71,
            Language::Java => 62,
            Language::Rust => 73,
        }
    }
}

fn decode_field(field: Option<String>, name: &str) -> Result<String, BackendError> {
    match field {
        Some(encoded) => {
            let bytes = general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| {
                    BackendError::MalformedResponse(format!("field '{}' is not base64: {}", name, e))
                })?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        None => Ok(String::new()),
    }
}

fn signal_name(signal: i32) -> String {
    match signal {
        6 => "SIGABRT".to_string(),
        8 => "SIGFPE".to_string(),
        9 => "SIGKILL".to_string(),
        11 => "SIGSEGV".to_string(),
        24 => "SIGXCPU".to_string(),
        n => format!("SIG{}", n),
    }
}

fn parse_time_ms(time: Option<&str>) -> u64 {
    time.and_then(|t| t.trim().parse::<f64>().ok())
        .map(|secs| (secs * 1000.0).round() as u64)
        .unwrap_or(0)
}

/// Translate the wire response into the engine's normalized contract.
/// Kept free of I/O so the mapping table is unit-testable.
fn normalize(wire: WireResponse, time_limit_ms: u64) -> Result<ExecutionResponse, BackendError> {
    match wire.status.id {
        STATUS_COMPILE_ERROR => {
            let output = decode_field(wire.compile_output, "compile_output")?;
            let message = if output.trim().is_empty() {
                "compilation failed".to_string()
            } else {
                output
            };
            Ok(ExecutionResponse {
                compile_error: Some(message),
                ..Default::default()
            })
        }
        STATUS_INTERNAL_ERROR => Err(BackendError::Rejected(wire.status.description)),
        id if id < STATUS_ACCEPTED => Err(BackendError::MalformedResponse(format!(
            "submission still '{}' despite synchronous wait",
            wire.status.description
        ))),
        id => {
            let stdout = decode_field(wire.stdout, "stdout")?;
            let stderr = decode_field(wire.stderr, "stderr")?;
            let mut time_ms = parse_time_ms(wire.time.as_deref());
            let mut exit_signal = wire.exit_signal.map(signal_name);

            // The service reports its own time-limit verdict; surface it
            // as the resource-kill shape the runner classifies on, and
            // never under-report the elapsed time for a killed run.
            if id == STATUS_TIME_LIMIT {
                exit_signal.get_or_insert_with(|| "SIGKILL".to_string());
                time_ms = time_ms.max(time_limit_ms);
            }

            let exit_code = match id {
                STATUS_ACCEPTED | STATUS_WRONG_ANSWER => wire.exit_code.or(Some(0)),
                _ => wire.exit_code,
            };

            Ok(ExecutionResponse {
                stdout,
                stderr,
                exit_code,
                exit_signal,
                time_ms,
                memory_kb: wire.memory,
                compile_error: None,
            })
        }
    }
}

#[async_trait]
impl ExecutionBackend for PrimaryBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn enforces_memory_limit(&self) -> bool {
        true
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResponse, BackendError> {
        let url = format!(
            "{}/submissions?base64_encoded=true&wait=true",
            self.base_url
        );

        let body = WireRequest {
            source_code: general_purpose::STANDARD.encode(&request.code),
            language_id: Self::language_id(request.language),
            stdin: general_purpose::STANDARD.encode(&request.stdin),
            cpu_time_limit: request.time_limit_ms as f64 / 1000.0,
            memory_limit: request.memory_limit_kb,
        };

        let mut http_request = self.client.post(&url).json(&body);
        if let Some(token) = &self.auth_token {
            http_request = http_request.header("X-Auth-Token", token);
        }

        let response = http_request
            .send()
            .await
            .map_err(BackendError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Rejected(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;

        normalize(wire, request.time_limit_ms)
    }

    async fn probe(&self) -> Result<(), BackendError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(BackendError::from_reqwest)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::Rejected(format!(
                "health probe returned HTTP {}",
                response.status()
            )))
        }
    }
}
