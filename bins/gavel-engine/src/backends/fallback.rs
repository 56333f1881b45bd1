/// Fallback judge adapter
///
/// Speaks a Piston-compatible wire protocol: plain JSON, separate
/// compile and run stages, POSIX signal names. The service reports peak
/// memory but cannot enforce a memory limit, so the adapter surfaces the
/// reported figure and leaves enforcement to the runner's post-hoc
/// check.
use async_trait::async_trait;
use gavel_common::types::Language;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{BackendError, ExecutionBackend, ExecutionRequest, ExecutionResponse};

pub struct FallbackBackend {
    id: String,
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    language: &'a str,
    version: &'a str,
    files: Vec<WireFile<'a>>,
    stdin: &'a str,
    /// Milliseconds.
    run_timeout: u64,
    compile_timeout: u64,
}

#[derive(Serialize)]
struct WireFile<'a> {
    name: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    compile: Option<WireStage>,
    run: Option<WireStage>,
}

#[derive(Debug, Deserialize)]
struct WireStage {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    code: Option<i64>,
    signal: Option<String>,
    /// Milliseconds.
    wall_time: Option<u64>,
    /// Bytes.
    memory: Option<u64>,
}

impl FallbackBackend {
    pub fn new(id: &str, client: Client, base_url: &str) -> Self {
        Self {
            id: id.to_string(),
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn language_name(language: Language) -> &'static str {
        match language {
            Language::Python => "python",
            Language::Java => "java",
            Language::Rust => "rust",
        }
    }

    fn file_name(language: Language) -> &'static str {
        match language {
            Language::Python => "main.py",
            Language::Java => "Main.java",
            Language::Rust => "main.rs",
        }
    }
}

/// Translate the two-stage wire response into the normalized contract.
fn normalize(wire: WireResponse) -> Result<ExecutionResponse, BackendError> {
    // A failed compile stage means the code never ran.
    if let Some(compile) = &wire.compile {
        if compile.code.is_some() && compile.code != Some(0) {
            let message = if compile.stderr.trim().is_empty() {
                compile.stdout.clone()
            } else {
                compile.stderr.clone()
            };
            return Ok(ExecutionResponse {
                compile_error: Some(if message.trim().is_empty() {
                    "compilation failed".to_string()
                } else {
                    message
                }),
                ..Default::default()
            });
        }
    }

    let run = wire.run.ok_or_else(|| {
        BackendError::MalformedResponse("response carries neither run stage nor compile failure".to_string())
    })?;

    Ok(ExecutionResponse {
        stdout: run.stdout,
        stderr: run.stderr,
        exit_code: run.code,
        exit_signal: run.signal,
        time_ms: run.wall_time.unwrap_or(0),
        memory_kb: run.memory.map(|bytes| bytes / 1024),
        compile_error: None,
    })
}

#[async_trait]
impl ExecutionBackend for FallbackBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn enforces_memory_limit(&self) -> bool {
        false
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResponse, BackendError> {
        let url = format!("{}/api/v2/execute", self.base_url);

        let body = WireRequest {
            language: Self::language_name(request.language),
            version: "*",
            files: vec![WireFile {
                name: Self::file_name(request.language),
                content: &request.code,
            }],
            stdin: &request.stdin,
            run_timeout: request.time_limit_ms,
            compile_timeout: 10_000,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
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

        normalize(wire)
    }

    async fn probe(&self) -> Result<(), BackendError> {
        let url = format!("{}/api/v2/runtimes", self.base_url);
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
                "runtime probe returned HTTP {}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(code: Option<i64>) -> WireStage {
        WireStage {
            stdout: String::new(),
            stderr: String::new(),
            code,
            signal: None,
            wall_time: None,
            memory: None,
        }
    }

    #[test]
    fn test_normalize_successful_run() {
        let mut run = stage(Some(0));
        run.stdout = "6\n".to_string();
        run.wall_time = Some(12);
        run.memory = Some(4_194_304);

        let normalized = normalize(WireResponse {
            compile: Some(stage(Some(0))),
            run: Some(run),
        })
        .unwrap();

        assert_eq!(normalized.stdout, "6\n");
        assert_eq!(normalized.exit_code, Some(0));
        assert_eq!(normalized.time_ms, 12);
        assert_eq!(normalized.memory_kb, Some(4096));
    }

    #[test]
    fn test_normalize_compile_failure_short_circuits_run() {
        let mut compile = stage(Some(1));
        compile.stderr = "Main.java:3: error: ';' expected".to_string();

        let normalized = normalize(WireResponse {
            compile: Some(compile),
            run: None,
        })
        .unwrap();

        assert_eq!(
            normalized.compile_error.as_deref(),
            Some("Main.java:3: error: ';' expected")
        );
    }

    #[test]
    fn test_normalize_signal_passthrough() {
        let mut run = stage(None);
        run.signal = Some("SIGSEGV".to_string());
        run.stderr = "crash".to_string();

        let normalized = normalize(WireResponse {
            compile: None,
            run: Some(run),
        })
        .unwrap();

        assert_eq!(normalized.exit_signal.as_deref(), Some("SIGSEGV"));
    }

    #[test]
    fn test_normalize_missing_run_stage_is_malformed() {
        let err = normalize(WireResponse {
            compile: Some(stage(Some(0))),
            run: None,
        })
        .unwrap_err();

        assert!(matches!(err, BackendError::MalformedResponse(_)));
    }

    #[test]
    fn test_memory_reported_in_kb() {
        let mut run = stage(Some(0));
        run.memory = Some(1536);

        let normalized = normalize(WireResponse {
            compile: None,
            run: Some(run),
        })
        .unwrap();

        assert_eq!(normalized.memory_kb, Some(1));
    }
}
