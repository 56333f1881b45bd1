/// Mock backend
///
/// In-process scripted adapter. Drives every integration test (no
/// network, no sandbox) and doubles as a local-development backend via
/// `kind = "mock"` in the engine config, where it echoes stdin.
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{BackendError, ExecutionBackend, ExecutionRequest, ExecutionResponse};

/// One scripted outcome for a single `execute` call.
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Respond with stdout = stdin, exit 0.
    Echo,
    /// Respond with a fixed stdout, exit 0.
    Output(String),
    /// Report a compile failure.
    CompileError(String),
    /// Non-zero exit with stderr.
    Crash { exit_code: i64, stderr: String },
    /// Resource-kill shape at exactly the time limit.
    OverTime,
    /// Successful run reporting the given peak memory in KB.
    OverMemory(u64),
    /// A backend fault (retryable by the runner).
    Fail(MockFailure),
    /// Sleep for the given milliseconds, then resolve the inner step.
    Delay(u64, Box<MockStep>),
}

#[derive(Debug, Clone, Copy)]
pub enum MockFailure {
    Timeout,
    Network,
    Rejected,
    Malformed,
}

type Handler = dyn Fn(&ExecutionRequest) -> MockStep + Send + Sync;

pub struct MockBackend {
    id: String,
    script: Mutex<VecDeque<MockStep>>,
    handler: Option<Box<Handler>>,
    default_step: MockStep,
    calls: AtomicU32,
    probes: AtomicU32,
    probe_ok: AtomicBool,
    enforces_memory: bool,
}

impl MockBackend {
    /// A well-behaved backend that echoes stdin.
    pub fn echo(id: &str) -> Self {
        Self::with_default(id, MockStep::Echo)
    }

    pub fn with_default(id: &str, default_step: MockStep) -> Self {
        Self {
            id: id.to_string(),
            script: Mutex::new(VecDeque::new()),
            handler: None,
            default_step,
            calls: AtomicU32::new(0),
            probes: AtomicU32::new(0),
            probe_ok: AtomicBool::new(true),
            enforces_memory: true,
        }
    }

    /// Queue outcomes consumed one per call before falling back to the
    /// default step.
    pub fn with_script(self, steps: impl IntoIterator<Item = MockStep>) -> Self {
        self.script.lock().unwrap().extend(steps);
        self
    }

    /// Compute the outcome per request instead of from a script.
    pub fn with_handler(
        mut self,
        handler: impl Fn(&ExecutionRequest) -> MockStep + Send + Sync + 'static,
    ) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    pub fn without_memory_enforcement(mut self) -> Self {
        self.enforces_memory = false;
        self
    }

    pub fn set_probe_ok(&self, ok: bool) {
        self.probe_ok.store(ok, Ordering::SeqCst);
    }

    /// Total `execute` calls observed.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    fn next_step(&self, request: &ExecutionRequest) -> MockStep {
        if let Some(step) = self.script.lock().unwrap().pop_front() {
            return step;
        }
        if let Some(handler) = &self.handler {
            return handler(request);
        }
        self.default_step.clone()
    }
}

fn resolve(step: MockStep, request: &ExecutionRequest) -> Result<ExecutionResponse, BackendError> {
    let ok = ExecutionResponse {
        exit_code: Some(0),
        time_ms: 5,
        memory_kb: Some(1024),
        ..Default::default()
    };

    match step {
        MockStep::Echo => Ok(ExecutionResponse {
            stdout: request.stdin.clone(),
            ..ok
        }),
        MockStep::Output(stdout) => Ok(ExecutionResponse { stdout, ..ok }),
        MockStep::CompileError(message) => Ok(ExecutionResponse {
            compile_error: Some(message),
            ..Default::default()
        }),
        MockStep::Crash { exit_code, stderr } => Ok(ExecutionResponse {
            exit_code: Some(exit_code),
            stderr,
            time_ms: 5,
            memory_kb: Some(1024),
            ..Default::default()
        }),
        MockStep::OverTime => Ok(ExecutionResponse {
            exit_signal: Some("SIGKILL".to_string()),
            time_ms: request.time_limit_ms,
            memory_kb: Some(1024),
            ..Default::default()
        }),
        MockStep::OverMemory(memory_kb) => Ok(ExecutionResponse {
            stdout: request.stdin.clone(),
            memory_kb: Some(memory_kb),
            ..ok
        }),
        MockStep::Fail(failure) => Err(match failure {
            MockFailure::Timeout => BackendError::Timeout(request.time_limit_ms),
            MockFailure::Network => BackendError::Network("connection refused".to_string()),
            MockFailure::Rejected => BackendError::Rejected("quota exhausted".to_string()),
            MockFailure::Malformed => {
                BackendError::MalformedResponse("truncated body".to_string())
            }
        }),
        // Delay is unwrapped by the caller so resolve stays sync.
        MockStep::Delay(_, inner) => resolve(*inner, request),
    }
}

#[async_trait]
impl ExecutionBackend for MockBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn enforces_memory_limit(&self) -> bool {
        self.enforces_memory
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut step = self.next_step(request);
        while let MockStep::Delay(ms, inner) = step {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            step = *inner;
        }

        resolve(step, request)
    }

    async fn probe(&self) -> Result<(), BackendError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.probe_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Network("probe refused".to_string()))
        }
    }
}
