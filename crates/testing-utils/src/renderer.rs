//! Mock render backend and backend factory

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use kagami_core::{BackendFactory, RenderBackend, RenderServerError, RenderServerResult};

/// What the mock backend does on a render call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderBehavior {
    /// Return the given bytes
    Succeed(Vec<u8>),
    /// Fail with a recoverable warning, backend stays healthy
    FailRecoverable,
    /// Fail and mark the backend unhealthy
    FailFatal,
    /// Panic inside the render call
    Panic,
}

#[derive(Debug, Default)]
struct RecorderState {
    initialize_calls: usize,
    render_links: Vec<String>,
    shutdown_calls: usize,
    healthy: bool,
}

/// Shared view into one mock backend's state.
///
/// The recorder outlives the backend, so tests can inspect a backend after the
/// handle owning it has been replaced or dropped.
#[derive(Debug, Clone, Default)]
pub struct MockBackendRecorder {
    state: Arc<Mutex<RecorderState>>,
}

impl MockBackendRecorder {
    pub fn initialize_calls(&self) -> usize {
        self.state.lock().unwrap().initialize_calls
    }

    pub fn render_links(&self) -> Vec<String> {
        self.state.lock().unwrap().render_links.clone()
    }

    pub fn shutdown_calls(&self) -> usize {
        self.state.lock().unwrap().shutdown_calls
    }

    pub fn is_healthy(&self) -> bool {
        self.state.lock().unwrap().healthy
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.lock().unwrap().healthy = healthy;
    }
}

/// Scripted render backend.
///
/// Render calls consume `script` front to back; once it is drained every call
/// uses `fallback`.
pub struct MockRenderBackend {
    recorder: MockBackendRecorder,
    script: VecDeque<RenderBehavior>,
    fallback: RenderBehavior,
    fail_initialize: bool,
    fail_shutdown: bool,
}

impl MockRenderBackend {
    pub fn new(fallback: RenderBehavior) -> Self {
        Self {
            recorder: MockBackendRecorder::default(),
            script: VecDeque::new(),
            fallback,
            fail_initialize: false,
            fail_shutdown: false,
        }
    }

    pub fn succeeding(image: &[u8]) -> Self {
        Self::new(RenderBehavior::Succeed(image.to_vec()))
    }

    pub fn with_script(mut self, script: Vec<RenderBehavior>) -> Self {
        self.script = script.into();
        self
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn failing_shutdown(mut self) -> Self {
        self.fail_shutdown = true;
        self
    }

    pub fn recorder(&self) -> MockBackendRecorder {
        self.recorder.clone()
    }
}

impl RenderBackend for MockRenderBackend {
    fn kind(&self) -> &'static str {
        "MockRenderer"
    }

    fn initialize(&mut self) -> RenderServerResult<()> {
        let mut state = self.recorder.state.lock().unwrap();
        state.initialize_calls += 1;
        if self.fail_initialize {
            state.healthy = false;
            return Err(RenderServerError::RendererInit("mock browser failed to start".into()));
        }
        state.healthy = true;
        Ok(())
    }

    fn render(&mut self, link: &str) -> RenderServerResult<Vec<u8>> {
        self.recorder
            .state
            .lock()
            .unwrap()
            .render_links
            .push(link.to_string());

        let behavior = self.script.pop_front().unwrap_or_else(|| self.fallback.clone());
        match behavior {
            RenderBehavior::Succeed(image) => Ok(image),
            RenderBehavior::FailRecoverable => Err(RenderServerError::RenderWarning(format!(
                "mock page load failed: {link}"
            ))),
            RenderBehavior::FailFatal => {
                self.recorder.set_healthy(false);
                Err(RenderServerError::RenderFatal("mock browser crashed".into()))
            }
            RenderBehavior::Panic => panic!("mock renderer panicked on {link}"),
        }
    }

    fn is_healthy(&self) -> bool {
        self.recorder.is_healthy()
    }

    fn shutdown(&mut self) -> RenderServerResult<()> {
        let mut state = self.recorder.state.lock().unwrap();
        state.shutdown_calls += 1;
        state.healthy = false;
        if self.fail_shutdown {
            return Err(RenderServerError::RenderFatal("mock browser already gone".into()));
        }
        Ok(())
    }
}

/// Factory producing [`MockRenderBackend`]s and remembering their recorders
#[derive(Clone)]
pub struct MockBackendFactory {
    fallback: RenderBehavior,
    script: Vec<RenderBehavior>,
    first_script: Option<Vec<RenderBehavior>>,
    fail_initialize: bool,
    fail_create: bool,
    recorders: Arc<Mutex<Vec<MockBackendRecorder>>>,
}

impl MockBackendFactory {
    pub fn new(fallback: RenderBehavior) -> Self {
        Self {
            fallback,
            script: Vec::new(),
            first_script: None,
            fail_initialize: false,
            fail_create: false,
            recorders: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn succeeding(image: &[u8]) -> Self {
        Self::new(RenderBehavior::Succeed(image.to_vec()))
    }

    /// Script applied to every backend this factory creates
    pub fn with_script(mut self, script: Vec<RenderBehavior>) -> Self {
        self.script = script;
        self
    }

    /// Script applied only to the first backend; later backends use `with_script`
    pub fn with_first_backend_script(mut self, script: Vec<RenderBehavior>) -> Self {
        self.first_script = Some(script);
        self
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// Recorders of all backends created so far, oldest first
    pub fn recorders(&self) -> Vec<MockBackendRecorder> {
        self.recorders.lock().unwrap().clone()
    }

    pub fn created_count(&self) -> usize {
        self.recorders.lock().unwrap().len()
    }
}

impl BackendFactory for MockBackendFactory {
    fn create_backend(&self) -> RenderServerResult<Box<dyn RenderBackend>> {
        if self.fail_create {
            return Err(RenderServerError::RendererInit("mock factory refused".into()));
        }

        let mut recorders = self.recorders.lock().unwrap();
        let script = match (&self.first_script, recorders.is_empty()) {
            (Some(first), true) => first.clone(),
            _ => self.script.clone(),
        };
        let mut backend = MockRenderBackend::new(self.fallback.clone()).with_script(script);
        if self.fail_initialize {
            backend = backend.failing_initialize();
        }
        recorders.push(backend.recorder());
        Ok(Box::new(backend))
    }
}
