#![allow(unused_imports)]

pub use palaver::test_utils::{delta, done, ScriptedGateway, Step};

use palaver::gateway::ModelGateway;
use palaver::orchestrator::{OrchestratorSettings, SessionOrchestrator, Viewport};
use palaver::storage::{JsonFileStore, SessionStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Viewport whose position the test controls
#[derive(Debug)]
pub struct TestViewport {
    at_bottom: AtomicBool,
}

#[allow(dead_code)]
impl TestViewport {
    pub fn new(at_bottom: bool) -> Arc<Self> {
        Arc::new(Self {
            at_bottom: AtomicBool::new(at_bottom),
        })
    }

    pub fn set_at_bottom(&self, at_bottom: bool) {
        self.at_bottom.store(at_bottom, Ordering::SeqCst);
    }
}

impl Viewport for TestViewport {
    fn is_at_bottom(&self, _session_id: &str) -> bool {
        self.at_bottom.load(Ordering::SeqCst)
    }
}

#[allow(dead_code)]
pub fn json_store() -> (Arc<JsonFileStore>, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let store = Arc::new(JsonFileStore::new(tmp.path().join("chats")));
    (store, tmp)
}

#[allow(dead_code)]
pub fn orchestrator(
    store: Arc<dyn SessionStore>,
    gateway: Arc<dyn ModelGateway>,
    viewport: Arc<dyn Viewport>,
) -> SessionOrchestrator {
    SessionOrchestrator::new(store, gateway, viewport, OrchestratorSettings::default())
}
