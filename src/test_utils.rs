//! Test utilities for Palaver
//!
//! Scripted gateway shared by unit tests and, behind the `test-utils`
//! feature, by the integration tests.

use crate::error::Result;
use crate::gateway::{
    spawn_frame_producer, ChatTurnRequest, Frame, FrameStream, GatewayHealth, ModelGateway,
    ModelSummary,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// One step of a scripted stream
#[derive(Debug, Clone)]
pub enum Step {
    Send(Frame),
    Sleep(Duration),
    /// Block until the gate is opened
    Wait(Arc<Notify>),
}

pub fn delta(text: &str) -> Step {
    Step::Send(Frame::Delta(text.to_string()))
}

pub fn done() -> Step {
    Step::Send(Frame::Done)
}

/// Gateway that plays back one script per `stream` call
///
/// When the scripts run out, the last one is replayed.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    last: Mutex<Vec<Step>>,
    requests: Mutex<Vec<ChatTurnRequest>>,
}

impl ScriptedGateway {
    pub fn new(scripts: Vec<Vec<Step>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Default::default()
        }
    }

    /// Every stream yields `Hel`, `lo`, done
    pub fn hello() -> Self {
        Self::new(vec![vec![delta("Hel"), delta("lo"), done()]])
    }

    pub fn requests(&self) -> Vec<ChatTurnRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_script(&self) -> Vec<Step> {
        let mut scripts = self.scripts.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        if let Some(script) = scripts.pop_front() {
            *last = script;
        }
        last.clone()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    fn stream(&self, request: ChatTurnRequest, cancel: CancellationToken) -> FrameStream {
        self.requests.lock().unwrap().push(request);
        let script = self.next_script();
        spawn_frame_producer(cancel, move |sink| async move {
            for step in script {
                match step {
                    Step::Send(frame) => {
                        if !sink.send(frame).await {
                            return;
                        }
                    }
                    Step::Sleep(duration) => tokio::time::sleep(duration).await,
                    Step::Wait(gate) => gate.notified().await,
                }
            }
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelSummary>> {
        Ok(vec![ModelSummary {
            name: "scripted".to_string(),
            size: 0,
            digest: None,
            modified_at: None,
        }])
    }

    async fn health(&self) -> GatewayHealth {
        GatewayHealth::ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_scripts_replay_last() {
        let gateway = ScriptedGateway::new(vec![vec![done()]]);
        for _ in 0..2 {
            let frames: Vec<Frame> = gateway
                .stream(
                    ChatTurnRequest::from_history("m", &[]),
                    CancellationToken::new(),
                )
                .collect()
                .await;
            assert_eq!(frames, vec![Frame::Done]);
        }
        assert_eq!(gateway.requests().len(), 2);
    }
}
