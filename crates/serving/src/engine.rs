//! The generation engine seam.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use parlance_domain::error::{Error, Result};
use parlance_domain::request::{InputItem, ToolSpec};
use parlance_domain::stream::{BoxStream, EngineStep};

/// Everything an engine needs for one generation turn.
#[derive(Debug, Clone, Default)]
pub struct EnginePrompt {
    /// Conversation so far, oldest first, including tool calls and their
    /// outputs.
    pub items: Vec<InputItem>,
    pub tools: Vec<ToolSpec>,
    pub model: Option<String>,
    pub instructions: Option<String>,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

/// A model backend that turns a prompt into a stream of steps.
///
/// One call corresponds to one turn; after a tool-output pause the
/// orchestrator calls again with the outputs folded into `items`.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn generate(
        &self,
        prompt: EnginePrompt,
    ) -> Result<BoxStream<'static, Result<EngineStep>>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum Turn {
    Steps(Vec<EngineStep>),
    Refuse(String),
    MidStreamError(Vec<EngineStep>, String),
}

/// Engine whose turns are scripted up front; each `generate` call pops
/// the next one. Used by tests and local smoke runs.
#[derive(Default)]
pub struct StubEngine {
    turns: Mutex<VecDeque<Turn>>,
    prompts: Mutex<Vec<EnginePrompt>>,
}

impl StubEngine {
    pub fn new() -> Self {
        StubEngine::default()
    }

    /// Script a turn that streams `steps` and ends cleanly.
    pub fn push_turn(&self, steps: Vec<EngineStep>) {
        self.turns.lock().push_back(Turn::Steps(steps));
    }

    /// Script a turn where `generate` itself fails.
    pub fn push_refusal(&self, message: impl Into<String>) {
        self.turns.lock().push_back(Turn::Refuse(message.into()));
    }

    /// Script a turn that streams `steps` and then errors mid-stream.
    pub fn push_stream_error(&self, steps: Vec<EngineStep>, message: impl Into<String>) {
        self.turns
            .lock()
            .push_back(Turn::MidStreamError(steps, message.into()));
    }

    /// Prompts seen so far, in call order.
    pub fn prompts(&self) -> Vec<EnginePrompt> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl Engine for StubEngine {
    async fn generate(
        &self,
        prompt: EnginePrompt,
    ) -> Result<BoxStream<'static, Result<EngineStep>>> {
        self.prompts.lock().push(prompt);
        let turn = self.turns.lock().pop_front();
        match turn {
            None => Err(Error::Internal(
                "stub engine has no scripted turns left".to_string(),
            )),
            Some(Turn::Refuse(message)) => Err(Error::Internal(message)),
            Some(Turn::Steps(steps)) => {
                let steps: Vec<Result<EngineStep>> = steps.into_iter().map(Ok).collect();
                Ok(Box::pin(futures_util::stream::iter(steps)))
            }
            Some(Turn::MidStreamError(steps, message)) => {
                let mut steps: Vec<Result<EngineStep>> = steps.into_iter().map(Ok).collect();
                steps.push(Err(Error::Internal(message)));
                Ok(Box::pin(futures_util::stream::iter(steps)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use parlance_domain::response::Usage;
    use parlance_domain::stream::FinishReason;

    #[tokio::test]
    async fn turns_pop_in_script_order() {
        let engine = StubEngine::new();
        engine.push_turn(vec![EngineStep::TextDelta { delta: "a".into() }]);
        engine.push_turn(vec![EngineStep::TurnEnd {
            finish_reason: FinishReason::Stop,
            usage: Usage::turn(1, 1),
        }]);

        let first: Vec<_> = engine
            .generate(EnginePrompt::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(first.len(), 1);
        assert!(matches!(first[0], Ok(EngineStep::TextDelta { .. })));

        let second: Vec<_> = engine
            .generate(EnginePrompt::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert!(matches!(second[0], Ok(EngineStep::TurnEnd { .. })));
        assert_eq!(engine.prompts().len(), 2);
    }

    #[tokio::test]
    async fn exhausted_script_refuses() {
        let engine = StubEngine::new();
        assert!(engine.generate(EnginePrompt::default()).await.is_err());
    }

    #[tokio::test]
    async fn mid_stream_error_surfaces_after_its_steps() {
        let engine = StubEngine::new();
        engine.push_stream_error(
            vec![EngineStep::TextDelta { delta: "x".into() }],
            "backend fell over",
        );
        let steps: Vec<_> = engine
            .generate(EnginePrompt::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(steps.len(), 2);
        assert!(steps[1].is_err());
    }
}
