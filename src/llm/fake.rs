//! Scripted language model for tests and offline runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::agents::model::ModelParams;
use crate::error::LlmError;
use crate::llm::provider::{Generation, LanguageModelService, Prompt};

/// One scripted behavior.
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(Generation),
    Fail(String),
    /// Sleep before replying with the default generation.
    Hang(Duration),
}

/// Plays back scripted steps in order, then the default reply forever.
pub struct ScriptedModel {
    default: Generation,
    script: Mutex<VecDeque<Scripted>>,
    prompts: Mutex<Vec<Prompt>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    /// A model that always answers `text` with `confidence`.
    pub fn replying(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            default: Generation {
                text: text.into(),
                confidence,
                tokens_used: 42,
            },
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn then(mut self, step: Scripted) -> Self {
        self.script.get_mut().push_back(step);
        self
    }

    pub fn then_fail(self, reason: impl Into<String>) -> Self {
        self.then(Scripted::Fail(reason.into()))
    }

    pub fn then_hang(self, duration: Duration) -> Self {
        self.then(Scripted::Hang(duration))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every prompt received so far.
    pub async fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl LanguageModelService for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        _params: &ModelParams,
        _timeout: Duration,
    ) -> Result<Generation, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().await.push(prompt.clone());

        let step = self.script.lock().await.pop_front();
        match step {
            None => Ok(self.default.clone()),
            Some(Scripted::Reply(generation)) => Ok(generation),
            Some(Scripted::Fail(reason)) => Err(LlmError::RequestFailed {
                provider: "scripted".into(),
                reason,
            }),
            Some(Scripted::Hang(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(self.default.clone())
            }
        }
    }
}
