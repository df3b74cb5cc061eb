//! Scripted text-generation backend for tests.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{error::InferenceError, inference::TextInferenceClient};

#[derive(Debug, Clone)]
struct Script {
    reply: Option<Result<String, InferenceError>>,
    delay: Option<Duration>,
}

/// Answers by prompt prefix; unknown prompts echo their first line.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    scripts: Vec<(String, Script)>,
    default_delay: Duration,
    default_failure: Option<InferenceError>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&mut self, prefix: &str) -> &mut Script {
        let idx = match self.scripts.iter().position(|(p, _)| p == prefix) {
            Some(idx) => idx,
            None => {
                self.scripts.push((
                    prefix.to_string(),
                    Script {
                        reply: None,
                        delay: None,
                    },
                ));
                self.scripts.len() - 1
            }
        };
        &mut self.scripts[idx].1
    }

    pub fn respond(mut self, prefix: &str, text: &str) -> Self {
        self.script(prefix).reply = Some(Ok(text.to_string()));
        self
    }

    pub fn fail(mut self, prefix: &str, err: InferenceError) -> Self {
        self.script(prefix).reply = Some(Err(err));
        self
    }

    pub fn delay(mut self, prefix: &str, delay: Duration) -> Self {
        self.script(prefix).delay = Some(delay);
        self
    }

    pub fn default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn fail_by_default(mut self, err: InferenceError) -> Self {
        self.default_failure = Some(err);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl TextInferenceClient for ScriptedClient {
    async fn generate(&self, prompt: &str, _timeout: Duration) -> Result<String, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
        let script = self
            .scripts
            .iter()
            .find(|(prefix, _)| prompt.starts_with(prefix.as_str()))
            .map(|(_, script)| script.clone());
        let delay = script
            .as_ref()
            .and_then(|s| s.delay)
            .unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match script.and_then(|s| s.reply) {
            Some(reply) => reply,
            None => match &self.default_failure {
                Some(err) => Err(err.clone()),
                None => Ok(format!(
                    "scripted: {}",
                    prompt.lines().next().unwrap_or_default()
                )),
            },
        }
    }
}
