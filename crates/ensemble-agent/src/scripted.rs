//! Deterministic replay worker
//!
//! Replays a fixed script of steps, one per call; once the script runs out the
//! last step repeats. Identical scripts give identical runs, which is what dry
//! runs and the orchestrator tests rely on.
//!
//! A [`ScriptStep::Tool`] step goes through the worker's [`ApprovalPolicy`]:
//! a withheld action answers with its plan instead of running.

use async_trait::async_trait;
use ensemble_core::{Message, WorkerError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::approval::{ApprovalPolicy, PolicyDecision, ToolAction};
use crate::roster::Specialist;
use crate::worker::{ResponseStream, StreamItem, Worker, WorkerResult};

/// One scripted call
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    Reply(String),
    Fail(WorkerError),
    /// Never answers; only cancellation ends the call
    Hang,
    /// Invoke a tool action behind the approval policy
    Tool(ToolAction),
}

impl ScriptStep {
    pub fn reply(text: impl Into<String>) -> Self {
        Self::Reply(text.into())
    }
}

/// Worker that replays scripted steps
pub struct ScriptedWorker {
    name: String,
    script: Vec<ScriptStep>,
    cursor: AtomicUsize,
    delay: Duration,
    stream_words: bool,
    approval: ApprovalPolicy,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedWorker {
    pub fn new(name: impl Into<String>, script: Vec<ScriptStep>) -> Self {
        Self {
            name: name.into(),
            script,
            cursor: AtomicUsize::new(0),
            delay: Duration::ZERO,
            stream_words: false,
            approval: ApprovalPolicy::default(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Script made only of replies
    pub fn replies<I, S>(name: impl Into<String>, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            replies.into_iter().map(|r| ScriptStep::Reply(r.into())).collect(),
        )
    }

    /// Canned script for a specialist: a progress note, the specialist's
    /// typical tool action if it has one, then a completing answer
    pub fn dry_run(specialist: &Specialist, approval: ApprovalPolicy) -> Self {
        let mut script = vec![ScriptStep::reply(format!(
            "{} here. I reviewed the request and drafted my part: {}.",
            specialist.name, specialist.description
        ))];
        if let Some(action) = dry_run_action(specialist.key) {
            script.push(ScriptStep::Tool(action));
        }
        script.push(ScriptStep::reply(format!(
            "{} signing off: my part is finished and checked.\n<promise>COMPLETE</promise>",
            specialist.name
        )));
        Self::new(specialist.key, script).with_approval(approval)
    }

    /// Policy applied to [`ScriptStep::Tool`] steps (approval required by default)
    pub fn with_approval(mut self, approval: ApprovalPolicy) -> Self {
        self.approval = approval;
        self
    }

    /// Wait this long before every answer
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Stream replies word by word instead of as one chunk
    pub fn with_word_streaming(mut self) -> Self {
        self.stream_words = true;
        self
    }

    /// Number of calls received so far
    pub fn calls(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Prompts received so far, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn next_step(&self, prompt: &str) -> WorkerResult<ScriptStep> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        let last = self
            .script
            .len()
            .checked_sub(1)
            .ok_or_else(|| WorkerError::InvalidResponse(format!("{} has an empty script", self.name)))?;
        Ok(self.script[index.min(last)].clone())
    }

    async fn play(&self, step: ScriptStep, cancel: &CancellationToken) -> WorkerResult<String> {
        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(WorkerError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
        match step {
            ScriptStep::Reply(text) => Ok(text),
            ScriptStep::Fail(err) => Err(err),
            ScriptStep::Hang => {
                cancel.cancelled().await;
                Err(WorkerError::Cancelled)
            }
            ScriptStep::Tool(action) => Ok(self.invoke(&action)),
        }
    }

    fn invoke(&self, action: &ToolAction) -> String {
        match self.approval.decide(action) {
            PolicyDecision::Allow => format!("Done: {}.", action.plan()),
            withheld => withheld
                .describe_withheld()
                .unwrap_or_else(|| action.plan()),
        }
    }
}

fn dry_run_action(key: &str) -> Option<ToolAction> {
    match key {
        "developer" => Some(ToolAction::WriteFile {
            path: "src/main.rs".to_string(),
            bytes: 1024,
        }),
        "devops" => Some(ToolAction::Deploy {
            project: "app".to_string(),
            service: "web".to_string(),
        }),
        "qa" => Some(ToolAction::RunTests {
            project: "app".to_string(),
        }),
        _ => None,
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn respond(&self, prompt: &str, cancel: &CancellationToken) -> WorkerResult<Message> {
        let step = self.next_step(prompt)?;
        let text = self.play(step, cancel).await?;
        Ok(Message::new(self.name.clone(), text))
    }

    fn respond_streaming<'a>(
        &'a self,
        prompt: &'a str,
        cancel: &'a CancellationToken,
    ) -> ResponseStream<'a> {
        Box::pin(async_stream::stream! {
            let step = match self.next_step(prompt) {
                Ok(step) => step,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            match self.play(step, cancel).await {
                Ok(text) => {
                    if self.stream_words {
                        for word in text.split_inclusive(' ') {
                            yield Ok(StreamItem::Chunk(word.to_string()));
                        }
                    } else if !text.is_empty() {
                        yield Ok(StreamItem::Chunk(text.clone()));
                    }
                    yield Ok(StreamItem::Done(Message::new(self.name.clone(), text)));
                }
                Err(e) => yield Err(e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_replays_in_order_then_repeats_last() {
        let worker = ScriptedWorker::replies("developer", ["one", "two"]);
        let cancel = CancellationToken::new();

        let mut texts = Vec::new();
        for _ in 0..4 {
            texts.push(worker.respond("p", &cancel).await.unwrap().text);
        }
        assert_eq!(texts, vec!["one", "two", "two", "two"]);
        assert_eq!(worker.calls(), 4);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let worker = ScriptedWorker::new(
            "devops",
            vec![ScriptStep::Fail(WorkerError::Unavailable("cluster down".into()))],
        );
        let cancel = CancellationToken::new();
        let err = worker.respond("deploy", &cancel).await.unwrap_err();
        assert_eq!(err, WorkerError::Unavailable("cluster down".into()));
    }

    #[tokio::test]
    async fn test_empty_script_is_invalid() {
        let worker = ScriptedWorker::new("qa", Vec::new());
        let cancel = CancellationToken::new();
        assert!(matches!(
            worker.respond("p", &cancel).await,
            Err(WorkerError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_hang_ends_on_cancel() {
        let worker = ScriptedWorker::new("qa", vec![ScriptStep::Hang]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            worker.respond("p", &cancel).await.unwrap_err(),
            WorkerError::Cancelled
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_is_cancellable() {
        let worker = ScriptedWorker::replies("qa", ["late"]).with_delay(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        assert_eq!(
            worker.respond("p", &cancel).await.unwrap_err(),
            WorkerError::Cancelled
        );
    }

    #[tokio::test]
    async fn test_word_streaming() {
        let worker = ScriptedWorker::replies("reviewer", ["looks good to me"]).with_word_streaming();
        let cancel = CancellationToken::new();
        let items: Vec<_> = worker.respond_streaming("p", &cancel).collect().await;

        let chunks: Vec<String> = items
            .iter()
            .filter_map(|i| match i {
                Ok(StreamItem::Chunk(c)) => Some(c.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(chunks, vec!["looks ", "good ", "to ", "me"]);
        assert!(matches!(items.last(), Some(Ok(StreamItem::Done(m))) if m.text == "looks good to me"));
    }

    #[tokio::test]
    async fn test_records_prompts() {
        let worker = ScriptedWorker::replies("qa", ["ok"]);
        let cancel = CancellationToken::new();
        worker.respond("first prompt", &cancel).await.unwrap();
        worker.respond("second prompt", &cancel).await.unwrap();
        assert_eq!(worker.prompts(), vec!["first prompt", "second prompt"]);
    }

    #[tokio::test]
    async fn test_dry_run_script_completes_on_last_call() {
        let specialist = crate::roster::find("reviewer").unwrap();
        let worker = ScriptedWorker::dry_run(specialist, ApprovalPolicy::default());
        let cancel = CancellationToken::new();

        let first = worker.respond("p", &cancel).await.unwrap();
        assert!(!first.text.contains("<promise>"));
        let second = worker.respond("p", &cancel).await.unwrap();
        assert!(second.text.contains("<promise>COMPLETE</promise>"));
    }

    #[tokio::test]
    async fn test_withheld_tool_action_answers_with_plan() {
        let deploy = ToolAction::Deploy {
            project: "shop".into(),
            service: "web".into(),
        };
        let worker = ScriptedWorker::new("devops", vec![ScriptStep::Tool(deploy)]);
        let cancel = CancellationToken::new();

        let message = worker.respond("deploy it", &cancel).await.unwrap();
        assert_eq!(
            message.text,
            "Action requires approval and was not executed. Plan: Build 'shop' and deploy it as service 'web'"
        );
    }

    #[tokio::test]
    async fn test_tool_action_runs_when_allowed() {
        let scale = ToolAction::Scale {
            service: "web".into(),
            replicas: 3,
        };
        let read = ToolAction::ReadFile {
            path: "README.md".into(),
        };
        let worker = ScriptedWorker::new(
            "devops",
            vec![ScriptStep::Tool(read), ScriptStep::Tool(scale)],
        )
        .with_approval(ApprovalPolicy::new(false));
        let cancel = CancellationToken::new();

        assert_eq!(
            worker.respond("p", &cancel).await.unwrap().text,
            "Done: Read 'README.md' from the workspace."
        );
        assert_eq!(
            worker.respond("p", &cancel).await.unwrap().text,
            "Done: Scale service 'web' to 3 replicas."
        );
    }

    #[tokio::test]
    async fn test_dry_run_routes_side_effects_through_policy() {
        let specialist = crate::roster::find("devops").unwrap();
        let worker = ScriptedWorker::dry_run(specialist, ApprovalPolicy::new(true));
        let cancel = CancellationToken::new();

        worker.respond("p", &cancel).await.unwrap();
        let second = worker.respond("p", &cancel).await.unwrap();
        assert!(second.text.starts_with("Action requires approval and was not executed."));
        let third = worker.respond("p", &cancel).await.unwrap();
        assert!(third.text.contains("<promise>COMPLETE</promise>"));
    }
}
