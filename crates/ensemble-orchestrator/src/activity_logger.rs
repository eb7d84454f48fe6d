//! Activity Logger - human-readable run transcript in `.ensemble/activity.md`
//!
//! Subscribes to the bus in summary mode and appends one markdown entry per
//! event:
//! - Run header with the task and team
//! - Orchestrator notices (plan, stalls, resets)
//! - Agent message previews
//! - The terminal summary

use chrono::Utc;
use ensemble_core::fail_open::fail_open;
use ensemble_core::{Event, RunStatus};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

use crate::event_bus::Subscription;

/// Maximum character length for agent output in activity log preview
const ACTIVITY_LOG_PREVIEW_CHARS: usize = 500;

/// Appends run events to a markdown file
#[derive(Debug, Clone)]
pub struct ActivityLogger {
    output_path: PathBuf,
}

fn preview(text: &str) -> String {
    if text.chars().count() > ACTIVITY_LOG_PREVIEW_CHARS {
        let truncated: String = text.chars().take(ACTIVITY_LOG_PREVIEW_CHARS).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

fn quote(text: &str) -> String {
    format!("> {}", text.trim().replace('\n', "\n> "))
}

impl ActivityLogger {
    /// Logger writing to `<dir>/activity.md`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            output_path: dir.as_ref().join("activity.md"),
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Start a fresh transcript
    ///
    /// This operation is fail-open - logging failures won't crash the run
    pub async fn log_run_start(&self, task: &str, participants: &[String]) {
        fail_open("activity_logger::log_run_start", || async {
            if let Some(dir) = self.output_path.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
            let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
            let content = format!(
                "# Ensemble Activity Log\n\n## Task: {}\n**Started**: {}\n**Team**: {}\n\n---\n\n",
                task.lines().next().unwrap_or(task),
                timestamp,
                participants.join(", ")
            );

            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.output_path)
                .await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await?;
            Ok(())
        })
        .await;
    }

    /// Append the entry for one event
    ///
    /// This operation is fail-open - logging failures won't crash the run
    pub async fn log_event(&self, event: &Event) {
        let Some(content) = Self::render(event) else {
            return;
        };
        fail_open("activity_logger::log_event", || self.append(&content)).await;
    }

    fn render(event: &Event) -> Option<String> {
        let timestamp = Utc::now().format("%H:%M:%S");
        let entry = match event {
            Event::OrchestratorMessage { round, kind, text } => {
                let place = round.map(|r| format!(" (round {})", r + 1)).unwrap_or_default();
                format!("**[{}] {}{}**\n\n{}\n\n", timestamp, kind, place, quote(text))
            }
            Event::AgentDelta { .. } => return None,
            Event::AgentMessage {
                round,
                participant,
                message,
            } => format!(
                "### Round {} - {}\n**Time**: {}\n\n{}\n\n",
                round + 1,
                participant,
                timestamp,
                quote(&preview(&message.text))
            ),
            Event::FinalResult { message } => format!(
                "## Run Summary\n\n**Completed**: {}\n**Status**: {}\n**Result by**: {}\n\n{}\n\n",
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                RunStatus::Succeeded,
                message.author,
                quote(&preview(&message.text))
            ),
            Event::Failure {
                status,
                reason,
                rounds,
            } => format!(
                "## Run Summary\n\n**Completed**: {}\n**Status**: {}\n**Rounds**: {}\n**Reason**: {}\n\n",
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                status,
                rounds,
                reason
            ),
            Event::Cancelled { reason, rounds } => format!(
                "## Run Summary\n\n**Completed**: {}\n**Status**: {}\n**Rounds**: {}\n**Reason**: {}\n\n",
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                RunStatus::Cancelled,
                rounds,
                reason
            ),
        };
        Some(entry)
    }

    async fn append(&self, content: &str) -> ensemble_core::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Write the header, then log every event of `subscription` until the bus
    /// closes
    pub fn spawn(
        self,
        task: String,
        participants: Vec<String>,
        mut subscription: Subscription,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.log_run_start(&task, &participants).await;
            while let Some(event) = subscription.recv().await {
                self.log_event(&event).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::{EventBus, SubscriptionMode};
    use ensemble_core::{Message, MessageKind};
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_start_creates_directory_and_header() {
        let temp = TempDir::new().unwrap();
        let logger = ActivityLogger::new(temp.path().join(".ensemble"));
        logger
            .log_run_start("Build login\nwith tests", &["developer".into(), "qa".into()])
            .await;

        let content = std::fs::read_to_string(logger.output_path()).unwrap();
        assert!(content.starts_with("# Ensemble Activity Log"));
        assert!(content.contains("## Task: Build login\n"));
        assert!(content.contains("**Team**: developer, qa"));
    }

    #[tokio::test]
    async fn test_agent_message_is_truncated() {
        let temp = TempDir::new().unwrap();
        let logger = ActivityLogger::new(temp.path());
        let long = "x".repeat(800);
        logger
            .log_event(&Event::AgentMessage {
                round: 2,
                participant: "developer".into(),
                message: Message::new("developer", long),
            })
            .await;

        let content = std::fs::read_to_string(logger.output_path()).unwrap();
        assert!(content.contains("### Round 3 - developer"));
        assert!(content.contains(&format!("> {}...", "x".repeat(500))));
        assert!(!content.contains(&"x".repeat(501)));
    }

    #[tokio::test]
    async fn test_deltas_are_not_logged() {
        let temp = TempDir::new().unwrap();
        let logger = ActivityLogger::new(temp.path());
        logger
            .log_event(&Event::AgentDelta {
                round: 0,
                participant: "qa".into(),
                chunk: "par".into(),
            })
            .await;
        assert!(!logger.output_path().exists());
    }

    #[tokio::test]
    async fn test_fails_open_on_unwritable_path() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("file");
        std::fs::write(&blocker, "not a dir").unwrap();
        let logger = ActivityLogger::new(blocker.join("nested"));

        logger.log_run_start("task", &[]).await;
        logger
            .log_event(&Event::notice(None, MessageKind::Plan, "plan"))
            .await;
        assert!(!logger.output_path().exists());
    }

    #[tokio::test]
    async fn test_spawned_logger_follows_bus_until_close() {
        let temp = TempDir::new().unwrap();
        let bus = EventBus::new(16, Duration::from_secs(1));
        let logger = ActivityLogger::new(temp.path());
        let path = logger.output_path().to_path_buf();
        let handle = logger.spawn(
            "Ship it".into(),
            vec!["developer".into()],
            bus.subscribe(SubscriptionMode::Summary),
        );

        bus.publish(Event::notice(Some(0), MessageKind::Stall, "no progress"))
            .await;
        bus.publish(Event::Cancelled {
            reason: "user interrupt".into(),
            rounds: 1,
        })
        .await;
        bus.close();
        handle.await.unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("stall (round 1)"));
        assert!(content.contains("> no progress"));
        assert!(content.contains("**Status**: cancelled"));
        assert!(content.contains("**Reason**: user interrupt"));
    }
}
