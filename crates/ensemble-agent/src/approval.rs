//! Approval policy for side-effecting tool actions
//!
//! Workers consult the policy before touching the workspace or infrastructure.
//! A withheld action is not an error: the worker answers with the plan it would
//! have carried out, and the engine treats that answer like any other.

use serde::{Deserialize, Serialize};
use std::env;

/// Named operation a worker may invoke behind the tool boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ToolAction {
    ReadFile { path: String },
    WriteFile { path: String, bytes: usize },
    ListWorkspace,
    Deploy { project: String, service: String },
    Scale { service: String, replicas: u32 },
    Rollback { service: String, version: String },
    RunTests { project: String },
    RenderDashboard,
    RaiseAlert { severity: String, message: String },
}

impl ToolAction {
    /// Actions that change files or infrastructure
    pub fn is_side_effecting(&self) -> bool {
        matches!(
            self,
            Self::WriteFile { .. } | Self::Deploy { .. } | Self::Scale { .. } | Self::Rollback { .. }
        )
    }

    /// What the action would do, in one sentence
    pub fn plan(&self) -> String {
        match self {
            Self::ReadFile { path } => format!("Read '{}' from the workspace", path),
            Self::WriteFile { path, bytes } => {
                format!("Write {} chars to '{}'", bytes, path)
            }
            Self::ListWorkspace => "List files in the workspace".to_string(),
            Self::Deploy { project, service } => {
                format!("Build '{}' and deploy it as service '{}'", project, service)
            }
            Self::Scale { service, replicas } => {
                format!("Scale service '{}' to {} replicas", service, replicas)
            }
            Self::Rollback { service, version } => {
                format!("Roll back service '{}' to version '{}'", service, version)
            }
            Self::RunTests { project } => format!("Run the test suite of '{}'", project),
            Self::RenderDashboard => "Render the team dashboard".to_string(),
            Self::RaiseAlert { severity, message } => {
                format!("Raise a {} alert: {}", severity.to_uppercase(), message)
            }
        }
    }
}

/// Outcome of consulting the policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Allow,
    RequireApproval { plan: String },
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Descriptive, non-executing answer for a withheld action
    pub fn describe_withheld(&self) -> Option<String> {
        match self {
            Self::Allow => None,
            Self::RequireApproval { plan } => {
                Some(format!("Action requires approval and was not executed. Plan: {}", plan))
            }
        }
    }
}

/// Approval gate applied by workers before side effects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalPolicy {
    approval_required: bool,
}

impl ApprovalPolicy {
    pub fn new(approval_required: bool) -> Self {
        Self { approval_required }
    }

    /// Read `APPROVAL_REQUIRED` (default `true`)
    pub fn from_env() -> Self {
        let required = env::var("APPROVAL_REQUIRED")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(true);
        Self::new(required)
    }

    pub fn approval_required(&self) -> bool {
        self.approval_required
    }

    pub fn decide(&self, action: &ToolAction) -> PolicyDecision {
        if self.approval_required && action.is_side_effecting() {
            tracing::info!("Approval required: {}", action.plan());
            PolicyDecision::RequireApproval {
                plan: action.plan(),
            }
        } else {
            PolicyDecision::Allow
        }
    }

    /// Instruction paragraph appended to chat worker system prompts
    pub fn instructions(&self) -> &'static str {
        if self.approval_required {
            "File writes, deployments, scaling and rollbacks require human approval. \
             Do not claim to have performed them: describe exactly what you would do \
             and continue with the rest of your work."
        } else {
            "You are in AUTONOMOUS mode: file writes, deployments, scaling and rollbacks \
             are pre-approved."
        }
    }
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_always_allowed() {
        let policy = ApprovalPolicy::new(true);
        assert_eq!(
            policy.decide(&ToolAction::ReadFile {
                path: "src/main.py".into()
            }),
            PolicyDecision::Allow
        );
        assert!(policy.decide(&ToolAction::RenderDashboard).is_allowed());
    }

    #[test]
    fn test_writes_need_approval_when_required() {
        let policy = ApprovalPolicy::new(true);
        let decision = policy.decide(&ToolAction::WriteFile {
            path: "auth.py".into(),
            bytes: 120,
        });
        assert_eq!(
            decision,
            PolicyDecision::RequireApproval {
                plan: "Write 120 chars to 'auth.py'".into()
            }
        );
        assert_eq!(
            decision.describe_withheld().unwrap(),
            "Action requires approval and was not executed. Plan: Write 120 chars to 'auth.py'"
        );
    }

    #[test]
    fn test_autonomous_mode_allows_everything() {
        let policy = ApprovalPolicy::new(false);
        let deploy = ToolAction::Deploy {
            project: "auth".into(),
            service: "auth-api".into(),
        };
        assert!(policy.decide(&deploy).is_allowed());
        assert!(policy.instructions().contains("AUTONOMOUS"));
    }

    #[test]
    fn test_side_effect_classification() {
        assert!(ToolAction::Scale {
            service: "api".into(),
            replicas: 3
        }
        .is_side_effecting());
        assert!(!ToolAction::RunTests {
            project: "auth".into()
        }
        .is_side_effecting());
        assert!(!ToolAction::ListWorkspace.is_side_effecting());
    }

    #[test]
    fn test_alert_plan_uppercases_severity() {
        let alert = ToolAction::RaiseAlert {
            severity: "critical".into(),
            message: "error rate above 5%".into(),
        };
        assert_eq!(alert.plan(), "Raise a CRITICAL alert: error rate above 5%");
    }
}
