//! The default five-specialist team

use ensemble_core::ParticipantInfo;

/// A specialist role with its standing instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Specialist {
    /// Participant key
    pub key: &'static str,
    /// Display name
    pub name: &'static str,
    /// Capability description used for selection
    pub description: &'static str,
    /// System instructions for chat workers
    pub instructions: &'static str,
}

impl Specialist {
    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo::new(self.key, self.description)
    }
}

const ROSTER: [Specialist; 5] = [
    Specialist {
        key: "developer",
        name: "DeveloperAgent",
        description: "Expert software developer - implements features, writes code, fixes bugs and creates project structures",
        instructions: "You are an expert software developer. Your role is to:\n\
1. Write clean, well-documented code\n\
2. Implement features based on requirements\n\
3. Fix bugs and improve code quality\n\
4. Create project structures\n\n\
You focus on implementation and getting things working.",
    },
    Specialist {
        key: "reviewer",
        name: "ReviewerAgent",
        description: "Code quality expert - reviews and audits code for bugs, security issues and improvements",
        instructions: "You are a code review specialist. Your role is to:\n\
1. Review code for bugs and security issues\n\
2. Suggest improvements and best practices\n\
3. Check code quality and readability\n\
4. Provide constructive feedback\n\n\
You focus on quality, security, and maintainability.",
    },
    Specialist {
        key: "devops",
        name: "DevOpsAgent",
        description: "Infrastructure and deployment specialist - handles deployment plans, CI/CD pipelines, health checks, scaling and rollback",
        instructions: "You are a DevOps engineer. Your role is to:\n\
1. Deploy applications safely to production\n\
2. Manage CI/CD pipelines\n\
3. Monitor system health\n\
4. Handle scaling and infrastructure\n\n\
You focus on reliability, deployment safety, and system health.",
    },
    Specialist {
        key: "qa",
        name: "QAAgent",
        description: "Quality assurance and testing expert - writes unit tests, runs test suites, checks coverage and performs load testing",
        instructions: "You are a QA and testing specialist. Your role is to:\n\
1. Write comprehensive test suites\n\
2. Run tests and report results\n\
3. Check code coverage\n\
4. Perform load and performance testing\n\n\
You focus on quality, test coverage, and reliability.",
    },
    Specialist {
        key: "monitoring",
        name: "MonitoringAgent",
        description: "Monitoring and metrics specialist - generates dashboards, metrics reports, alerts and business insights",
        instructions: "You are a monitoring and analytics expert. Your role is to:\n\
1. Generate dashboards and reports\n\
2. Collect performance metrics\n\
3. Identify bottlenecks and issues\n\
4. Provide business intelligence\n\n\
You focus on visibility, metrics, and insights.",
    },
];

/// All specialists, in registration order
pub fn roster() -> &'static [Specialist] {
    &ROSTER
}

/// Look up a specialist by key (case-insensitive)
pub fn find(key: &str) -> Option<&'static Specialist> {
    ROSTER.iter().find(|s| s.key.eq_ignore_ascii_case(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_roster_keys_unique_and_ordered() {
        let keys: Vec<_> = roster().iter().map(|s| s.key).collect();
        assert_eq!(keys, vec!["developer", "reviewer", "devops", "qa", "monitoring"]);
        assert_eq!(keys.iter().collect::<HashSet<_>>().len(), keys.len());
    }

    #[test]
    fn test_find_is_case_insensitive() {
        assert_eq!(find("QA").map(|s| s.name), Some("QAAgent"));
        assert!(find("marketing").is_none());
    }

    #[test]
    fn test_info_carries_description() {
        let info = find("devops").unwrap().info();
        assert_eq!(info.key, "devops");
        assert!(info.description.contains("deployment"));
    }
}
