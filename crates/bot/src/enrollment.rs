//! Auto-enrollment of newly joined users.
//!
//! Every rule is applied in configuration order, and inside a rule every
//! channel in its listed order. A failing step is recorded and the engine
//! moves on; nothing here aborts the remaining work.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use pillar_channel_adapter::{ChannelAdapterError, DirectoryClient, MEMBER_ROLE};

use crate::classify::JoinRequest;
use crate::config::{ChannelSelection, EnrollmentRule};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    ResolveUser,
    ResolveTeam,
    JoinTeam,
    ListChannels,
    ListMemberships,
    ResolveChannel,
    JoinChannel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Added,
    AlreadyMember,
    /// Reason taken from the server error.
    Failed(String),
    /// Not attempted because an earlier step for the same team failed.
    Skipped(String),
    /// A lookup step that succeeded.
    Done,
}

/// The outcome of one operation performed for a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentStep {
    pub kind: StepKind,
    pub team: String,
    /// Channel name, for channel-level steps.
    pub channel: Option<String>,
    pub status: StepStatus,
}

impl EnrollmentStep {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, StepStatus::Failed(_))
    }

    /// Operator notice for a failed step; `None` for anything else.
    pub fn failure_notice(&self) -> Option<String> {
        let StepStatus::Failed(reason) = &self.status else {
            return None;
        };
        let channel = self.channel.as_deref().unwrap_or_default();
        let notice = match self.kind {
            StepKind::ResolveUser => format!("Could not resolve the joining user: {}", reason),
            StepKind::ResolveTeam => format!("Could not get team by name: {}", self.team),
            StepKind::JoinTeam => format!("Could not add user to team {}", self.team),
            StepKind::ListChannels => {
                format!("Could not list public channels of team {}", self.team)
            }
            StepKind::ListMemberships => {
                format!("Could not list channel memberships in team {}", self.team)
            }
            StepKind::ResolveChannel => format!("Could not get channel by name: {}", channel),
            StepKind::JoinChannel => format!("Could not join channel: {}", channel),
        };
        Some(notice)
    }
}

/// Every step taken for one join, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrollmentReport {
    pub user_id: String,
    pub steps: Vec<EnrollmentStep>,
}

impl EnrollmentReport {
    fn push(&mut self, kind: StepKind, team: &str, channel: Option<&str>, status: StepStatus) {
        self.steps.push(EnrollmentStep {
            kind,
            team: team.to_string(),
            channel: channel.map(str::to_string),
            status,
        });
    }

    pub fn failures(&self) -> impl Iterator<Item = &EnrollmentStep> {
        self.steps.iter().filter(|s| s.is_failure())
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    pub fn added_count(&self) -> usize {
        self.count(|s| matches!(s, StepStatus::Added))
    }

    pub fn already_member_count(&self) -> usize {
        self.count(|s| matches!(s, StepStatus::AlreadyMember))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|s| matches!(s, StepStatus::Skipped(_)))
    }

    fn count(&self, pred: impl Fn(&StepStatus) -> bool) -> usize {
        self.steps
            .iter()
            .filter(|s| s.kind == StepKind::JoinTeam || s.kind == StepKind::JoinChannel)
            .filter(|s| pred(&s.status))
            .count()
    }

    /// `(team, channel)` of every channel the user was newly added to.
    pub fn added_channels(&self) -> Vec<(&str, &str)> {
        self.steps
            .iter()
            .filter(|s| s.kind == StepKind::JoinChannel && s.status == StepStatus::Added)
            .filter_map(|s| s.channel.as_deref().map(|c| (s.team.as_str(), c)))
            .collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "Enrollment finished: {} added, {} already member, {} failed, {} skipped",
            self.added_count(),
            self.already_member_count(),
            self.failure_count(),
            self.skipped_count()
        )
    }
}

impl fmt::Display for EnrollmentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

fn reason(error: &ChannelAdapterError) -> String {
    let message = error.to_string();
    let detail = error.detail();
    if detail == message {
        message
    } else {
        format!("{} ({})", message, detail)
    }
}

/// Applies the enrollment rules to joining users.
pub struct EnrollmentEngine {
    client: Arc<dyn DirectoryClient>,
    rules: Arc<Vec<EnrollmentRule>>,
    role: String,
}

impl EnrollmentEngine {
    pub fn new(client: Arc<dyn DirectoryClient>, rules: Vec<EnrollmentRule>) -> Self {
        Self {
            client,
            rules: Arc::new(rules),
            role: MEMBER_ROLE.to_string(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn rules(&self) -> &[EnrollmentRule] {
        &self.rules
    }

    pub async fn enroll(&self, join: &JoinRequest) -> EnrollmentReport {
        let mut report = EnrollmentReport::default();

        let user_id = match self.resolve_user(join, &mut report).await {
            Some(id) => id,
            None => return report,
        };
        report.user_id = user_id.clone();

        tracing::info!(
            user = %join.label(),
            rules = self.rules.len(),
            "Enrolling new user"
        );

        let rules = self.rules.clone();
        for rule in rules.iter() {
            self.apply_rule(rule, &user_id, &mut report).await;
        }

        tracing::info!(user = %join.label(), "{}", report.summary());
        report
    }

    async fn resolve_user(&self, join: &JoinRequest, report: &mut EnrollmentReport) -> Option<String> {
        if !join.user_id.is_empty() {
            return Some(join.user_id.clone());
        }
        let Some(username) = join.username.as_deref() else {
            report.push(
                StepKind::ResolveUser,
                "",
                None,
                StepStatus::Failed("join event carried no user".to_string()),
            );
            return None;
        };
        match self.client.get_user_by_username(username).await {
            Ok(user) => {
                report.push(StepKind::ResolveUser, "", None, StepStatus::Done);
                Some(user.id)
            }
            Err(e) => {
                tracing::warn!(username = %username, "Could not resolve user: {}", e);
                report.push(StepKind::ResolveUser, "", None, StepStatus::Failed(reason(&e)));
                None
            }
        }
    }

    async fn apply_rule(&self, rule: &EnrollmentRule, user_id: &str, report: &mut EnrollmentReport) {
        let team_name = rule.team.as_str();

        let team = match self.client.get_team_by_name(team_name).await {
            Ok(team) => {
                report.push(StepKind::ResolveTeam, team_name, None, StepStatus::Done);
                team
            }
            Err(e) => {
                tracing::warn!(team = %team_name, "Could not get team by name: {}", e);
                report.push(StepKind::ResolveTeam, team_name, None, StepStatus::Failed(reason(&e)));
                skip_static(rule, report, "team lookup failed");
                return;
            }
        };

        match self.client.add_team_member(&team.id, user_id).await {
            Ok(()) => report.push(StepKind::JoinTeam, team_name, None, StepStatus::Added),
            Err(e) if e.is_conflict() => {
                report.push(StepKind::JoinTeam, team_name, None, StepStatus::AlreadyMember)
            }
            Err(e) => {
                tracing::warn!(team = %team_name, user = %user_id, "Could not add user to team: {}", e);
                report.push(StepKind::JoinTeam, team_name, None, StepStatus::Failed(reason(&e)));
                skip_static(rule, report, "team membership failed");
                return;
            }
        }

        let mut joined: HashSet<String> =
            match self.client.list_channels_for_user(&team.id, user_id).await {
                Ok(channels) => {
                    report.push(StepKind::ListMemberships, team_name, None, StepStatus::Done);
                    channels.into_iter().map(|c| c.id).collect()
                }
                Err(e) => {
                    tracing::warn!(team = %team_name, "Could not list memberships: {}", e);
                    report.push(
                        StepKind::ListMemberships,
                        team_name,
                        None,
                        StepStatus::Failed(reason(&e)),
                    );
                    HashSet::new()
                }
            };

        let targets: Vec<(String, Option<String>)> = match &rule.selection {
            ChannelSelection::Static(names) => {
                names.iter().map(|name| (name.clone(), None)).collect()
            }
            ChannelSelection::AllPublicExcept(excluded) => {
                match self.client.list_public_channels(&team.id).await {
                    Ok(channels) => {
                        report.push(StepKind::ListChannels, team_name, None, StepStatus::Done);
                        channels
                            .into_iter()
                            .filter(|c| !excluded.iter().any(|x| x == &c.name))
                            .map(|c| (c.name, Some(c.id)))
                            .collect()
                    }
                    Err(e) => {
                        tracing::warn!(team = %team_name, "Could not list public channels: {}", e);
                        report.push(
                            StepKind::ListChannels,
                            team_name,
                            None,
                            StepStatus::Failed(reason(&e)),
                        );
                        Vec::new()
                    }
                }
            }
        };

        for (name, known_id) in targets {
            let channel_id = match known_id {
                Some(id) => id,
                None => match self.client.get_channel_by_name(&name, &team.id).await {
                    Ok(channel) => channel.id,
                    Err(e) => {
                        tracing::warn!(team = %team_name, channel = %name, "Could not get channel by name: {}", e);
                        report.push(
                            StepKind::ResolveChannel,
                            team_name,
                            Some(&name),
                            StepStatus::Failed(reason(&e)),
                        );
                        continue;
                    }
                },
            };

            if joined.contains(&channel_id) {
                report.push(StepKind::JoinChannel, team_name, Some(&name), StepStatus::AlreadyMember);
                continue;
            }

            match self
                .client
                .add_channel_member(&channel_id, user_id, &self.role)
                .await
            {
                Ok(_) => {
                    tracing::debug!(team = %team_name, channel = %name, user = %user_id, "Added user to channel");
                    report.push(StepKind::JoinChannel, team_name, Some(&name), StepStatus::Added);
                    joined.insert(channel_id);
                }
                Err(e) if e.is_conflict() => {
                    report.push(StepKind::JoinChannel, team_name, Some(&name), StepStatus::AlreadyMember);
                    joined.insert(channel_id);
                }
                Err(e) => {
                    tracing::warn!(team = %team_name, channel = %name, "Could not join channel: {}", e);
                    report.push(
                        StepKind::JoinChannel,
                        team_name,
                        Some(&name),
                        StepStatus::Failed(reason(&e)),
                    );
                }
            }
        }
    }
}

/// Statically listed channels of a rule whose team step failed.
fn skip_static(rule: &EnrollmentRule, report: &mut EnrollmentReport, why: &str) {
    if let ChannelSelection::Static(names) = &rule.selection {
        for name in names {
            report.push(
                StepKind::JoinChannel,
                &rule.team,
                Some(name),
                StepStatus::Skipped(why.to_string()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailPoint, FakeDirectory, RecordedCall};

    fn join(user_id: &str) -> JoinRequest {
        JoinRequest {
            user_id: user_id.to_string(),
            username: None,
            channel_id: "mon".to_string(),
            trigger_post_id: None,
        }
    }

    fn channel_writes(directory: &FakeDirectory) -> Vec<String> {
        directory
            .membership_writes()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::AddChannelMember { channel_id, .. } => Some(channel_id),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn static_rule_in_order() {
        let directory = Arc::new(
            FakeDirectory::new()
                .with_team("teamX", "tx")
                .with_channel("tx", "general", "c-general")
                .with_channel("tx", "random", "c-random"),
        );
        let engine = EnrollmentEngine::new(
            directory.clone(),
            vec![EnrollmentRule::fixed("teamX", &["general", "random"])],
        );

        let report = engine.enroll(&join("u1")).await;
        assert_eq!(report.failure_count(), 0);
        assert_eq!(
            report.added_channels(),
            vec![("teamX", "general"), ("teamX", "random")]
        );
        assert_eq!(
            directory.membership_writes(),
            vec![
                RecordedCall::AddTeamMember {
                    team_id: "tx".to_string(),
                    user_id: "u1".to_string()
                },
                RecordedCall::AddChannelMember {
                    channel_id: "c-general".to_string(),
                    user_id: "u1".to_string(),
                    role: MEMBER_ROLE.to_string()
                },
                RecordedCall::AddChannelMember {
                    channel_id: "c-random".to_string(),
                    user_id: "u1".to_string(),
                    role: MEMBER_ROLE.to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn failed_channel_does_not_stop_the_rest() {
        let directory = Arc::new(
            FakeDirectory::new()
                .with_team("teamX", "tx")
                .with_channel("tx", "general", "c-general")
                .with_channel("tx", "random", "c-random")
                .failing(FailPoint::ChannelMember("c-general".to_string())),
        );
        let engine = EnrollmentEngine::new(
            directory.clone(),
            vec![EnrollmentRule::fixed("teamX", &["general", "random"])],
        );

        let report = engine.enroll(&join("u1")).await;
        assert_eq!(channel_writes(&directory), vec!["c-general", "c-random"]);
        let notices: Vec<String> = report.failures().filter_map(|s| s.failure_notice()).collect();
        assert_eq!(notices, vec!["Could not join channel: general"]);
        assert!(directory.is_member("c-random", "u1"));
    }

    #[tokio::test]
    async fn missing_channel_is_reported_and_skipped() {
        let directory = Arc::new(
            FakeDirectory::new()
                .with_team("teamX", "tx")
                .with_channel("tx", "random", "c-random"),
        );
        let engine = EnrollmentEngine::new(
            directory.clone(),
            vec![EnrollmentRule::fixed("teamX", &["nope", "random"])],
        );

        let report = engine.enroll(&join("u1")).await;
        let notices: Vec<String> = report.failures().filter_map(|s| s.failure_notice()).collect();
        assert_eq!(notices, vec!["Could not get channel by name: nope"]);
        assert_eq!(channel_writes(&directory), vec!["c-random"]);
    }

    #[tokio::test]
    async fn team_failure_skips_only_that_team() {
        let directory = Arc::new(
            FakeDirectory::new()
                .with_team("teamA", "ta")
                .with_team("teamB", "tb")
                .with_channel("ta", "town", "c-a")
                .with_channel("tb", "town", "c-b")
                .failing(FailPoint::TeamMember("ta".to_string())),
        );
        let engine = EnrollmentEngine::new(
            directory.clone(),
            vec![
                EnrollmentRule::fixed("teamA", &["town"]),
                EnrollmentRule::fixed("teamB", &["town"]),
            ],
        );

        let report = engine.enroll(&join("u1")).await;
        assert_eq!(channel_writes(&directory), vec!["c-b"]);
        assert_eq!(report.skipped_count(), 1);
        assert_eq!(
            report.failures().filter_map(|s| s.failure_notice()).collect::<Vec<_>>(),
            vec!["Could not add user to team teamA"]
        );
    }

    #[tokio::test]
    async fn unknown_team_is_reported() {
        let directory = Arc::new(FakeDirectory::new());
        let engine = EnrollmentEngine::new(
            directory.clone(),
            vec![EnrollmentRule::all_public_except("ghost", &[])],
        );
        let report = engine.enroll(&join("u1")).await;
        assert_eq!(report.failure_count(), 1);
        assert!(directory.membership_writes().is_empty());
    }

    #[tokio::test]
    async fn expansion_excludes_listed_channels() {
        let directory = Arc::new(
            FakeDirectory::new()
                .with_team("teamY", "ty")
                .with_channel("ty", "A", "c-a")
                .with_channel("ty", "B", "c-b")
                .with_channel("ty", "C", "c-c")
                .with_channel("ty", "D", "c-d")
                .with_private_channel("ty", "secret", "c-s"),
        );
        let engine = EnrollmentEngine::new(
            directory.clone(),
            vec![EnrollmentRule::all_public_except("teamY", &["B", "D"])],
        );

        let report = engine.enroll(&join("u1")).await;
        assert_eq!(channel_writes(&directory), vec!["c-a", "c-c"]);
        assert_eq!(report.added_count(), 3);
    }

    #[tokio::test]
    async fn second_run_adds_nothing() {
        let directory = Arc::new(
            FakeDirectory::new()
                .with_team("teamX", "tx")
                .with_channel("tx", "general", "c-general"),
        );
        let engine = EnrollmentEngine::new(
            directory.clone(),
            vec![EnrollmentRule::fixed("teamX", &["general"])],
        );

        engine.enroll(&join("u1")).await;
        let second = engine.enroll(&join("u1")).await;
        assert_eq!(channel_writes(&directory), vec!["c-general"]);
        assert_eq!(second.failure_count(), 0);
        assert!(second.added_channels().is_empty());
    }

    #[tokio::test]
    async fn conflict_counts_as_already_member() {
        let directory = Arc::new(
            FakeDirectory::new()
                .with_team("teamX", "tx")
                .with_channel("tx", "general", "c-general")
                .with_membership("c-general", "u1")
                .failing(FailPoint::Memberships("tx".to_string())),
        );
        let engine = EnrollmentEngine::new(
            directory.clone(),
            vec![EnrollmentRule::fixed("teamX", &["general"])],
        );

        let report = engine.enroll(&join("u1")).await;
        assert_eq!(channel_writes(&directory), vec!["c-general"]);
        let join_step = report
            .steps
            .iter()
            .find(|s| s.kind == StepKind::JoinChannel)
            .unwrap();
        assert_eq!(join_step.status, StepStatus::AlreadyMember);
    }

    #[tokio::test]
    async fn resolves_user_by_name() {
        let directory = Arc::new(
            FakeDirectory::new()
                .with_user("u9", "zed")
                .with_team("teamX", "tx"),
        );
        let engine = EnrollmentEngine::new(
            directory.clone(),
            vec![EnrollmentRule::fixed("teamX", &[])],
        );
        let request = JoinRequest {
            user_id: String::new(),
            username: Some("zed".to_string()),
            channel_id: "mon".to_string(),
            trigger_post_id: None,
        };
        let report = engine.enroll(&request).await;
        assert_eq!(report.user_id, "u9");
        assert!(directory.calls().contains(&RecordedCall::AddTeamMember {
            team_id: "tx".to_string(),
            user_id: "u9".to_string()
        }));
    }
}
