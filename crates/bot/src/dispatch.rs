//! Routes classified events to the enrollment engine or the responder.

use std::sync::Arc;

use pillar_channel_adapter::{DirectoryClient, Event};

use crate::classify::{classify, Classification, IgnoreReason, JoinRequest};
use crate::enrollment::{EnrollmentEngine, EnrollmentReport};
use crate::reporter::StatusReporter;
use crate::responder::MessageResponder;
use crate::session::BotSession;

/// What happened to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Enrolled(EnrollmentReport),
    /// A reply was attempted; `false` when sending it failed.
    Replied { delivered: bool },
    Ignored(IgnoreReason),
}

pub struct Dispatcher {
    session: Arc<BotSession>,
    client: Arc<dyn DirectoryClient>,
    engine: EnrollmentEngine,
    responder: MessageResponder,
    reporter: Arc<StatusReporter>,
}

impl Dispatcher {
    pub fn new(
        session: Arc<BotSession>,
        client: Arc<dyn DirectoryClient>,
        engine: EnrollmentEngine,
        reporter: Arc<StatusReporter>,
    ) -> Self {
        Self {
            session,
            client,
            engine,
            responder: MessageResponder::default(),
            reporter,
        }
    }

    pub fn with_responder(mut self, responder: MessageResponder) -> Self {
        self.responder = responder;
        self
    }

    pub fn session(&self) -> &BotSession {
        &self.session
    }

    /// Handle one event to completion. Failures are reported, never returned.
    pub async fn dispatch(&self, event: Event) -> DispatchOutcome {
        let kind = event.kind().to_string();
        match classify(event, &self.session) {
            Classification::Join(join) => DispatchOutcome::Enrolled(self.on_join(&join).await),
            Classification::PostedMessage(post) => {
                let delivered = match self.responder.respond(self.client.as_ref(), &post).await {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::warn!(post_id = %post.id, "Failed to reply: {}", e);
                        false
                    }
                };
                DispatchOutcome::Replied { delivered }
            }
            Classification::Ignored(reason) => {
                tracing::trace!(kind = %kind, reason = ?reason, "Ignoring event");
                DispatchOutcome::Ignored(reason)
            }
        }
    }

    /// Enroll the joining user and report to the debug channel.
    ///
    /// A join post is echoed with a notice and a summary. A bare
    /// `user_added` frame arrives alongside that post for the same join, so
    /// its notice and summary only go to the log. Failure notices are always
    /// posted.
    async fn on_join(&self, join: &JoinRequest) -> EnrollmentReport {
        // A root post must live in the channel the reply is posted to.
        let thread = join
            .trigger_post_id
            .as_deref()
            .filter(|_| self.reporter.channel_id() == Some(join.channel_id.as_str()));
        let announce = join.trigger_post_id.is_some();

        let notice = format!("new user {} joined", join.label());
        if announce {
            self.reporter.info(&notice, thread).await;
        } else {
            tracing::debug!(user_id = %join.user_id, "{}", notice);
        }

        let report = self.engine.enroll(join).await;

        for step in report.failures() {
            if let Some(notice) = step.failure_notice() {
                self.reporter.failure(&notice, thread).await;
            }
        }
        if announce {
            self.reporter.info(&report.summary(), thread).await;
        } else {
            tracing::debug!(user_id = %join.user_id, "{}", report.summary());
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnrollmentRule;
    use crate::testing::{join_post_event, message_event, FailPoint, FakeDirectory};
    use pillar_channel_adapter::{Channel, Team, User};

    fn setup(directory: FakeDirectory, rules: Vec<EnrollmentRule>) -> (Arc<FakeDirectory>, Dispatcher) {
        setup_with_debug(directory, rules, "dbg")
    }

    fn setup_with_debug(
        directory: FakeDirectory,
        rules: Vec<EnrollmentRule>,
        debug_channel_id: &str,
    ) -> (Arc<FakeDirectory>, Dispatcher) {
        let directory = Arc::new(directory);
        let session = BotSession::new(
            User {
                id: "bot".to_string(),
                ..User::default()
            },
            Team::default(),
        )
        .with_debug_channel(Channel {
            id: debug_channel_id.to_string(),
            ..Channel::default()
        })
        .with_monitored_channel(Channel {
            id: "mon".to_string(),
            ..Channel::default()
        });
        let reporter = Arc::new(StatusReporter::new(
            directory.clone(),
            Some(debug_channel_id.to_string()),
        ));
        let engine = EnrollmentEngine::new(directory.clone(), rules);
        let dispatcher = Dispatcher::new(Arc::new(session), directory.clone(), engine, reporter);
        (directory, dispatcher)
    }

    #[tokio::test]
    async fn join_reports_unthreaded_when_debug_channel_differs() {
        let (directory, dispatcher) = setup(
            FakeDirectory::new()
                .with_post("mon", "p1")
                .with_team("teamX", "tx")
                .with_channel("tx", "general", "c-g")
                .failing(FailPoint::Channel("random".to_string())),
            vec![EnrollmentRule::fixed("teamX", &["general", "random"])],
        );

        let outcome = dispatcher
            .dispatch(join_post_event("mon", "p1", "u1", "alice"))
            .await;
        assert!(matches!(outcome, DispatchOutcome::Enrolled(ref r) if r.failure_count() == 1));

        let posts = directory.posts();
        assert_eq!(posts.len(), 3);
        assert_eq!(posts[0].1, "new user u1 (alice) joined");
        assert_eq!(posts[1].1, "Could not get channel by name: random");
        assert!(posts[2].1.starts_with("Enrollment finished"));
        assert!(posts
            .iter()
            .all(|(channel, _, root)| channel == "dbg" && root.is_none()));
    }

    #[tokio::test]
    async fn join_reports_in_thread_when_debug_channel_is_monitored() {
        let (directory, dispatcher) = setup_with_debug(
            FakeDirectory::new()
                .with_post("mon", "p1")
                .with_team("teamX", "tx")
                .with_channel("tx", "general", "c-g"),
            vec![EnrollmentRule::fixed("teamX", &["general"])],
            "mon",
        );

        dispatcher
            .dispatch(join_post_event("mon", "p1", "u1", "alice"))
            .await;

        let posts = directory.posts();
        assert_eq!(posts.len(), 2);
        assert!(posts
            .iter()
            .all(|(channel, _, root)| channel == "mon" && root.as_deref() == Some("p1")));
    }

    #[tokio::test]
    async fn user_added_frame_posts_only_failures() {
        let (directory, dispatcher) = setup(
            FakeDirectory::new()
                .with_team("teamX", "tx")
                .with_channel("tx", "general", "c-g")
                .failing(FailPoint::Channel("random".to_string())),
            vec![EnrollmentRule::fixed("teamX", &["general", "random"])],
        );

        let outcome = dispatcher
            .dispatch(Event::UserJoined {
                user_id: "u1".to_string(),
                channel_id: "mon".to_string(),
            })
            .await;
        assert!(matches!(outcome, DispatchOutcome::Enrolled(ref r) if r.added_count() == 2));

        assert_eq!(
            directory.posts(),
            vec![(
                "dbg".to_string(),
                "Could not get channel by name: random".to_string(),
                None
            )]
        );
    }

    #[tokio::test]
    async fn message_gets_reply() {
        let (directory, dispatcher) = setup(FakeDirectory::new(), vec![]);
        let outcome = dispatcher
            .dispatch(message_event("mon", "p5", "u1", "are you alive?"))
            .await;
        assert_eq!(outcome, DispatchOutcome::Replied { delivered: true });
        assert_eq!(
            directory.posts(),
            vec![(
                "mon".to_string(),
                "Yes I'm running".to_string(),
                Some("p5".to_string())
            )]
        );
    }

    #[tokio::test]
    async fn failed_reply_is_absorbed() {
        let (_, dispatcher) = setup(FakeDirectory::new().fail_posts(), vec![]);
        let outcome = dispatcher
            .dispatch(message_event("mon", "p5", "u1", "hi there"))
            .await;
        assert_eq!(outcome, DispatchOutcome::Replied { delivered: false });
    }

    #[tokio::test]
    async fn own_message_causes_no_calls() {
        let (directory, dispatcher) = setup(FakeDirectory::new(), vec![]);
        let outcome = dispatcher
            .dispatch(message_event("mon", "p5", "bot", "hello"))
            .await;
        assert_eq!(outcome, DispatchOutcome::Ignored(IgnoreReason::SelfAuthored));
        assert!(directory.calls().is_empty());
    }
}
