//! End-to-end assertion behaviour against the scripted transport.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parley_core::testing::{MockTransport, message, reaction, role};
use parley_core::{AssertionDefaults, AssertionEngine, TestScope};
use parley_proto::{ChannelLocation, MessageIdentifier, Occurrence, Transport};

fn scope(mock: &MockTransport, timeout: Duration) -> TestScope {
    let defaults = AssertionDefaults {
        bot_prefix: "!".to_string(),
        timeout,
        channel: ChannelLocation::new("c").with_guild("g"),
        bot_id: Some("bot".to_string()),
    };
    TestScope::new(AssertionEngine::new(Arc::new(mock.clone())), Arc::new(defaults))
}

/// Scripts `!promote` to rename role r1 from Member to Admin after 100ms.
fn promoting_bot() -> MockTransport {
    let mock = MockTransport::connected();
    let member = role("r1", "Member");
    mock.with_role(member.clone());
    let mut admin = member.clone();
    admin.name = "Admin".to_string();
    mock.respond("!promote", move |_| {
        vec![(
            Duration::from_millis(100),
            Occurrence::RoleUpdate {
                before: member.clone(),
                after: admin.clone(),
            },
        )]
    });
    mock
}

#[tokio::test]
async fn rename_to_expected_name_passes() {
    let mock = promoting_bot();
    let t = scope(&mock, Duration::from_millis(500));

    let verdict = t.expect("promote").to_rename_role("Admin", "r1").await;

    assert!(verdict.passed(), "{}", verdict);
    assert_eq!(mock.events().active_subscriptions(), 0);
}

#[tokio::test]
async fn negated_rename_reports_the_matching_name() {
    let mock = promoting_bot();
    let t = scope(&mock, Duration::from_millis(500));

    let verdict = t.expect("promote").not().to_rename_role("Admin", "r1").await;

    assert!(!verdict.passed());
    let mut lines = verdict.message().lines();
    let expected = lines.next().unwrap();
    let received = lines.next().unwrap();
    assert!(expected.starts_with("expected: "));
    assert!(expected.contains("not to be renamed to 'Admin'"));
    assert_eq!(received, "received: role renamed to 'Admin'");
    assert!(!received.contains("not"));
}

#[tokio::test]
async fn missing_pin_fails_after_the_timeout_and_releases() {
    let mock = MockTransport::connected();
    let t = scope(&mock, Duration::from_millis(200));

    let started = Instant::now();
    let verdict = t.expect("pin").to_pin(MessageIdentifier::id("m1")).await;

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(!verdict.passed());
    assert!(verdict.message().contains("did not occur"));
    assert_eq!(mock.events().active_subscriptions(), 0);

    let late = Occurrence::MessagePinned {
        message: message("m1", "c", "bot", "pinned"),
    };
    assert_eq!(mock.emit(late), 0);
}

#[tokio::test]
async fn negated_assertion_passes_when_nothing_happens() {
    let mock = MockTransport::connected();
    let t = scope(&mock, Duration::from_millis(100));

    let unpin = t.expect("unpin").not().to_unpin(MessageIdentifier::id("m1")).await;
    let reply = t.expect("ping").not().to_return("pong").await;

    assert!(unpin.passed(), "{}", unpin);
    assert!(reply.passed(), "{}", reply);
    assert_eq!(t.verdicts().len(), 2);
}

#[tokio::test]
async fn invalid_parameters_send_nothing() {
    let mock = promoting_bot();
    let t = scope(&mock, Duration::from_millis(100));

    let verdict = t.expect("promote").to_set_role_mentionable("yes", "r1").await;

    assert!(!verdict.passed());
    assert!(verdict.message().contains("boolean"));
    assert!(mock.sent().is_empty());
    assert_eq!(mock.events().active_subscriptions(), 0);
}

#[tokio::test]
async fn send_failure_becomes_a_failing_verdict() {
    let mock = MockTransport::connected();
    mock.fail_sends("channel is read-only");
    let t = scope(&mock, Duration::from_millis(100));

    let verdict = t.expect("ping").to_return("pong").await;

    assert!(!verdict.passed());
    assert!(verdict.message().contains("channel is read-only"));
    assert_eq!(mock.events().active_subscriptions(), 0);
}

#[tokio::test]
async fn reactions_resolve_once_every_emoji_is_seen() {
    let mock = MockTransport::connected();
    mock.respond("!vote", |stimulus| {
        let on = |emoji: &str| Occurrence::ReactionAdd {
            reaction: reaction(&stimulus.id, emoji),
        };
        vec![
            (Duration::from_millis(20), on("👍")),
            (Duration::from_millis(40), on("👎")),
        ]
    });
    let t = scope(&mock, Duration::from_millis(500));

    let verdict = t.expect("vote").to_add_reaction(vec!["👍", "👎"]).await;

    assert!(verdict.passed(), "{}", verdict);
    assert_eq!(mock.events().active_subscriptions(), 0);
}
