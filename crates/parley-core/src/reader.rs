//! Declarative test files.
//!
//! A `*.test.yml`, `*.test.yaml` or `*.test.json` file describes hooks,
//! tests and nested groups without any Rust code:
//!
//! ```yaml
//! before_all:
//!   - send: "!reset"
//!   - wait_ms: 200
//! tests:
//!   - name: ping replies
//!     steps:
//!       - expect: ping
//!         to_return: pong
//! groups:
//!   - name: roles
//!     tests:
//!       - name: promote renames
//!         steps:
//!           - expect: promote
//!             to_rename_role: { name: Admin, role: "42" }
//! ```
//!
//! Files are turned into [`TestFile`]s through a [`Collector`], so groups
//! are registered the same way as in code.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parley_proto::{ChannelLocation, MessageIdentifier, RoleIdentifier, Transport};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::assertion::{
    Matcher, PinMatcher, ReactionMatcher, ToEditMessage, ToRenameRole, ToReturn,
    ToReturnInChannel, ToSetRoleFlag,
};
use crate::collector::Collector;
use crate::expect::TestScope;
use crate::model::TestFile;

const EXTENSIONS: [&str; 3] = ["yml", "yaml", "json"];

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("no test files found in {}", display_paths(.0))]
    NoTestFiles(Vec<PathBuf>),

    #[error("the path '{}' does not exist", .0.display())]
    MissingPath(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("{} is not a .yml, .yaml or .json file", .0.display())]
    UnsupportedExtension(PathBuf),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A file that was skipped because it could not be read.
#[derive(Debug)]
pub struct ReadFailure {
    pub path: PathBuf,
    pub error: ReaderError,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TestFileSpec {
    pub before_all: Vec<ActionSpec>,
    pub after_all: Vec<ActionSpec>,
    #[serde(flatten)]
    pub body: GroupBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GroupBody {
    pub before_each: Vec<ActionSpec>,
    pub after_each: Vec<ActionSpec>,
    pub tests: Vec<TestSpec>,
    pub groups: Vec<GroupSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    #[serde(flatten)]
    pub body: GroupBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestSpec {
    pub name: String,
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StepSpec {
    Expect(AssertionSpec),
    Action(ActionSpec),
}

/// Side effects usable as hooks and as test steps.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ActionSpec {
    Send {
        send: String,
        #[serde(default)]
        channel: Option<ChannelLocation>,
    },
    Wait {
        wait_ms: u64,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssertionSpec {
    /// Command, without the bot prefix.
    pub expect: String,
    #[serde(default)]
    pub not: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub channel: Option<ChannelLocation>,
    #[serde(flatten)]
    pub matcher: MatcherSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherSpec {
    ToReturn(Value),
    ToReturnInChannel {
        content: Value,
        channel: ChannelLocation,
    },
    ToEditMessage {
        message: MessageIdentifier,
        content: Value,
    },
    ToAddReaction(ReactionSpec),
    ToRemoveReaction(ReactionSpec),
    ToPin(MessageIdentifier),
    ToUnpin(MessageIdentifier),
    ToRenameRole {
        name: Value,
        role: RoleIdentifier,
    },
    ToSetRoleMentionable {
        value: Value,
        role: RoleIdentifier,
    },
    ToSetRoleHoist {
        value: Value,
        role: RoleIdentifier,
    },
}

/// Either the emojis alone (checked on the command message) or an object
/// with `emojis` and a target `message`.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "Value")]
pub struct ReactionSpec {
    pub emojis: Value,
    pub message: Option<MessageIdentifier>,
}

impl TryFrom<Value> for ReactionSpec {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(mut fields) if fields.contains_key("emojis") => {
                let emojis = fields.remove("emojis").unwrap_or(Value::Null);
                let message = fields
                    .remove("message")
                    .map(serde_json::from_value::<MessageIdentifier>)
                    .transpose()
                    .map_err(|e| format!("invalid reaction target: {}", e))?;
                Ok(Self { emojis, message })
            }
            emojis => Ok(Self {
                emojis,
                message: None,
            }),
        }
    }
}

impl ReactionSpec {
    fn build(self, new: fn(Value) -> ReactionMatcher) -> ReactionMatcher {
        let matcher = new(self.emojis);
        match self.message {
            Some(target) => matcher.on(target),
            None => matcher,
        }
    }
}

impl MatcherSpec {
    fn build(self) -> Box<dyn Matcher> {
        match self {
            MatcherSpec::ToReturn(content) => Box::new(ToReturn::new(content)),
            MatcherSpec::ToReturnInChannel { content, channel } => {
                Box::new(ToReturnInChannel::new(content, channel))
            }
            MatcherSpec::ToEditMessage { message, content } => {
                Box::new(ToEditMessage::new(message, content))
            }
            MatcherSpec::ToAddReaction(spec) => Box::new(spec.build(ReactionMatcher::add)),
            MatcherSpec::ToRemoveReaction(spec) => {
                Box::new(spec.build(ReactionMatcher::remove))
            }
            MatcherSpec::ToPin(message) => Box::new(PinMatcher::pin(message)),
            MatcherSpec::ToUnpin(message) => Box::new(PinMatcher::unpin(message)),
            MatcherSpec::ToRenameRole { name, role } => Box::new(ToRenameRole::new(name, role)),
            MatcherSpec::ToSetRoleMentionable { value, role } => {
                Box::new(ToSetRoleFlag::mentionable(value, role))
            }
            MatcherSpec::ToSetRoleHoist { value, role } => {
                Box::new(ToSetRoleFlag::hoist(value, role))
            }
        }
    }
}

/// Channel a bare channel id refers to: the default guild is kept.
fn resolve_channel(channel: Option<ChannelLocation>, default: &ChannelLocation) -> ChannelLocation {
    match channel {
        Some(mut channel) => {
            if channel.guild_id.is_none() {
                channel.guild_id.clone_from(&default.guild_id);
            }
            channel
        }
        None => default.clone(),
    }
}

struct ActionRunner {
    transport: Arc<dyn Transport>,
    channel: ChannelLocation,
}

impl ActionRunner {
    async fn run(&self, action: &ActionSpec) -> anyhow::Result<()> {
        match action {
            ActionSpec::Send { send, channel } => {
                let channel = resolve_channel(channel.clone(), &self.channel);
                debug!(channel = %channel, content = %send, "Sending hook message");
                self.transport.send_message(&channel, send).await?;
            }
            ActionSpec::Wait { wait_ms } => {
                tokio::time::sleep(Duration::from_millis(*wait_ms)).await;
            }
        }
        Ok(())
    }
}

/// Turns declarative files into runnable [`TestFile`]s.
pub struct Reader {
    runner: Arc<ActionRunner>,
    exit_on_error: bool,
}

impl Reader {
    /// Hooks send through `transport` in `channel` unless an action names
    /// another channel.
    pub fn new(transport: Arc<dyn Transport>, channel: ChannelLocation) -> Self {
        Self {
            runner: Arc::new(ActionRunner { transport, channel }),
            exit_on_error: false,
        }
    }

    /// Stop at the first unreadable file instead of skipping it.
    pub fn exit_on_error(mut self, exit: bool) -> Self {
        self.exit_on_error = exit;
        self
    }

    /// Expands files and directories into test files, sorted per directory.
    ///
    /// Directories are searched recursively for `*.test.{yml,yaml,json}`.
    /// Files named explicitly only need a supported extension.
    pub fn discover(paths: &[PathBuf]) -> Result<Vec<PathBuf>, ReaderError> {
        let mut found = Vec::new();
        for path in paths {
            if path.is_dir() {
                walk(path, &mut found)?;
            } else if path.is_file() {
                if !has_supported_extension(path) {
                    return Err(ReaderError::UnsupportedExtension(path.clone()));
                }
                if !found.contains(path) {
                    found.push(path.clone());
                }
            } else {
                return Err(ReaderError::MissingPath(path.clone()));
            }
        }
        if found.is_empty() {
            return Err(ReaderError::NoTestFiles(paths.to_vec()));
        }
        debug!(count = found.len(), "Discovered test files");
        Ok(found)
    }

    pub fn parse(path: &Path) -> Result<TestFileSpec, ReaderError> {
        if !has_supported_extension(path) {
            return Err(ReaderError::UnsupportedExtension(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ReaderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_error = |message: String| ReaderError::Parse {
            path: path.to_path_buf(),
            message,
        };
        if content.trim().is_empty() {
            return Err(parse_error("file is empty".to_string()));
        }
        if extension(path) == "json" {
            serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))
        } else {
            serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))
        }
    }

    pub async fn read_file(&self, path: &Path) -> Result<TestFile, ReaderError> {
        let spec = Self::parse(path)?;
        let collector = Collector::new(path);
        let trace: Arc<str> = Arc::from(path.display().to_string());

        for action in spec.before_all {
            let runner = self.runner.clone();
            collector.before_all(move || {
                let runner = runner.clone();
                let action = action.clone();
                async move { runner.run(&action).await }
            });
        }
        for action in spec.after_all {
            let runner = self.runner.clone();
            collector.after_all(move || {
                let runner = runner.clone();
                let action = action.clone();
                async move { runner.run(&action).await }
            });
        }
        register(&collector, spec.body, &self.runner, &trace);

        Ok(collector.finish().await)
    }

    /// Reads every file. Unreadable files are skipped and returned as
    /// failures, or abort the read when `exit_on_error` is set.
    pub async fn read_files(
        &self,
        paths: &[PathBuf],
    ) -> Result<(Vec<TestFile>, Vec<ReadFailure>), ReaderError> {
        let mut files = Vec::with_capacity(paths.len());
        let mut failures = Vec::new();
        for path in paths {
            match self.read_file(path).await {
                Ok(file) => files.push(file),
                Err(error) if self.exit_on_error => return Err(error),
                Err(error) => {
                    warn!(file = %path.display(), error = %error, "Skipping unreadable test file");
                    failures.push(ReadFailure {
                        path: path.clone(),
                        error,
                    });
                }
            }
        }
        Ok((files, failures))
    }
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("channel", &self.runner.channel)
            .field("exit_on_error", &self.exit_on_error)
            .finish_non_exhaustive()
    }
}

fn register(collector: &Collector, body: GroupBody, runner: &Arc<ActionRunner>, trace: &Arc<str>) {
    for action in body.before_each {
        let runner = runner.clone();
        collector.before_each(move || {
            let runner = runner.clone();
            let action = action.clone();
            async move { runner.run(&action).await }
        });
    }
    for action in body.after_each {
        let runner = runner.clone();
        collector.after_each(move || {
            let runner = runner.clone();
            let action = action.clone();
            async move { runner.run(&action).await }
        });
    }

    for test in body.tests {
        if test.skip {
            collector.skip(test.name);
            continue;
        }
        let runner = runner.clone();
        let trace = trace.clone();
        let steps = test.steps;
        collector.test(test.name, move |scope: TestScope| async move {
            let scope = scope.with_trace(trace.to_string());
            for step in steps {
                match step {
                    StepSpec::Expect(assertion) => {
                        let mut expectation = scope.expect(&assertion.expect);
                        if assertion.not {
                            expectation = expectation.not();
                        }
                        if let Some(ms) = assertion.timeout_ms {
                            expectation = expectation.with_timeout(Duration::from_millis(ms));
                        }
                        if assertion.channel.is_some() {
                            expectation = expectation
                                .in_channel(resolve_channel(assertion.channel, &runner.channel));
                        }
                        expectation.evaluate(assertion.matcher.build()).await;
                    }
                    StepSpec::Action(action) => runner.run(&action).await?,
                }
            }
            Ok(())
        });
    }

    for group in body.groups {
        let runner = runner.clone();
        let trace = trace.clone();
        collector.describe(group.name, move |child| {
            register(child, group.body, &runner, &trace);
        });
    }
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) -> Result<(), ReaderError> {
    let io_error = |source| ReaderError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = std::fs::read_dir(dir)
        .map_err(io_error)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_error)?;
    entries.sort();

    for path in entries {
        if path.is_dir() {
            walk(&path, found)?;
        } else if is_test_file(&path) && !found.contains(&path) {
            found.push(path);
        }
    }
    Ok(())
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn has_supported_extension(path: &Path) -> bool {
    EXTENSIONS.contains(&extension(path).as_str())
}

fn is_test_file(path: &Path) -> bool {
    has_supported_extension(path)
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains(".test."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssertionDefaults;
    use crate::executor::TestExecutor;
    use crate::gate::ConnectionGate;
    use crate::model::TestStatus;
    use crate::testing::{MockTransport, role};
    use parley_proto::Occurrence;
    use tempfile::TempDir;

    const GREETINGS: &str = r#"
before_all:
  - send: "setup"
tests:
  - name: ping replies
    steps:
      - expect: ping
        to_return: pong
  - name: not yet
    skip: true
groups:
  - name: roles
    before_each:
      - wait_ms: 1
    tests:
      - name: promote renames
        steps:
          - expect: promote
            timeout_ms: 500
            to_rename_role: { name: Admin, role: "r1" }
"#;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    fn channel() -> ChannelLocation {
        ChannelLocation::new("c").with_guild("g")
    }

    #[test]
    fn test_discover_walks_directories_sorted() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "b.test.yml", "tests: []");
        write(dir.path(), "a.test.json", "{}");
        write(dir.path(), "nested/c.test.yaml", "tests: []");
        write(dir.path(), "notes.yml", "tests: []");
        write(dir.path(), "d.test.txt", "");

        let found = Reader::discover(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.test.json"),
                PathBuf::from("b.test.yml"),
                PathBuf::from("nested/c.test.yaml"),
            ]
        );
    }

    #[test]
    fn test_discover_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Reader::discover(&[dir.path().to_path_buf()]),
            Err(ReaderError::NoTestFiles(_))
        ));
        assert!(matches!(
            Reader::discover(&[dir.path().join("missing")]),
            Err(ReaderError::MissingPath(_))
        ));
        let txt = write(dir.path(), "plan.txt", "x");
        assert!(matches!(
            Reader::discover(&[txt]),
            Err(ReaderError::UnsupportedExtension(_))
        ));
    }

    #[test]
    fn test_parse_steps_and_matchers() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "greetings.test.yml", GREETINGS);
        let spec = Reader::parse(&path).unwrap();

        assert_eq!(spec.before_all.len(), 1);
        assert_eq!(spec.body.tests.len(), 2);
        assert!(spec.body.tests[1].skip);
        let StepSpec::Expect(assertion) = &spec.body.groups[0].body.tests[0].steps[0] else {
            panic!("expected an assertion step");
        };
        assert_eq!(assertion.timeout_ms, Some(500));
        assert!(matches!(
            &assertion.matcher,
            MatcherSpec::ToRenameRole { role, .. } if role == &RoleIdentifier::id("r1")
        ));
    }

    #[test]
    fn test_parse_reaction_shorthand_and_target() {
        let spec: TestFileSpec = serde_json::from_str(
            r#"{"tests": [{"name": "r", "steps": [
                {"expect": "vote", "to_add_reaction": ["a", "b"]},
                {"expect": "vote", "to_remove_reaction": {"emojis": "a", "message": "m1"}},
                {"send": "hello"},
                {"wait_ms": 5}
            ]}]}"#,
        )
        .unwrap();
        let steps = &spec.body.tests[0].steps;
        let StepSpec::Expect(AssertionSpec {
            matcher: MatcherSpec::ToAddReaction(add),
            ..
        }) = &steps[0]
        else {
            panic!("expected to_add_reaction");
        };
        assert_eq!(add.emojis, serde_json::json!(["a", "b"]));
        assert!(add.message.is_none());
        let StepSpec::Expect(AssertionSpec {
            matcher: MatcherSpec::ToRemoveReaction(remove),
            ..
        }) = &steps[1]
        else {
            panic!("expected to_remove_reaction");
        };
        assert_eq!(remove.message, Some(MessageIdentifier::id("m1")));
        assert!(matches!(&steps[2], StepSpec::Action(ActionSpec::Send { .. })));
        assert!(matches!(&steps[3], StepSpec::Action(ActionSpec::Wait { wait_ms: 5 })));
    }

    #[tokio::test]
    async fn test_unreadable_files_are_skipped_or_abort() {
        let dir = TempDir::new().unwrap();
        let good = write(dir.path(), "good.test.yml", "tests: []");
        let bad = write(dir.path(), "bad.test.yml", "tests: [ {");
        let empty = write(dir.path(), "empty.test.json", "  ");
        let mock = MockTransport::connected();

        let reader = Reader::new(Arc::new(mock.clone()), channel());
        let (files, failures) = reader
            .read_files(&[bad.clone(), good.clone(), empty])
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path(), good.as_path());
        assert_eq!(failures.len(), 2);
        assert!(matches!(failures[0].error, ReaderError::Parse { .. }));

        let strict = Reader::new(Arc::new(mock), channel()).exit_on_error(true);
        assert!(strict.read_files(&[good, bad]).await.is_err());
    }

    #[tokio::test]
    async fn test_declarative_file_runs_end_to_end() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "greetings.test.yml", GREETINGS);

        let mock = MockTransport::new();
        mock.reply("!ping", Duration::from_millis(10), "pong");
        let member = role("r1", "Member");
        mock.with_role(member.clone());
        let mut admin = member.clone();
        admin.name = "Admin".to_string();
        mock.respond("!promote", move |_| {
            vec![(
                Duration::from_millis(20),
                Occurrence::RoleUpdate {
                    before: member.clone(),
                    after: admin.clone(),
                },
            )]
        });

        let gate = Arc::new(ConnectionGate::new(Arc::new(mock.clone())));
        gate.login().await.unwrap();
        let reader = Reader::new(Arc::new(mock.clone()), channel());
        let file = reader.read_file(&path).await.unwrap();
        let defaults = AssertionDefaults {
            bot_prefix: "!".to_string(),
            timeout: Duration::from_millis(300),
            channel: channel(),
            bot_id: Some("bot".to_string()),
        };
        let report = TestExecutor::new(gate, defaults).run(vec![file]).await;

        let tests = &report.per_file[0].tests;
        assert_eq!(tests[0].status, TestStatus::Passed);
        assert_eq!(
            tests[0].verdicts[0].trace(),
            Some(path.display().to_string().as_str())
        );
        assert_eq!(tests[1].status, TestStatus::Skipped);
        assert_eq!(tests[2].name, "roles > promote renames");
        assert_eq!(tests[2].status, TestStatus::Passed);
        assert_eq!(
            mock.sent_contents(),
            vec!["setup".to_string(), "!ping".to_string(), "!promote".to_string()]
        );
    }
}
