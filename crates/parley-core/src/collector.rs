//! Registration API used while a test file is being loaded.
//!
//! `describe` callbacks are deferred: they are queued and run once the
//! file's own registration code has finished, so hooks declared anywhere in
//! a group are in place before the group's tests run. Groups declared inside
//! a group are queued again and drained until none remain.

use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::expect::TestScope;
use crate::hooks::{HookError, HookQueue};
use crate::model::{SuiteId, Test, TestFile};

struct CollectorState {
    file: TestFile,
    groups: HookQueue,
}

/// Collects tests, hooks and groups for one [`TestFile`].
///
/// Clones share the same file; each clone remembers the group it was
/// handed out for.
#[derive(Clone)]
pub struct Collector {
    state: Arc<Mutex<CollectorState>>,
    suite: Option<SuiteId>,
}

impl Collector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            state: Arc::new(Mutex::new(CollectorState {
                file: TestFile::new(path),
                groups: HookQueue::new(),
            })),
            suite: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CollectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The group this handle registers into, if any.
    pub fn suite(&self) -> Option<SuiteId> {
        self.suite
    }

    pub fn test<F, Fut>(&self, name: impl Into<String>, body: F)
    where
        F: FnOnce(TestScope) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let test = Test::new(name, self.suite, body);
        self.lock().file.add_test(test);
    }

    /// Registers a test that is reported as skipped and never run.
    pub fn skip(&self, name: impl Into<String>) {
        let test = Test::skipped(name, self.suite);
        self.lock().file.add_test(test);
    }

    /// Runs once before the first test of the file.
    pub fn before_all<F, Fut>(&self, hook: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.lock().file.before_all.enqueue(hook);
    }

    /// Runs once after the last test of the file.
    pub fn after_all<F, Fut>(&self, hook: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.lock().file.after_all.enqueue(hook);
    }

    /// Runs before every test in this group and the groups nested in it.
    pub fn before_each<F, Fut>(&self, hook: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut state = self.lock();
        match self.suite.and_then(|id| state.file.suite_mut(id)) {
            Some(suite) => suite.before_each.enqueue(hook),
            None => state.file.before_each.enqueue(hook),
        }
    }

    /// Runs after every test in this group and the groups nested in it.
    pub fn after_each<F, Fut>(&self, hook: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut state = self.lock();
        match self.suite.and_then(|id| state.file.suite_mut(id)) {
            Some(suite) => suite.after_each.enqueue(hook),
            None => state.file.after_each.enqueue(hook),
        }
    }

    /// Declares a group. `body` runs after the current registration phase.
    pub fn describe<F>(&self, name: impl Into<String>, body: F)
    where
        F: FnOnce(&Collector) + Send + 'static,
    {
        let name = name.into();
        let parent = self.suite;
        let handle = self.clone();
        let mut body = Some(body);
        self.lock().groups.enqueue(move || {
            if let Some(body) = body.take() {
                let id = handle.lock().file.add_suite(name.clone(), parent);
                let child = Collector {
                    state: handle.state.clone(),
                    suite: Some(id),
                };
                debug!(group = %name, "Registering group");
                body(&child);
            }
            futures::future::ready(Ok::<(), anyhow::Error>(()))
        });
    }

    /// Drains deferred groups until none remain and returns the file.
    pub async fn finish(self) -> TestFile {
        let mut errors: Vec<HookError> = Vec::new();
        loop {
            let mut groups = self.lock().groups.take();
            if groups.is_empty() {
                break;
            }
            errors.extend(groups.drain().await);
        }
        let mut state = self.lock();
        let mut file = std::mem::replace(&mut state.file, TestFile::new(PathBuf::new()));
        file.group_errors.extend(errors);
        file
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Collector")
            .field("path", &state.file.path)
            .field("suite", &self.suite)
            .field("tests", &state.file.tests.len())
            .field("pending_groups", &state.groups.len())
            .finish()
    }
}
