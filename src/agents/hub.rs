//! Push side of an agent: callbacks, background tasks and de-duplication.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use super::IssueCallback;
use crate::issue::Issue;

/// Default for how long a pushed fingerprint stays suppressed.
pub const DEFAULT_REPEAT_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

struct HubState {
    active: bool,
    callbacks: Vec<IssueCallback>,
    /// Fingerprints pushed by periodic re-checks, with the time of the push.
    seen: HashMap<String, Instant>,
    repeat_window: Duration,
}

/// Monitoring machinery shared by every agent.
///
/// Callbacks run while the state lock is held, so once [`MonitorHub::stop`]
/// returns no callback can fire anymore.
pub struct MonitorHub {
    agent: String,
    state: Mutex<HubState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for MonitorHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHub")
            .field("agent", &self.agent)
            .field("active", &self.is_active())
            .finish()
    }
}

impl MonitorHub {
    pub fn new(agent: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            agent: agent.into(),
            state: Mutex::new(HubState {
                active: false,
                callbacks: Vec::new(),
                seen: HashMap::new(),
                repeat_window: DEFAULT_REPEAT_WINDOW,
            }),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Add a callback. Returns `true` when this call started monitoring.
    pub fn register(&self, callback: IssueCallback) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        let started = !state.active;
        state.active = true;
        state.callbacks.push(callback);
        started
    }

    /// Push a still-present problem again once this long has passed since its
    /// last push. Matches the coordinator's retention of live issues.
    pub fn set_repeat_window(&self, window: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.repeat_window = window;
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().map(|s| s.active).unwrap_or(false)
    }

    pub fn callback_count(&self) -> usize {
        self.state.lock().map(|s| s.callbacks.len()).unwrap_or(0)
    }

    /// Deliver an issue to every callback. Dropped while inactive.
    pub fn emit(&self, issue: Issue) -> bool {
        let Ok(state) = self.state.lock() else {
            return false;
        };
        if !state.active {
            return false;
        }
        for callback in &state.callbacks {
            callback(issue.clone());
        }
        true
    }

    /// Deliver an issue unless one with the same fingerprint was pushed within
    /// the repeat window.
    pub fn emit_new(&self, issue: Issue) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        if !state.active {
            return false;
        }
        let now = Instant::now();
        let window = state.repeat_window;
        state.seen.retain(|_, pushed| now.duration_since(*pushed) < window);
        let fingerprint = issue.fingerprint();
        if state.seen.contains_key(&fingerprint) {
            return false;
        }
        state.seen.insert(fingerprint, now);
        for callback in &state.callbacks {
            callback(issue.clone());
        }
        true
    }

    /// Run `check` every `interval` until the hub stops, pushing new issues.
    ///
    /// The first run happens one interval after the call.
    pub fn spawn_periodic<F, Fut>(self: &Arc<Self>, interval: Duration, check: F) -> anyhow::Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<Issue>> + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow::anyhow!("{} monitor needs a tokio runtime: {}", self.agent, e))?;

        let hub = Arc::clone(self);
        let interval = interval.max(Duration::from_millis(10));
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !hub.is_active() {
                    break;
                }
                for issue in check().await {
                    hub.emit_new(issue);
                }
            }
        });
        self.track(handle);
        Ok(())
    }

    /// Keep a background task so `stop()` can abort it.
    pub fn track(&self, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|t| !t.is_finished());
            tasks.push(handle);
        }
    }

    /// Deactivate, drop callbacks and abort background tasks.
    ///
    /// Returns `true` if the hub was active.
    pub fn stop(&self) -> bool {
        let was_active = match self.state.lock() {
            Ok(mut state) => {
                let was_active = state.active;
                state.active = false;
                state.callbacks.clear();
                state.seen.clear();
                was_active
            }
            Err(_) => false,
        };

        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }

        was_active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::{Category, Severity};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback() -> (IssueCallback, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let callback: IssueCallback = Arc::new(move |_issue: Issue| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (callback, count)
    }

    fn issue(title: &str) -> Issue {
        Issue::new(title, "", Severity::Low, Category::Build, "test")
    }

    #[test]
    fn test_first_register_activates() {
        let hub = MonitorHub::new("test");
        let (a, _) = counting_callback();
        let (b, _) = counting_callback();
        assert!(hub.register(a));
        assert!(!hub.register(b));
        assert!(hub.is_active());
        assert_eq!(hub.callback_count(), 2);
    }

    #[test]
    fn test_emit_reaches_every_callback() {
        let hub = MonitorHub::new("test");
        let (a, count_a) = counting_callback();
        let (b, count_b) = counting_callback();
        hub.register(a);
        hub.register(b);

        assert!(hub.emit(issue("x")));
        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_emit_while_inactive_is_dropped() {
        let hub = MonitorHub::new("test");
        assert!(!hub.emit(issue("x")));
    }

    #[test]
    fn test_emit_new_dedupes_by_fingerprint() {
        let hub = MonitorHub::new("test");
        let (cb, count) = counting_callback();
        hub.register(cb);

        assert!(hub.emit_new(issue("same")));
        assert!(!hub.emit_new(issue("same")));
        assert!(hub.emit_new(issue("other")));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_emit_new_repeats_after_window() {
        let hub = MonitorHub::new("test");
        let (cb, count) = counting_callback();
        hub.register(cb);
        hub.set_repeat_window(Duration::from_millis(50));

        assert!(hub.emit_new(issue("persisting")));
        assert!(!hub.emit_new(issue("persisting")));
        std::thread::sleep(Duration::from_millis(70));
        assert!(hub.emit_new(issue("persisting")));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_expired_fingerprints_are_pruned() {
        let hub = MonitorHub::new("test");
        let (cb, _) = counting_callback();
        hub.register(cb);
        hub.set_repeat_window(Duration::from_millis(20));

        for n in 0..10 {
            hub.emit_new(issue(&format!("one-off {}", n)));
        }
        std::thread::sleep(Duration::from_millis(40));
        hub.emit_new(issue("fresh"));
        assert_eq!(hub.state.lock().unwrap().seen.len(), 1);
    }

    #[test]
    fn test_stop_is_idempotent_and_silences_callbacks() {
        let hub = MonitorHub::new("test");
        let (cb, count) = counting_callback();
        hub.register(cb);

        assert!(hub.stop());
        assert!(!hub.stop());
        assert!(!hub.is_active());
        assert_eq!(hub.callback_count(), 0);

        hub.emit(issue("late"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_spawn_periodic_pushes_and_stops() {
        let hub = MonitorHub::new("test");
        let (cb, count) = counting_callback();
        hub.register(cb);

        let ticks = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&ticks);
        hub.spawn_periodic(Duration::from_millis(20), move || {
            let n = t.fetch_add(1, Ordering::SeqCst);
            async move { vec![issue(&format!("tick {}", n % 2))] }
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        hub.stop();
        let pushed = count.load(Ordering::SeqCst);
        // Only two distinct fingerprints ever exist.
        assert_eq!(pushed, 2);

        let ticks_at_stop = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), ticks_at_stop);
    }

    #[test]
    fn test_spawn_periodic_without_runtime_fails() {
        let hub = MonitorHub::new("test");
        let result = hub.spawn_periodic(Duration::from_secs(1), || async { Vec::new() });
        assert!(result.is_err());
    }
}
