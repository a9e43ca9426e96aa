//! Notifier adapters: structured log output and an in-memory recorder.

use crate::ports::{Notification, Notifier, Severity};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Logs notifications through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, agent: &str, notification: Notification) {
        match notification.severity() {
            Severity::Critical => error!("[notify] agent={} {:?}", agent, notification),
            Severity::Warning => warn!("[notify] agent={} {:?}", agent, notification),
            Severity::Info => info!("[notify] agent={} {:?}", agent, notification),
        }
    }
}

/// Keeps every notification for inspection.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<(String, Notification)>>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications delivered so far.
    pub fn notifications(&self) -> Vec<(String, Notification)> {
        self.delivered.lock().clone()
    }

    /// Number of notifications matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Notification) -> bool) -> usize {
        self.delivered
            .lock()
            .iter()
            .filter(|(_, n)| predicate(n))
            .count()
    }

    /// Forget everything recorded.
    pub fn clear(&self) {
        self.delivered.lock().clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, agent: &str, notification: Notification) {
        self.delivered.lock().push((agent.to_string(), notification));
    }
}

/// Delivers to several notifiers in order.
#[derive(Default)]
pub struct FanoutNotifier {
    targets: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    /// Fan out to `targets`.
    pub fn new(targets: Vec<Arc<dyn Notifier>>) -> Self {
        Self { targets }
    }
}

impl Notifier for FanoutNotifier {
    fn notify(&self, agent: &str, notification: Notification) {
        for target in &self.targets {
            target.notify(agent, notification.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_notifier() {
        let recorder = RecordingNotifier::new();
        recorder.notify("0xvault", Notification::AgentDestroyed);
        recorder.notify("0xvault", Notification::MintingExecuted { request_id: 3 });
        assert_eq!(recorder.notifications().len(), 2);
        assert_eq!(
            recorder.count(|n| matches!(n, Notification::MintingExecuted { .. })),
            1
        );
        recorder.clear();
        assert!(recorder.notifications().is_empty());
    }

    #[test]
    fn test_fanout_reaches_every_target() {
        let a = Arc::new(RecordingNotifier::new());
        let b = Arc::new(RecordingNotifier::new());
        let fanout = FanoutNotifier::new(vec![a.clone(), b.clone(), Arc::new(TracingNotifier)]);
        fanout.notify("0xvault", Notification::ExitedAvailable);
        assert_eq!(a.notifications().len(), 1);
        assert_eq!(b.notifications().len(), 1);
    }
}
