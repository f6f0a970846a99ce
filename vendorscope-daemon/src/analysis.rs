//! Per-tab analysis debounce.
//!
//! Load-triggered submissions are analysed at once. Mutation-triggered
//! submissions are held for the debounce window; a newer submission for
//! the same tab replaces the pending one. Each submission takes a fresh
//! generation from a debouncer-wide counter, so a late timer for a replaced
//! or forgotten submission is dropped.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use vendorscope_core::types::{SignalBundle, TabId};
use vendorscope_session::Scheduler;

use crate::protocol::Trigger;

/// Debounce channel capacity.
const DEBOUNCE_CHANNEL_CAPACITY: usize = 256;

/// A debounce timer firing for one tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebouncedAnalysis {
    /// Tab the submission belongs to.
    pub tab_id: TabId,
    /// Generation at schedule time.
    pub generation: u64,
}

/// A submission ready to be analysed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAnalysis {
    /// Tab URL at submission time.
    pub url: String,
    /// Signals to analyse.
    pub bundle: SignalBundle,
}

/// Outcome of [`AnalysisDebouncer::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Analyse now.
    Immediate(PendingAnalysis),
    /// Held until the debounce timer fires.
    Deferred,
}

/// Per-tab debouncer for signal submissions.
pub struct AnalysisDebouncer {
    window: Duration,
    scheduler: Scheduler<TabId, DebouncedAnalysis>,
    pending: HashMap<TabId, PendingAnalysis>,
    generations: HashMap<TabId, u64>,
    next_generation: u64,
}

impl AnalysisDebouncer {
    /// Create a debouncer and the receiver its timers are delivered on.
    pub fn new(window: Duration) -> (Self, mpsc::Receiver<DebouncedAnalysis>) {
        let (tx, rx) = mpsc::channel(DEBOUNCE_CHANNEL_CAPACITY);
        let debouncer = Self {
            window,
            scheduler: Scheduler::new(tx),
            pending: HashMap::new(),
            generations: HashMap::new(),
            next_generation: 0,
        };
        (debouncer, rx)
    }

    /// Accept a submission.
    ///
    /// Must be called inside a tokio runtime.
    pub fn submit(
        &mut self,
        tab_id: TabId,
        url: String,
        bundle: SignalBundle,
        trigger: Trigger,
    ) -> Submission {
        let generation = self.bump(tab_id);
        let analysis = PendingAnalysis { url, bundle };
        match trigger {
            Trigger::Load => {
                self.scheduler.cancel(&tab_id);
                self.pending.remove(&tab_id);
                Submission::Immediate(analysis)
            }
            Trigger::Mutation => {
                self.pending.insert(tab_id, analysis);
                self.scheduler.schedule(
                    tab_id,
                    self.window,
                    DebouncedAnalysis { tab_id, generation },
                );
                debug!(tab_id, generation, "analysis deferred");
                Submission::Deferred
            }
        }
    }

    /// Take the pending submission for a fired timer.
    ///
    /// Returns `None` when the timer belongs to a replaced submission.
    pub fn fire(&mut self, timer: DebouncedAnalysis) -> Option<PendingAnalysis> {
        if self.generations.get(&timer.tab_id) != Some(&timer.generation) {
            debug!(
                tab_id = timer.tab_id,
                generation = timer.generation,
                "stale debounce timer dropped"
            );
            return None;
        }
        self.pending.remove(&timer.tab_id)
    }

    /// Drop all state for a tab.
    pub fn forget(&mut self, tab_id: TabId) {
        self.scheduler.cancel(&tab_id);
        self.pending.remove(&tab_id);
        self.generations.remove(&tab_id);
    }

    /// Whether a submission is waiting for its timer.
    pub fn is_pending(&self, tab_id: TabId) -> bool {
        self.pending.contains_key(&tab_id)
    }

    /// Cancel every pending timer.
    pub fn shutdown(&mut self) {
        self.scheduler.cancel_all();
        self.pending.clear();
    }

    fn bump(&mut self, tab_id: TabId) -> u64 {
        self.next_generation += 1;
        self.generations.insert(tab_id, self.next_generation);
        self.next_generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vendorscope_core::types::Signal;

    const WINDOW: Duration = Duration::from_millis(500);

    fn bundle(value: &str) -> SignalBundle {
        SignalBundle::new(vec![Signal::cookie("c", value)])
    }

    #[tokio::test(start_paused = true)]
    async fn load_is_immediate() {
        let (mut debouncer, _rx) = AnalysisDebouncer::new(WINDOW);
        let outcome = debouncer.submit(1, "https://a.test".into(), bundle("x"), Trigger::Load);
        assert!(matches!(outcome, Submission::Immediate(p) if p.url == "https://a.test"));
        assert!(!debouncer.is_pending(1));
    }

    #[tokio::test(start_paused = true)]
    async fn mutations_collapse_to_latest() {
        let (mut debouncer, mut rx) = AnalysisDebouncer::new(WINDOW);
        debouncer.submit(1, "u".into(), bundle("first"), Trigger::Mutation);
        tokio::time::sleep(Duration::from_millis(200)).await;
        debouncer.submit(1, "u".into(), bundle("second"), Trigger::Mutation);

        let timer = rx.recv().await.unwrap();
        assert_eq!(timer.generation, 2);
        let pending = debouncer.fire(timer).unwrap();
        assert_eq!(pending.bundle, bundle("second"));
        assert!(!debouncer.is_pending(1));
    }

    #[tokio::test(start_paused = true)]
    async fn load_supersedes_pending_mutation() {
        let (mut debouncer, _rx) = AnalysisDebouncer::new(WINDOW);
        debouncer.submit(1, "u".into(), bundle("m"), Trigger::Mutation);
        debouncer.submit(1, "u".into(), bundle("l"), Trigger::Load);
        assert!(!debouncer.is_pending(1));
        assert!(debouncer.fire(DebouncedAnalysis { tab_id: 1, generation: 1 }).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn forget_drops_pending() {
        let (mut debouncer, _rx) = AnalysisDebouncer::new(WINDOW);
        debouncer.submit(4, "u".into(), bundle("m"), Trigger::Mutation);
        debouncer.forget(4);
        assert!(!debouncer.is_pending(4));
        assert!(debouncer.fire(DebouncedAnalysis { tab_id: 4, generation: 1 }).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_from_before_forget_does_not_take_new_submission() {
        let (mut debouncer, mut rx) = AnalysisDebouncer::new(WINDOW);
        debouncer.submit(4, "u".into(), bundle("old"), Trigger::Mutation);
        debouncer.forget(4);
        debouncer.submit(4, "u".into(), bundle("new"), Trigger::Mutation);

        assert!(debouncer.fire(DebouncedAnalysis { tab_id: 4, generation: 1 }).is_none());
        assert!(debouncer.is_pending(4));

        let timer = rx.recv().await.unwrap();
        assert_eq!(timer.generation, 2);
        assert_eq!(debouncer.fire(timer).unwrap().bundle, bundle("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn generations_are_unique_across_tabs() {
        let (mut debouncer, mut rx) = AnalysisDebouncer::new(WINDOW);
        debouncer.submit(1, "u".into(), bundle("a"), Trigger::Mutation);
        debouncer.submit(2, "u".into(), bundle("b"), Trigger::Mutation);

        let mut seen = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        seen.sort_by_key(|t| t.tab_id);
        assert_eq!(seen[0].generation, 1);
        assert_eq!(seen[1].generation, 2);
    }
}
