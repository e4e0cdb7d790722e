//! Singleton timers, one per concern.
//!
//! A timer firing is delivered to the engine as [`Command::TimerFired`]; the
//! generation lets the engine ignore a firing that raced with a cancel.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc::WeakUnboundedSender;
use tokio::task::JoinHandle;

use super::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Clears a paused session after `display.pause_timeout`.
    Pause,
    /// Clears the presence when the source stays down.
    Grace,
    /// Delays surfacing a source disconnection to observers.
    Debounce,
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Debug)]
pub(crate) struct Timers {
    slots: HashMap<TimerKind, Slot>,
    generation: u64,
    tx: WeakUnboundedSender<Command>,
}

impl Timers {
    pub(crate) fn new(tx: WeakUnboundedSender<Command>) -> Self {
        Self {
            slots: HashMap::new(),
            generation: 0,
            tx,
        }
    }

    /// Starts `kind`, cancelling any pending timer of the same kind.
    pub(crate) fn replace(&mut self, kind: TimerKind, delay: Duration) {
        self.cancel(kind);
        self.generation += 1;
        let generation = self.generation;
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::TimerFired { kind, generation });
            }
        });
        self.slots.insert(kind, Slot { generation, handle });
    }

    /// Starts `kind` unless one is already pending. Returns `true` if started.
    pub(crate) fn start_if_idle(&mut self, kind: TimerKind, delay: Duration) -> bool {
        if self.is_pending(kind) {
            return false;
        }
        self.replace(kind, delay);
        true
    }

    pub(crate) fn cancel(&mut self, kind: TimerKind) -> bool {
        match self.slots.remove(&kind) {
            Some(slot) => {
                slot.handle.abort();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_pending(&self, kind: TimerKind) -> bool {
        self.slots.contains_key(&kind)
    }

    /// Consumes the slot if `generation` is the live one.
    pub(crate) fn claim(&mut self, kind: TimerKind, generation: u64) -> bool {
        match self.slots.get(&kind) {
            Some(slot) if slot.generation == generation => {
                self.slots.remove(&kind);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn cancel_all(&mut self) {
        for (_, slot) in self.slots.drain() {
            slot.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    fn fired(cmd: Option<Command>) -> Option<(TimerKind, u64)> {
        match cmd {
            Some(Command::TimerFired { kind, generation }) => Some((kind, generation)),
            _ => None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once() {
        let (tx, mut rx) = unbounded_channel();
        let mut timers = Timers::new(tx.downgrade());

        timers.replace(TimerKind::Pause, Duration::from_secs(30));
        assert!(timers.is_pending(TimerKind::Pause));

        let (kind, generation) = fired(rx.recv().await).unwrap();
        assert_eq!(kind, TimerKind::Pause);
        assert!(timers.claim(kind, generation));
        assert!(!timers.is_pending(TimerKind::Pause));
        assert!(!timers.claim(kind, generation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_if_idle_does_not_stack() {
        let (tx, mut rx) = unbounded_channel();
        let mut timers = Timers::new(tx.downgrade());

        assert!(timers.start_if_idle(TimerKind::Grace, Duration::from_secs(10)));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!timers.start_if_idle(TimerKind::Grace, Duration::from_secs(10)));

        // Le premier minuteur garde son échéance d'origine
        tokio::time::advance(Duration::from_secs(5)).await;
        let (kind, generation) = fired(rx.recv().await).unwrap();
        assert!(timers.claim(kind, generation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (tx, mut rx) = unbounded_channel();
        let mut timers = Timers::new(tx.downgrade());

        timers.replace(TimerKind::Debounce, Duration::from_secs(2));
        assert!(timers.cancel(TimerKind::Debounce));
        assert!(!timers.cancel(TimerKind::Debounce));

        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_generation_is_stale() {
        let (tx, mut rx) = unbounded_channel();
        let mut timers = Timers::new(tx.downgrade());

        timers.replace(TimerKind::Pause, Duration::from_secs(1));
        timers.replace(TimerKind::Pause, Duration::from_secs(3));

        let (kind, generation) = fired(rx.recv().await).unwrap();
        assert_eq!(generation, 2);
        assert!(timers.claim(kind, generation));
        assert!(!timers.claim(kind, 1));
    }
}
