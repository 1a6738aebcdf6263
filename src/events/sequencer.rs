use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::receipts::cancel::Cancellation;

/// One FIFO lock per chat. Units of the same chat run one at a time in
/// arrival order; different chats never wait on each other.
#[derive(Clone, Default)]
pub struct ChatSequencer {
    chats: Arc<Mutex<HashMap<u64, Arc<AsyncMutex<()>>>>>,
}

impl ChatSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for this chat's turn. The turn ends when the guard is dropped.
    pub async fn acquire(&self, chat_id: u64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut chats = self.chats.lock().unwrap_or_else(|p| p.into_inner());
            // Idle locks are referenced only by the map.
            chats.retain(|_, lock| Arc::strong_count(lock) > 1);
            chats.entry(chat_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Like `acquire`, but gives up the queue slot when `cancel` fires.
    /// Returns `None` for a unit cancelled before or while it waited.
    pub async fn acquire_unless_cancelled(&self, chat_id: u64, cancel: &Cancellation) -> Option<OwnedMutexGuard<()>> {
        let turn = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            turn = self.acquire(chat_id) => turn,
        };
        if cancel.is_cancelled() {
            return None;
        }
        Some(turn)
    }

    /// Chats with a unit running or queued.
    pub fn active_chats(&self) -> usize {
        let chats = self.chats.lock().unwrap_or_else(|p| p.into_inner());
        chats.values().filter(|lock| Arc::strong_count(lock) > 1).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_chat_waits_for_previous_unit() {
        let sequencer = ChatSequencer::new();
        let first = sequencer.acquire(1).await;

        let blocked = tokio::time::timeout(Duration::from_millis(20), sequencer.acquire(1)).await;
        assert!(blocked.is_err());

        drop(first);
        tokio::time::timeout(Duration::from_millis(100), sequencer.acquire(1))
            .await
            .expect("lock should be free");
    }

    #[tokio::test]
    async fn different_chats_run_concurrently() {
        let sequencer = ChatSequencer::new();
        let _a = sequencer.acquire(1).await;
        tokio::time::timeout(Duration::from_millis(100), sequencer.acquire(2))
            .await
            .expect("other chat must not wait");
    }

    #[tokio::test]
    async fn arrival_order_is_preserved() {
        let sequencer = ChatSequencer::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let gate = sequencer.acquire(7).await;

        let mut tasks = Vec::new();
        for i in 0..3 {
            let sequencer = sequencer.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let _turn = sequencer.acquire(7).await;
                order.lock().unwrap().push(i);
            }));
            // Let each task queue before spawning the next.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(gate);
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn unit_deleted_while_queued_never_gets_a_turn() {
        use crate::receipts::cancel::InFlight;
        use crate::tracking::types::MessageCoordinate;

        let sequencer = ChatSequencer::new();
        let in_flight = InFlight::new();
        let source = MessageCoordinate::new(5, 50);
        let held = sequencer.acquire(5).await;

        let unit = in_flight.register(source);
        let cancel = unit.cancellation().clone();
        let waiter = {
            let sequencer = sequencer.clone();
            tokio::spawn(async move { sequencer.acquire_unless_cancelled(5, &cancel).await.is_some() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(in_flight.cancel(&source));
        let got_turn = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancelled waiter should leave the queue")
            .unwrap();
        assert!(!got_turn);

        drop(held);
        drop(unit);
        assert_eq!(sequencer.active_chats(), 0);
    }

    #[tokio::test]
    async fn uncancelled_unit_gets_its_turn() {
        let sequencer = ChatSequencer::new();
        let cancel = Cancellation::new();
        assert!(sequencer.acquire_unless_cancelled(9, &cancel).await.is_some());

        cancel.cancel();
        assert!(sequencer.acquire_unless_cancelled(9, &cancel).await.is_none());
    }

    #[tokio::test]
    async fn idle_chats_are_pruned() {
        let sequencer = ChatSequencer::new();
        drop(sequencer.acquire(1).await);
        drop(sequencer.acquire(2).await);
        assert_eq!(sequencer.active_chats(), 0);

        let _held = sequencer.acquire(3).await;
        assert_eq!(sequencer.active_chats(), 1);
        assert_eq!(sequencer.chats.lock().unwrap().len(), 1);
    }
}
