//! 按聚合键加锁
//!
//! 同一个聚合上的读-改-写串行执行，不同聚合互不影响。
//! 没有持有者的锁条目在释放时回收。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct AggregateLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// 持有期间独占对应聚合，析构时释放
pub struct AggregateGuard {
    key: String,
    slot: Arc<AsyncMutex<()>>,
    locks: Arc<AggregateLocks>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl AggregateLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn acquire(self: &Arc<Self>, key: impl Into<String>) -> AggregateGuard {
        let key = key.into();
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = slot.clone().lock_owned().await;
        AggregateGuard {
            key,
            slot,
            locks: Arc::clone(self),
            guard: Some(guard),
        }
    }

    /// 当前登记的锁条目数
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for AggregateGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut slots = self.locks.slots.lock().unwrap_or_else(|p| p.into_inner());
        // 表里一份，自己一份：没有其他任务在等
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = AggregateLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                tokio::spawn(async move {
                    let _guard = locks.acquire("match:a:b").await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = AggregateLocks::new();
        let _a = locks.acquire("room:a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("room:b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
