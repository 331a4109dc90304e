//! 命名计时器表
//!
//! 每个键最多一个计时器：`arm` 会先取消同键旧计时器。计时器在 tokio 任务中休眠，
//! 到期后把 `Fired` 发回事件循环；取消通过 `CancellationToken` 完成。
//! 每次 arm 分配递增的 generation，事件循环用 `accept` 丢弃与取消/重设赛跑的过期触发。
//! 本模块不理解任何注册语义，键与负载类型由调用方决定。

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// 一次到期触发
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired<K, P> {
    pub key: K,
    pub generation: u64,
    pub payload: P,
}

#[derive(Debug)]
struct Armed {
    generation: u64,
    token: CancellationToken,
}

pub struct TimeoutRegistry<K, P> {
    timers: HashMap<K, Armed>,
    next_generation: u64,
    tx: mpsc::UnboundedSender<Fired<K, P>>,
}

impl<K, P> TimeoutRegistry<K, P>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    P: Send + 'static,
{
    /// 返回计时器表与到期事件接收端
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Fired<K, P>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                timers: HashMap::new(),
                next_generation: 0,
                tx,
            },
            rx,
        )
    }

    /// 设定计时器，替换同键旧计时器；返回本次的 generation
    pub fn arm(&mut self, key: K, after: Duration, payload: P) -> u64 {
        self.cancel(&key);
        self.next_generation += 1;
        let generation = self.next_generation;

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let tx = self.tx.clone();
        let fired_key = key.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    let _ = tx.send(Fired { key: fired_key, generation, payload });
                }
            }
        });

        tracing::debug!("Timer {:?} armed for {:?} (gen {})", key, after, generation);
        self.timers.insert(key, Armed { generation, token });
        generation
    }

    /// 取消指定计时器；不存在时什么也不做
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.timers.remove(key) {
            Some(armed) => {
                armed.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, armed) in self.timers.drain() {
            armed.token.cancel();
        }
    }

    /// 触发是否仍对应当前计时器；接受后该键视为已结束
    pub fn accept(&mut self, fired: &Fired<K, P>) -> bool {
        match self.timers.get(&fired.key) {
            Some(armed) if armed.generation == fired.generation => {
                self.timers.remove(&fired.key);
                true
            }
            _ => {
                tracing::debug!("Dropping stale timer fire {:?} (gen {})", fired.key, fired.generation);
                false
            }
        }
    }

    pub fn is_armed(&self, key: &K) -> bool {
        self.timers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl<K, P> Drop for TimeoutRegistry<K, P> {
    fn drop(&mut self) {
        for (_, armed) in self.timers.drain() {
            armed.token.cancel();
        }
    }
}
