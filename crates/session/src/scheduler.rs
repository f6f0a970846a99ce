//! 키 기반 취소 가능 지연 전달
//!
//! [`Scheduler`]는 지정한 지연 후 메시지를 mpsc 채널로 보냅니다.
//! 같은 키로 다시 예약하면 이전 작업은 취소됩니다.
//!
//! 취소와 전달이 경합할 수 있으므로 메시지에는 epoch/세대를 실어
//! 수신 측에서 늦은 전달을 걸러내야 합니다.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 키 기반 지연 메시지 스케줄러
///
/// 드롭되면 대기 중인 모든 작업을 취소합니다.
pub struct Scheduler<K, M> {
    tx: mpsc::Sender<M>,
    root: CancellationToken,
    tasks: HashMap<K, CancellationToken>,
}

impl<K, M> Scheduler<K, M>
where
    K: Eq + Hash + Clone + Send + 'static,
    M: Send + 'static,
{
    /// 메시지를 보낼 채널로 스케줄러를 생성합니다.
    pub fn new(tx: mpsc::Sender<M>) -> Self {
        Self {
            tx,
            root: CancellationToken::new(),
            tasks: HashMap::new(),
        }
    }

    /// `delay` 후 `message`를 전달하도록 예약합니다.
    ///
    /// 같은 키의 이전 작업은 취소됩니다. tokio 런타임 안에서 호출해야 합니다.
    pub fn schedule(&mut self, key: K, delay: Duration, message: M) {
        self.tasks.retain(|_, token| !token.is_cancelled());
        if let Some(previous) = self.tasks.remove(&key) {
            previous.cancel();
        }

        let deadline = tokio::time::Instant::now() + delay;
        let token = self.root.child_token();
        let task_token = token.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = task_token.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    if tx.send(message).await.is_err() {
                        debug!("scheduler receiver dropped, message discarded");
                    }
                    // 전달 완료 표시
                    task_token.cancel();
                }
            }
        });
        self.tasks.insert(key, token);
    }

    /// 키의 대기 작업을 취소합니다. 취소한 작업이 있으면 `true`.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.tasks.remove(key) {
            Some(token) => {
                let pending = !token.is_cancelled();
                token.cancel();
                pending
            }
            None => false,
        }
    }

    /// 키에 대기 중인 작업이 있는지
    pub fn is_pending(&self, key: &K) -> bool {
        self.tasks.get(key).is_some_and(|t| !t.is_cancelled())
    }

    /// 대기 중인 작업 수
    pub fn pending(&self) -> usize {
        self.tasks.values().filter(|t| !t.is_cancelled()).count()
    }

    /// 모든 대기 작업을 취소합니다.
    pub fn cancel_all(&mut self) {
        for (_, token) in self.tasks.drain() {
            token.cancel();
        }
    }
}

impl<K, M> Drop for Scheduler<K, M> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
