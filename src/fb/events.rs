//! 进程内事件扇出注册表
//!
//! 生产者（同步引擎、广告变更检测）与消费者（查看端会话）在单进程内
//! 通过按主题键（页面 ID / 租户 ID）注册的回调解耦。仅保证进程内存级
//! 的尽力投递：无持久化、无重放、无跨进程转发，未订阅的消费者依赖
//! 周期轮询兜底。多实例部署时可在此接口后替换为真正的消息总线。

use crate::fb::ad::detector::AdChange;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

/// 同步事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// 某页面的会话列表发生变化
    ConversationsUpdated { page_id: String, count: usize },
    /// 某会话的消息发生变化
    MessagesUpdated {
        conversation_id: String,
        count: usize,
    },
    /// 某广告账户检测到变更
    AdChangesDetected {
        account_id: String,
        changes: Vec<AdChange>,
    },
    /// 某租户一轮同步结束
    SyncCompleted {
        tenant_id: String,
        success: bool,
        entity_count: i64,
    },
}

/// 事件回调类型
pub type EventCallback = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// 单个已注册回调
struct Registered {
    id: u64,
    callback: EventCallback,
}

/// 事件扇出注册表
///
/// 主题映射是核心中唯一的跨请求共享可变状态，`subscribe` / `unsubscribe` /
/// `publish` 都在同一把锁下执行。回调在锁内同步执行，因此 `unsubscribe`
/// 返回后不会再有该回调被调用；代价是回调必须轻量，且不得回调本注册表。
pub struct EventFanout {
    topics: Mutex<HashMap<String, Vec<Registered>>>,
    next_id: AtomicU64,
}

impl EventFanout {
    /// 创建新的扇出注册表
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            topics: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// 在多个主题键下注册同一个回调，返回可取消的订阅句柄
    ///
    /// 同一个查看端会话可以同时关注多个页面。
    pub fn subscribe<F>(self: &Arc<Self>, topic_keys: &[String], callback: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: EventCallback = Arc::new(callback);

        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        for key in topic_keys {
            topics.entry(key.clone()).or_default().push(Registered {
                id,
                callback: callback.clone(),
            });
        }
        debug!(
            "[FanOut] 注册订阅 id={}, 主题数: {}",
            id,
            topic_keys.len()
        );

        Subscription {
            fanout: Arc::downgrade(self),
            id,
            keys: topic_keys.to_vec(),
        }
    }

    /// 向某主题键发布事件
    ///
    /// 按注册顺序同步调用每个回调；单个回调 panic 会被隔离，
    /// 不影响其余回调继续执行。
    pub fn publish(&self, topic_key: &str, event: &SyncEvent) {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        let Some(list) = topics.get(topic_key) else {
            return;
        };
        debug!(
            "[FanOut] 📢 发布事件，主题: {}, 订阅数: {}",
            topic_key,
            list.len()
        );
        for reg in list.iter() {
            let cb = &reg.callback;
            if catch_unwind(AssertUnwindSafe(|| cb(event))).is_err() {
                warn!(
                    "[FanOut] ⚠️ 回调 panic 已隔离，订阅 id={}, 主题: {}",
                    reg.id, topic_key
                );
            }
        }
    }

    /// 按订阅 ID 从所有相关主题移除回调（重复调用无副作用）
    fn remove(&self, id: u64, keys: &[String]) {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        for key in keys {
            if let Some(list) = topics.get_mut(key) {
                list.retain(|r| r.id != id);
                if list.is_empty() {
                    topics.remove(key);
                }
            }
        }
    }

    /// 当前某主题下的订阅数（诊断用）
    pub fn subscriber_count(&self, topic_key: &str) -> usize {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics.get(topic_key).map(|l| l.len()).unwrap_or(0)
    }
}

/// 订阅句柄：`unsubscribe` 幂等，Drop 时自动取消
pub struct Subscription {
    fanout: Weak<EventFanout>,
    id: u64,
    keys: Vec<String>,
}

impl Subscription {
    /// 取消订阅；返回后保证回调不会再被调用
    pub fn unsubscribe(&self) {
        if let Some(fanout) = self.fanout.upgrade() {
            fanout.remove(self.id, &self.keys);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn conv_event(page_id: &str) -> SyncEvent {
        SyncEvent::ConversationsUpdated {
            page_id: page_id.to_string(),
            count: 1,
        }
    }

    #[test]
    fn test_publish_in_registration_order() {
        let fanout = EventFanout::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        let _s1 = fanout.subscribe(&["p1".to_string()], move |_e| {
            o1.lock().unwrap().push(1);
        });
        let o2 = order.clone();
        let _s2 = fanout.subscribe(&["p1".to_string()], move |_e| {
            o2.lock().unwrap().push(2);
        });

        fanout.publish("p1", &conv_event("p1"));
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_panicking_callback_is_isolated() {
        let fanout = EventFanout::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        let _s1 = fanout.subscribe(&["p1".to_string()], |_e| {
            panic!("callback failure");
        });
        let d = delivered.clone();
        let _s2 = fanout.subscribe(&["p1".to_string()], move |_e| {
            d.fetch_add(1, Ordering::SeqCst);
        });

        // 第一个回调 panic，第二个仍然收到事件
        fanout.publish("p1", &conv_event("p1"));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_multi_key_subscribe_and_unsubscribe() {
        let fanout = EventFanout::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        let d = delivered.clone();
        let sub = fanout.subscribe(&["p1".to_string(), "p2".to_string()], move |_e| {
            d.fetch_add(1, Ordering::SeqCst);
        });

        fanout.publish("p1", &conv_event("p1"));
        fanout.publish("p2", &conv_event("p2"));
        assert_eq!(delivered.load(Ordering::SeqCst), 2);

        // 取消后两个主题都不再投递，重复取消无副作用
        sub.unsubscribe();
        sub.unsubscribe();
        fanout.publish("p1", &conv_event("p1"));
        fanout.publish("p2", &conv_event("p2"));
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
        assert_eq!(fanout.subscriber_count("p1"), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let fanout = EventFanout::new();
        let delivered = Arc::new(AtomicUsize::new(0));
        {
            let d = delivered.clone();
            let _sub = fanout.subscribe(&["p1".to_string()], move |_e| {
                d.fetch_add(1, Ordering::SeqCst);
            });
            fanout.publish("p1", &conv_event("p1"));
        }
        fanout.publish("p1", &conv_event("p1"));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribed_topic_receives_nothing() {
        let fanout = EventFanout::new();
        let delivered = Arc::new(AtomicUsize::new(0));
        let d = delivered.clone();
        let _sub = fanout.subscribe(&["p1".to_string()], move |_e| {
            d.fetch_add(1, Ordering::SeqCst);
        });
        fanout.publish("p2", &conv_event("p2"));
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
    }
}
