//! Room leases and the subscription bus.
//!
//! A lease is `(owner, deadline)` per thread with a fixed TTL. `claim`
//! is unconditional, so re-claiming by the current owner doubles as
//! renewal. A periodic task sweeps expired leases and announces the
//! vacancy. Fan-out is non-blocking: a full client queue drops the
//! notification and the client catches up through the cursor carried
//! by every `room/event`.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::task::JoinHandle;

use acs_core::types::now_ms;
use acs_core::ThreadItem;

use crate::protocol::{OutboundMessage, RpcNotification};
use crate::state::Server;

/// Composite snapshot returned by `room/subscribe`: items, cursor and
/// ownership observed under one lock interval.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub items: Vec<ThreadItem>,
    pub cursor: u64,
    pub owner_client_id: Option<String>,
    pub ttl_ms: i64,
}

impl Server {
    // -----------------------------------------------------------------
    // Subscription bus
    // -----------------------------------------------------------------

    /// Subscribe `client_id` to a thread, materializing the thread if
    /// needed, and return the atomic snapshot. A subscriber never sees
    /// items newer than the reported cursor.
    pub async fn subscribe_room(&self, client_id: &str, thread_id: &str) -> RoomSnapshot {
        let snapshot = {
            let mut st = self.write_state();
            st.ensure_thread(thread_id);
            st.loaded_threads.insert(thread_id.to_string());
            st.subscribers
                .entry(thread_id.to_string())
                .or_default()
                .insert(client_id.to_string());

            let items = st.thread_items.get(thread_id).cloned().unwrap_or_default();
            let cursor = st.thread_cursors.get(thread_id).copied().unwrap_or(0);
            let owner_client_id = st.owner_by_thread.get(thread_id).cloned();
            let ttl_ms = match st.lease_deadline_ms.get(thread_id) {
                Some(deadline) => (*deadline - now_ms()).max(0),
                None => 0,
            };
            RoomSnapshot {
                items,
                cursor,
                owner_client_id,
                ttl_ms: if ttl_ms > 0 {
                    ttl_ms
                } else {
                    self.config.lease_ttl.as_millis() as i64
                },
            }
        };
        self.persist().await;
        snapshot
    }

    /// Drop `client_id`'s interest in a thread.
    pub fn unsubscribe_room(&self, client_id: &str, thread_id: &str) {
        let mut st = self.write_state();
        if let Some(subs) = st.subscribers.get_mut(thread_id) {
            subs.remove(client_id);
        }
    }

    /// Fan a notification out to every subscriber of a thread.
    ///
    /// The subscriber set is copied under the lock; enqueueing happens
    /// after release and never blocks.
    pub fn publish(&self, thread_id: &str, method: &str, params: Value) {
        let queues: Vec<_> = {
            let st = self.read_state();
            match st.subscribers.get(thread_id) {
                Some(subs) => subs
                    .iter()
                    .filter_map(|id| st.clients.get(id).map(|c| (id.clone(), c.tx.clone())))
                    .collect(),
                None => return,
            }
        };
        let notification = RpcNotification::new(method, params);
        for (client_id, tx) in queues {
            if tx
                .try_send(OutboundMessage::Notification(notification.clone()))
                .is_err()
            {
                tracing::debug!(%client_id, method, "outbound queue full, dropping notification");
            }
        }
    }

    /// Send a notification to one client, non-blocking.
    pub fn notify_client(&self, client_id: &str, method: &str, params: Value) {
        let tx = {
            let st = self.read_state();
            st.clients.get(client_id).map(|c| c.tx.clone())
        };
        if let Some(tx) = tx {
            let notification = RpcNotification::new(method, params);
            if tx
                .try_send(OutboundMessage::Notification(notification))
                .is_err()
            {
                tracing::debug!(%client_id, method, "outbound queue full, dropping notification");
            }
        }
    }

    // -----------------------------------------------------------------
    // Room leases
    // -----------------------------------------------------------------

    /// Take (or renew) the lease on a thread. Always succeeds: the
    /// caller becomes the owner and the deadline restarts.
    pub fn claim_room(&self, client_id: &str, thread_id: &str) -> (String, i64) {
        let ttl_ms = self.config.lease_ttl.as_millis() as i64;
        {
            let mut st = self.write_state();
            st.owner_by_thread
                .insert(thread_id.to_string(), client_id.to_string());
            st.lease_deadline_ms
                .insert(thread_id.to_string(), now_ms() + ttl_ms);
        }
        self.publish(
            thread_id,
            "room/owner",
            json!({"ownerClientId": client_id, "ttlMs": ttl_ms}),
        );
        (client_id.to_string(), ttl_ms)
    }

    /// Clear the lease if `client_id` holds it; no-op otherwise.
    /// Returns the owner after the call (None when released).
    pub fn release_room(&self, client_id: &str, thread_id: &str) -> Option<String> {
        let released = {
            let mut st = self.write_state();
            if st.owner_by_thread.get(thread_id).map(String::as_str) == Some(client_id) {
                st.owner_by_thread.remove(thread_id);
                st.lease_deadline_ms.remove(thread_id);
                true
            } else {
                false
            }
        };
        if released {
            self.publish(
                thread_id,
                "room/owner",
                json!({"ownerClientId": Value::Null, "ttlMs": 0}),
            );
            None
        } else {
            self.read_state().owner_by_thread.get(thread_id).cloned()
        }
    }

    /// Current owner and remaining TTL for a thread.
    pub fn room_ownership(&self, thread_id: &str) -> (Option<String>, i64) {
        let st = self.read_state();
        let owner = st.owner_by_thread.get(thread_id).cloned();
        let ttl_ms = st
            .lease_deadline_ms
            .get(thread_id)
            .map(|deadline| (*deadline - now_ms()).max(0))
            .unwrap_or(0);
        (owner, ttl_ms)
    }

    /// Start the lease-expiry ticker. Each sweep clears every lease
    /// past its deadline and announces the vacancy to subscribers.
    pub fn spawn_lease_expiry(self: &Arc<Self>) -> JoinHandle<()> {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(server.config.lease_sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let expired: Vec<String> = {
                    let mut st = server.write_state();
                    let now = now_ms();
                    let dead: Vec<String> = st
                        .lease_deadline_ms
                        .iter()
                        .filter(|(_, deadline)| **deadline <= now)
                        .map(|(thread_id, _)| thread_id.clone())
                        .collect();
                    for thread_id in &dead {
                        st.lease_deadline_ms.remove(thread_id);
                        st.owner_by_thread.remove(thread_id);
                    }
                    dead
                };
                for thread_id in expired {
                    server.publish(
                        &thread_id,
                        "room/owner",
                        json!({"ownerClientId": Value::Null, "ttlMs": 0}),
                    );
                }
            }
        })
    }
}
