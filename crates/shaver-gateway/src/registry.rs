use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use shaver_types::events::ChatEvent;

use crate::error::ChatError;

pub type ConnectionId = Uuid;

/// Outbound side of one live connection.
struct Handle {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<ChatEvent>,
}

#[derive(Default)]
struct GroupBucket {
    connections: HashMap<ConnectionId, Handle>,
    typing: HashSet<Uuid>,
}

impl GroupBucket {
    fn has_user(&self, user_id: Uuid) -> bool {
        self.connections.values().any(|h| h.user_id == user_id)
    }
}

/// Process-wide map of group id -> live connections.
///
/// Created once at start-up and shared by every connection handler; torn
/// down with [`Registry::close_all`], which drops every outbound queue so the
/// connection tasks wind down and close their sockets.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    groups: RwLock<HashMap<Uuid, GroupBucket>>,

    /// Per-group ordering point for persist-then-broadcast
    sequencers: std::sync::Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,

    closed: AtomicBool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                groups: RwLock::new(HashMap::new()),
                sequencers: std::sync::Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Add a connection for `user_id` to `group_id`. Returns its id and the
    /// receiving end of its outbound queue.
    pub async fn register(
        &self,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<(ConnectionId, mpsc::UnboundedReceiver<ChatEvent>), ChatError> {
        let mut groups = self.inner.groups.write().await;
        // Checked under the lock so close_all cannot miss a late registration.
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ChatError::Unavailable);
        }

        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        groups
            .entry(group_id)
            .or_default()
            .connections
            .insert(conn_id, Handle { user_id, tx });

        debug!("Registered connection {} for {} in group {}", conn_id, user_id, group_id);
        Ok((conn_id, rx))
    }

    /// Remove a connection. No-op if it is already gone. Returns true when
    /// this was the user's last connection in the group.
    pub async fn unregister(&self, group_id: Uuid, conn_id: ConnectionId) -> bool {
        let mut groups = self.inner.groups.write().await;
        let Some(bucket) = groups.get_mut(&group_id) else {
            return false;
        };
        let Some(handle) = bucket.connections.remove(&conn_id) else {
            return false;
        };

        let last = !bucket.has_user(handle.user_id);
        if last {
            bucket.typing.remove(&handle.user_id);
        }
        if bucket.connections.is_empty() {
            groups.remove(&group_id);
        }
        debug!("Unregistered connection {} from group {}", conn_id, group_id);
        last
    }

    /// Deliver `event` to every connection of the group except `exclude`.
    ///
    /// Best-effort: a dead connection does not stop delivery to the others
    /// and is unregistered. Returns the number of successful deliveries.
    pub async fn broadcast(
        &self,
        group_id: Uuid,
        event: ChatEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let groups = self.inner.groups.read().await;
            let Some(bucket) = groups.get(&group_id) else {
                return 0;
            };
            for (conn_id, handle) in &bucket.connections {
                if Some(*conn_id) == exclude {
                    continue;
                }
                if handle.tx.send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*conn_id);
                }
            }
        }

        for conn_id in dead {
            debug!("Dropping dead connection {} from group {}", conn_id, group_id);
            self.unregister(group_id, conn_id).await;
        }
        delivered
    }

    /// Deliver `event` to a single connection. Returns false if it is gone.
    pub async fn send_to(&self, group_id: Uuid, conn_id: ConnectionId, event: ChatEvent) -> bool {
        let sent = {
            let groups = self.inner.groups.read().await;
            match groups.get(&group_id).and_then(|b| b.connections.get(&conn_id)) {
                Some(handle) => handle.tx.send(event).is_ok(),
                None => return false,
            }
        };
        if !sent {
            self.unregister(group_id, conn_id).await;
        }
        sent
    }

    /// Distinct users with at least one live connection in the group.
    pub async fn online_users(&self, group_id: Uuid) -> Vec<Uuid> {
        let groups = self.inner.groups.read().await;
        groups
            .get(&group_id)
            .map(|b| {
                b.connections
                    .values()
                    .map(|h| h.user_id)
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Update the group's typing set and return it, sorted.
    pub async fn set_typing(&self, group_id: Uuid, user_id: Uuid, is_typing: bool) -> Vec<Uuid> {
        let mut groups = self.inner.groups.write().await;
        let Some(bucket) = groups.get_mut(&group_id) else {
            return Vec::new();
        };
        if is_typing && bucket.has_user(user_id) {
            bucket.typing.insert(user_id);
        } else {
            bucket.typing.remove(&user_id);
        }
        let mut typing: Vec<Uuid> = bucket.typing.iter().copied().collect();
        typing.sort();
        typing
    }

    /// Send `farewell` to every connection `user_id` has in the group, then
    /// drop them. Used when a member is removed. Returns how many were closed.
    pub async fn disconnect_user(&self, group_id: Uuid, user_id: Uuid, farewell: ChatEvent) -> usize {
        let mut groups = self.inner.groups.write().await;
        let Some(bucket) = groups.get_mut(&group_id) else {
            return 0;
        };

        let ids: Vec<ConnectionId> = bucket
            .connections
            .iter()
            .filter(|(_, h)| h.user_id == user_id)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Some(handle) = bucket.connections.remove(id) {
                let _ = handle.tx.send(farewell.clone());
            }
        }
        bucket.typing.remove(&user_id);
        if bucket.connections.is_empty() {
            groups.remove(&group_id);
        }
        ids.len()
    }

    /// The lock that serializes persist-then-broadcast for one group.
    pub fn sequencer(&self, group_id: Uuid) -> Arc<Mutex<()>> {
        let mut sequencers = self
            .inner
            .sequencers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Entries only the map still references have no holder or waiter.
        sequencers.retain(|_, lock| Arc::strong_count(lock) > 1);
        sequencers.entry(group_id).or_default().clone()
    }

    pub async fn connection_count(&self) -> usize {
        let groups = self.inner.groups.read().await;
        groups.values().map(|b| b.connections.len()).sum()
    }

    /// Shut down: refuse new registrations and drop every live handle.
    pub async fn close_all(&self) {
        let mut groups = self.inner.groups.write().await;
        self.inner.closed.store(true, Ordering::Release);
        let count: usize = groups.values().map(|b| b.connections.len()).sum();
        groups.clear();
        info!("Connection registry closed ({} connections dropped)", count);
    }
}
