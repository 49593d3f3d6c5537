//! Session pool - live answerers keyed by (agent, user)
//!
//! The map lock is held only for lookups, inserts and removals. Loading
//! configuration and calling the model happen on the returned answerer,
//! outside the lock.

use crate::answerer::{AnswererContext, RetrievalAnswerer};
use agentdesk_core::SessionKey;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Sessions idle for longer than this are reclaimed
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

struct SessionEntry {
    answerer: Arc<RetrievalAnswerer>,
    last_active: DateTime<Utc>,
}

impl SessionEntry {
    /// A caller outside the pool still holds the answerer
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.answerer) > 1
    }
}

pub struct AgentSessionPool {
    sessions: Mutex<HashMap<SessionKey, SessionEntry>>,
    context: AnswererContext,
    idle_timeout: Duration,
}

impl AgentSessionPool {
    pub fn new(context: AnswererContext) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            context,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionKey, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached answerer for the key, creating an unloaded one on
    /// a miss. Concurrent misses for the same key share one instance.
    pub fn get_or_create(&self, agent_id: &str, user_id: &str) -> Arc<RetrievalAnswerer> {
        self.get_or_create_at(agent_id, user_id, Utc::now())
    }

    /// [`get_or_create`](Self::get_or_create) with an explicit clock reading
    pub fn get_or_create_at(
        &self,
        agent_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Arc<RetrievalAnswerer> {
        let key = SessionKey::new(agent_id, user_id);
        let mut sessions = self.lock();
        let entry = sessions.entry(key).or_insert_with_key(|key| {
            debug!("Creating session {}", key);
            SessionEntry {
                answerer: Arc::new(RetrievalAnswerer::new(agent_id, self.context.clone())),
                last_active: now,
            }
        });
        entry.last_active = now;
        Arc::clone(&entry.answerer)
    }

    pub fn last_active(&self, agent_id: &str, user_id: &str) -> Option<DateTime<Utc>> {
        self.lock()
            .get(&SessionKey::new(agent_id, user_id))
            .map(|entry| entry.last_active)
    }

    /// Drop one session. Returns whether it existed.
    pub fn invalidate(&self, agent_id: &str, user_id: &str) -> bool {
        let removed = self
            .lock()
            .remove(&SessionKey::new(agent_id, user_id))
            .is_some();
        if removed {
            debug!("Invalidated session {}/{}", agent_id, user_id);
        }
        removed
    }

    /// Drop every user's session for an agent. Returns how many were removed.
    pub fn invalidate_agent(&self, agent_id: &str) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|key, _| key.agent_id != agent_id);
        let removed = before - sessions.len();
        if removed > 0 {
            info!("Invalidated {} sessions for agent {}", removed, agent_id);
        }
        removed
    }

    /// Drop the agent's sessions that loaded, or are loading, an index
    /// generation other than `generation`. Sessions that have not started
    /// loading are kept.
    pub fn invalidate_stale(&self, agent_id: &str, generation: u64) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|key, entry| {
            key.agent_id != agent_id || !entry.answerer.is_stale(generation)
        });
        let removed = before - sessions.len();
        if removed > 0 {
            info!(
                "Invalidated {} stale sessions for agent {} (now generation {})",
                removed, agent_id, generation
            );
        }
        removed
    }

    /// Remove sessions idle for longer than `timeout` as of `now`.
    ///
    /// Sessions whose answerer is still held by a caller are kept even when
    /// idle; they become eligible once the caller lets go.
    pub fn evict_idle(&self, now: DateTime<Utc>, timeout: Duration) -> usize {
        let timeout = chrono::Duration::from_std(timeout)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));

        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|key, entry| {
            let idle = now.signed_duration_since(entry.last_active) > timeout;
            if idle && entry.in_use() {
                debug!("Session {} is idle but in use, keeping it", key);
                return true;
            }
            !idle
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!("Evicted {} idle sessions", evicted);
        }
        evicted
    }

    /// Evict with the pool's own timeout
    pub fn evict_expired(&self) -> usize {
        self.evict_idle(Utc::now(), self.idle_timeout)
    }

    /// Run [`evict_expired`](Self::evict_expired) every `interval` until the
    /// pool is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let pool = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    debug!("Session pool dropped, stopping reaper");
                    break;
                };
                pool.evict_expired();
            }
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
