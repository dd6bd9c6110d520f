// Conversation memory
// Per-conversation transcripts held in process, with a sliding window and idle expiry

#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::MemoryConfig;

/// One question and its answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    #[inline]
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
            created_at: Utc::now(),
        }
    }
}

/// Ordered transcript of a single conversation
#[derive(Debug)]
pub struct Conversation {
    id: String,
    turns: VecDeque<Turn>,
    last_active: Instant,
    /// Answers still being generated; a conversation never expires while this is non-zero
    in_flight: Arc<AtomicUsize>,
}

impl Conversation {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            turns: VecDeque::new(),
            last_active: Instant::now(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn turns(&self) -> &VecDeque<Turn> {
        &self.turns
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Copy of the turns, oldest first
    #[inline]
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    fn push(&mut self, turn: Turn, max_turns: Option<usize>) {
        self.turns.push_back(turn);
        if let Some(max) = max_turns {
            while self.turns.len() > max {
                self.turns.pop_front();
            }
        }
        self.touch();
    }

    fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    fn is_idle(&self, timeout: Option<Duration>) -> bool {
        self.in_flight.load(Ordering::SeqCst) == 0
            && timeout.is_some_and(|timeout| self.last_active.elapsed() > timeout)
    }
}

/// A turn whose answer is still being produced.
///
/// The conversation is pinned against idle expiry until the turn is completed or dropped.
#[derive(Debug)]
pub struct PendingTurn {
    id: String,
    handle: ConversationHandle,
    in_flight: Arc<AtomicUsize>,
    history: Vec<Turn>,
}

impl PendingTurn {
    #[inline]
    pub fn conversation_id(&self) -> &str {
        &self.id
    }

    /// Turns recorded before this one, oldest first
    #[inline]
    pub fn history(&self) -> &[Turn] {
        &self.history
    }
}

impl Drop for PendingTurn {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Shared handle to a conversation; the mutex serializes appends
pub type ConversationHandle = Arc<Mutex<Conversation>>;

/// Retention rules applied to every conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryPolicy {
    /// Turns kept per conversation, oldest dropped first
    pub max_turns: Option<usize>,
    /// Conversations idle for longer than this are discarded
    pub idle_timeout: Option<Duration>,
}

impl From<&MemoryConfig> for MemoryPolicy {
    #[inline]
    fn from(config: &MemoryConfig) -> Self {
        Self {
            max_turns: config.max_turns(),
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// In-process store of conversations keyed by conversation identifier
#[derive(Debug, Default)]
pub struct ConversationMemory {
    sessions: RwLock<HashMap<String, ConversationHandle>>,
    policy: MemoryPolicy,
}

impl ConversationMemory {
    #[inline]
    pub fn new(policy: MemoryPolicy) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            policy,
        }
    }

    #[inline]
    pub fn policy(&self) -> MemoryPolicy {
        self.policy
    }

    /// Return the conversation for `id`, creating an empty one on first use.
    ///
    /// Repeated calls return the same handle until the conversation is cleared or expires.
    #[inline]
    pub async fn get_or_create(&self, id: &str) -> ConversationHandle {
        {
            let sessions = self.sessions.read().await;
            if let Some(handle) = sessions.get(id) {
                if self.refresh(handle).await {
                    return Arc::clone(handle);
                }
            }
        }

        let mut sessions = self.sessions.write().await;
        if let Some(handle) = sessions.get(id) {
            if self.refresh(handle).await {
                return Arc::clone(handle);
            }
            info!("Conversation {} expired after inactivity", id);
        } else {
            debug!("Starting conversation {}", id);
        }

        let handle = Arc::new(Mutex::new(Conversation::new(id)));
        sessions.insert(id.to_string(), Arc::clone(&handle));
        handle
    }

    /// Touch the conversation if it is still live
    async fn refresh(&self, handle: &ConversationHandle) -> bool {
        let mut conversation = handle.lock().await;
        if conversation.is_idle(self.policy.idle_timeout) {
            return false;
        }
        conversation.touch();
        true
    }

    /// Append a turn; both messages land together or not at all
    #[inline]
    pub async fn append_turn(&self, id: &str, user: &str, assistant: &str) {
        let handle = self.get_or_create(id).await;
        let mut conversation = handle.lock().await;
        conversation.push(Turn::new(user, assistant), self.policy.max_turns);
        debug!(
            "Conversation {} now holds {} turns",
            id,
            conversation.len()
        );
    }

    /// Start a turn in `id`, pinning the conversation until the turn completes or is dropped
    #[inline]
    pub async fn begin_turn(&self, id: &str) -> PendingTurn {
        let handle = self.get_or_create(id).await;
        let (in_flight, history) = {
            let conversation = handle.lock().await;
            conversation.in_flight.fetch_add(1, Ordering::SeqCst);
            (Arc::clone(&conversation.in_flight), conversation.snapshot())
        };

        PendingTurn {
            id: id.to_string(),
            handle,
            in_flight,
            history,
        }
    }

    /// Record the answer for a pending turn in the conversation it was started in.
    ///
    /// A conversation cleared while the answer was generated does not come back.
    #[inline]
    pub async fn complete_turn(&self, pending: PendingTurn, user: &str, assistant: &str) {
        let mut conversation = pending.handle.lock().await;
        conversation.push(Turn::new(user, assistant), self.policy.max_turns);
        debug!(
            "Conversation {} now holds {} turns",
            pending.id,
            conversation.len()
        );
    }

    /// Snapshot of the turns recorded for `id`, empty when unknown or expired
    #[inline]
    pub async fn history(&self, id: &str) -> Vec<Turn> {
        let handle = {
            let sessions = self.sessions.read().await;
            sessions.get(id).map(Arc::clone)
        };

        match handle {
            Some(handle) => {
                let conversation = handle.lock().await;
                if conversation.is_idle(self.policy.idle_timeout) {
                    Vec::new()
                } else {
                    conversation.snapshot()
                }
            }
            None => Vec::new(),
        }
    }

    /// Forget the conversation entirely; unknown identifiers are ignored
    #[inline]
    pub async fn clear(&self, id: &str) {
        let removed = self.sessions.write().await.remove(id);
        if removed.is_some() {
            info!("Cleared conversation {}", id);
        } else {
            debug!("Clear requested for unknown conversation {}", id);
        }
    }

    /// Drop every idle conversation, returning how many were removed.
    ///
    /// Conversations that are locked by an in-flight request are kept.
    #[inline]
    pub async fn evict_idle(&self) -> usize {
        if self.policy.idle_timeout.is_none() {
            return 0;
        }

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, handle| {
            handle
                .try_lock()
                .map_or(true, |conversation| !conversation.is_idle(self.policy.idle_timeout))
        });

        let evicted = before - sessions.len();
        if evicted > 0 {
            info!("Evicted {} idle conversations", evicted);
        }
        evicted
    }

    #[inline]
    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// Number of conversations currently held
    #[inline]
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    #[inline]
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
