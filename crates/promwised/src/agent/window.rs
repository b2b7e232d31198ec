//! Conversation memory.
//!
//! One [`ConversationWindow`] per conversation id. Each conversation carries an
//! update slot that serializes whole chat turns, while the window itself sits
//! behind a plain mutex that is only held for a copy or an append.
//!
//! The update slot is the one lock held across suspension points: it spans
//! the digest and reasoning calls of a turn. No other lock is.
//!
//! The store is bounded. Once it is full, creating a conversation evicts the
//! least recently used ones that no turn is currently holding.

use dashmap::DashMap;
use promwise_common::ChatTurn;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::debug;

/// Conversation used when a request names none
pub const DEFAULT_CONVERSATION: &str = "default";

/// Default window capacity in turns (10 exchanges)
pub const DEFAULT_WINDOW_TURNS: usize = 20;

/// Default bound on stored conversations
pub const DEFAULT_MAX_CONVERSATIONS: usize = 1000;

/// Bounded FIFO of chat turns
#[derive(Debug, Clone)]
pub struct ConversationWindow {
    turns: VecDeque<ChatTurn>,
    capacity: usize,
}

impl ConversationWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity + 2),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Turns oldest first
    pub fn turns(&self) -> Vec<ChatTurn> {
        self.turns.iter().cloned().collect()
    }

    /// Append a user turn and its reply, then evict from the front
    pub fn push_exchange(&mut self, user: ChatTurn, assistant: ChatTurn) {
        self.turns.push_back(user);
        self.turns.push_back(assistant);
        while self.turns.len() > self.capacity {
            self.turns.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// One conversation: its update slot, its window and when it was last used
pub struct Conversation {
    slot: tokio::sync::Mutex<()>,
    window: Mutex<ConversationWindow>,
    last_used: Mutex<Instant>,
}

impl Conversation {
    fn new(capacity: usize) -> Self {
        Self {
            slot: tokio::sync::Mutex::new(()),
            window: Mutex::new(ConversationWindow::new(capacity)),
            last_used: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn last_used(&self) -> Instant {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait for exclusive use of the conversation for one chat turn
    pub async fn begin_turn(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.slot.lock().await
    }

    fn window(&self) -> MutexGuard<'_, ConversationWindow> {
        // A panic while appending cannot leave the deque half-written
        self.window.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn history(&self) -> Vec<ChatTurn> {
        self.window().turns()
    }

    pub fn append(&self, user: ChatTurn, assistant: ChatTurn) -> usize {
        let mut window = self.window();
        window.push_exchange(user, assistant);
        window.len()
    }

    pub fn clear(&self) {
        self.window().clear();
    }
}

/// Conversations keyed by id, created on first use
pub struct ConversationStore {
    conversations: DashMap<String, Arc<Conversation>>,
    capacity: usize,
    max_conversations: usize,
}

impl ConversationStore {
    pub fn new(capacity: usize, max_conversations: usize) -> Self {
        Self {
            conversations: DashMap::new(),
            capacity,
            max_conversations: max_conversations.max(1),
        }
    }

    pub fn get_or_create(&self, id: &str) -> Arc<Conversation> {
        if let Some(conversation) = self.conversations.get(id) {
            conversation.touch();
            return conversation.clone();
        }

        self.evict_idle();
        self.conversations
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Conversation::new(self.capacity)))
            .clone()
    }

    /// Make room for one more conversation.
    ///
    /// Only conversations referenced by nothing but the store are candidates,
    /// so a turn in flight never loses its window.
    fn evict_idle(&self) {
        let excess = (self.conversations.len() + 1).saturating_sub(self.max_conversations);
        if excess == 0 {
            return;
        }

        let mut idle: Vec<(String, Instant)> = self
            .conversations
            .iter()
            .filter(|entry| Arc::strong_count(entry.value()) == 1)
            .map(|entry| (entry.key().clone(), entry.value().last_used()))
            .collect();
        idle.sort_by_key(|(_, last_used)| *last_used);

        for (id, _) in idle.into_iter().take(excess) {
            if self
                .conversations
                .remove_if(&id, |_, c| Arc::strong_count(c) == 1)
                .is_some()
            {
                debug!(conversation = %id, "Evicted idle conversation");
            }
        }
    }

    /// History of a conversation; empty when it does not exist
    pub fn history(&self, id: &str) -> Vec<ChatTurn> {
        self.conversations
            .get(id)
            .map(|c| c.history())
            .unwrap_or_default()
    }

    pub fn clear(&self, id: &str) {
        if let Some(conversation) = self.conversations.get(id) {
            conversation.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_TURNS, DEFAULT_MAX_CONVERSATIONS)
    }
}
