//! In-memory conversation store.
//!
//! Process-lifetime CRUD for chat history. The frontend owns the message
//! list during a live chat and persists snapshots here; nothing in the
//! streaming path reads this store.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::{ChatMessage, Role};

/// A stored conversation with its full message history.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    /// Unix seconds.
    pub created_at: u64,
    /// Unix seconds.
    pub updated_at: u64,
}

/// Listing row: metadata without the message bodies.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Creation payload. Everything is optional; an untitled conversation gets
/// its title from the first user message.
#[derive(Debug, Default, Deserialize)]
pub struct NewConversation {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn derive_title(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .find(|m| m.role == Role::User)
        .map(|m| {
            let mut title: String = m.content.chars().take(48).collect();
            if m.content.chars().count() > 48 {
                title.push('…');
            }
            title
        })
        .unwrap_or_else(|| "New conversation".to_owned())
}

/// Thread-safe conversation registry.
#[derive(Default)]
pub struct ConversationStore {
    inner: RwLock<HashMap<String, Conversation>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and stores a conversation, returning the stored value.
    pub fn create(&self, new: NewConversation) -> Conversation {
        let now = unix_seconds();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            title: new.title.unwrap_or_else(|| derive_title(&new.messages)),
            messages: new.messages,
            created_at: now,
            updated_at: now,
        };
        self.inner
            .write()
            .expect("conversation store lock poisoned")
            .insert(conversation.id.clone(), conversation.clone());
        conversation
    }

    /// All conversations, most recently updated first.
    pub fn list(&self) -> Vec<ConversationSummary> {
        let mut summaries: Vec<ConversationSummary> = self
            .inner
            .read()
            .expect("conversation store lock poisoned")
            .values()
            .map(|c| ConversationSummary {
                id: c.id.clone(),
                title: c.title.clone(),
                message_count: c.messages.len(),
                created_at: c.created_at,
                updated_at: c.updated_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        summaries
    }

    /// One conversation with full history.
    pub fn get(&self, id: &str) -> Option<Conversation> {
        self.inner
            .read()
            .expect("conversation store lock poisoned")
            .get(id)
            .cloned()
    }

    /// Deletes a conversation. Returns whether it existed.
    pub fn delete(&self, id: &str) -> bool {
        self.inner
            .write()
            .expect("conversation store lock poisoned")
            .remove(id)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_get_list_delete_lifecycle() {
        let store = ConversationStore::new();
        let created = store.create(NewConversation {
            title: Some("Testing".into()),
            messages: vec![ChatMessage::new(Role::User, "hi")],
        });

        let fetched = store.get(&created.id).unwrap();
        assert_eq!(fetched.title, "Testing");
        assert_eq!(fetched.messages.len(), 1);

        let listed = store.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].message_count, 1);

        assert!(store.delete(&created.id));
        assert!(store.get(&created.id).is_none());
        assert!(!store.delete(&created.id));
    }

    #[test]
    fn untitled_conversation_takes_title_from_first_user_message() {
        let store = ConversationStore::new();
        let created = store.create(NewConversation {
            title: None,
            messages: vec![
                ChatMessage::new(Role::System, "be terse"),
                ChatMessage::new(Role::User, "what is a monad"),
            ],
        });
        assert_eq!(created.title, "what is a monad");
    }

    #[test]
    fn empty_conversation_gets_default_title() {
        let store = ConversationStore::new();
        let created = store.create(NewConversation::default());
        assert_eq!(created.title, "New conversation");
    }
}
