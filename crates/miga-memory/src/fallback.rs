//! In-process conversation tails used when the database is unreachable.
//! Bounded per conversation; callers learn the durability class through the
//! `StorageClass::Memory` discriminator.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::Value;

use miga_core::types::Role;

use crate::types::StoredMessage;

pub struct MemoryFallback {
    tails: Mutex<HashMap<i64, VecDeque<StoredMessage>>>,
    /// Per-conversation cap (2× the configured recent-message window).
    cap: usize,
    next_id: Mutex<i64>,
}

impl MemoryFallback {
    pub fn new(max_recent: i64) -> Self {
        Self {
            tails: Mutex::new(HashMap::new()),
            cap: (max_recent.max(1) as usize) * 2,
            next_id: Mutex::new(-1),
        }
    }

    /// Append unless it duplicates the previous (role, content) pair.
    /// Returns false when elided.
    pub fn add(
        &self,
        conversation_id: i64,
        role: Role,
        content: &str,
        contact_id: Option<i64>,
        metadata: Value,
    ) -> bool {
        let mut tails = self.tails.lock().unwrap();
        let tail = tails.entry(conversation_id).or_default();

        if let Some(last) = tail.back() {
            if last.role == role && last.content == content {
                return false;
            }
        }

        // Negative ids mark rows that never reached the database.
        let id = {
            let mut next = self.next_id.lock().unwrap();
            let id = *next;
            *next -= 1;
            id
        };

        tail.push_back(StoredMessage {
            id,
            conversation_id,
            contact_id,
            role,
            content: content.to_string(),
            metadata,
            message_timestamp: Utc::now(),
            summarized: false,
            summary_id: None,
        });
        while tail.len() > self.cap {
            tail.pop_front();
        }
        true
    }

    /// Chronological tail, at most `limit` messages.
    pub fn tail(&self, conversation_id: i64, limit: usize, include_system: bool) -> Vec<StoredMessage> {
        let tails = self.tails.lock().unwrap();
        let Some(tail) = tails.get(&conversation_id) else {
            return Vec::new();
        };
        tail.iter()
            .filter(|m| include_system || m.role != Role::System)
            .rev()
            .take(limit)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    pub fn clear(&self, conversation_id: i64) {
        self.tails.lock().unwrap().remove(&conversation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_duplicates_are_elided() {
        let fb = MemoryFallback::new(10);
        assert!(fb.add(1, Role::User, "hola", None, Value::Null));
        assert!(!fb.add(1, Role::User, "hola", None, Value::Null));
        assert!(fb.add(1, Role::Assistant, "hola", None, Value::Null));
        assert_eq!(fb.tail(1, 10, true).len(), 2);
    }

    #[test]
    fn tail_is_bounded_at_twice_the_window() {
        let fb = MemoryFallback::new(3);
        for i in 0..20 {
            fb.add(1, Role::User, &format!("m{i}"), None, Value::Null);
        }
        let tail = fb.tail(1, 100, true);
        assert_eq!(tail.len(), 6);
        assert_eq!(tail.last().unwrap().content, "m19");
        assert_eq!(tail.first().unwrap().content, "m14");
    }

    #[test]
    fn system_messages_can_be_filtered() {
        let fb = MemoryFallback::new(5);
        fb.add(1, Role::System, "ctx", None, Value::Null);
        fb.add(1, Role::User, "hola", None, Value::Null);
        assert_eq!(fb.tail(1, 10, false).len(), 1);
        assert_eq!(fb.tail(1, 10, true).len(), 2);
    }
}
