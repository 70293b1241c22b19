use chrono::{DateTime, Local};

use crate::constants::DIAGNOSIS_GREETING;

/// Author of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Label shown in front of the message text.
    pub fn label(self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "Operator",
            Role::Assistant => "AI Assistant",
        }
    }
}

/// A single transcript message. Never edited once appended.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

impl ChatMessage {
    fn new(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            timestamp: Local::now(),
        }
    }

    pub fn system(content: &str) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: &str) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Append-only diagnosis transcript.
///
/// The only way to remove messages is [`Transcript::reset`], which replaces
/// everything with the greeting.
#[derive(Debug, Clone)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    /// A fresh transcript holding only the greeting.
    pub fn new() -> Self {
        Self {
            messages: vec![ChatMessage::system(DIAGNOSIS_GREETING)],
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn add_user_message(&mut self, content: &str) {
        self.push(ChatMessage::user(content));
    }

    pub fn add_assistant_message(&mut self, content: &str) {
        self.push(ChatMessage::assistant(content));
    }

    pub fn add_system_message(&mut self, content: &str) {
        self.push(ChatMessage::system(content));
    }

    pub fn reset(&mut self) {
        self.messages = vec![ChatMessage::system(DIAGNOSIS_GREETING)];
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Messages appended after the first `seen`.
    pub fn since(&self, seen: usize) -> &[ChatMessage] {
        self.messages.get(seen..).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Number of user messages equal to `content`.
    pub fn count_user(&self, content: &str) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User && m.content == content)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Constructors ──────────────────────────────────────────────

    #[test]
    fn message_roles() {
        assert_eq!(ChatMessage::user("q").role, Role::User);
        assert_eq!(ChatMessage::assistant("a").role, Role::Assistant);
        assert_eq!(ChatMessage::system("s").role, Role::System);
        assert_eq!(Role::Assistant.label(), "AI Assistant");
    }

    #[test]
    fn new_transcript_is_greeting() {
        let t = Transcript::new();
        assert_eq!(t.len(), 1);
        assert_eq!(t.messages()[0].role, Role::System);
        assert_eq!(t.messages()[0].content, DIAGNOSIS_GREETING);
    }

    // ── Ordering ──────────────────────────────────────────────────

    #[test]
    fn appends_in_order() {
        let mut t = Transcript::new();
        t.add_user_message("why is it hot?");
        t.add_assistant_message("coolant pump");
        t.add_system_message("Error: timeout");
        let roles: Vec<Role> = t.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::System]);
        assert_eq!(t.last().unwrap().content, "Error: timeout");
    }

    #[test]
    fn since_returns_tail() {
        let mut t = Transcript::new();
        t.add_user_message("a");
        t.add_user_message("b");
        assert_eq!(t.since(2).len(), 1);
        assert_eq!(t.since(2)[0].content, "b");
        assert!(t.since(10).is_empty());
    }

    // ── Reset ─────────────────────────────────────────────────────

    #[test]
    fn reset_leaves_only_greeting() {
        let mut t = Transcript::new();
        t.add_user_message("a");
        t.add_assistant_message("b");
        t.reset();
        assert_eq!(t.len(), 1);
        assert_eq!(t.messages()[0].content, DIAGNOSIS_GREETING);
        assert_eq!(t.count_user("a"), 0);
    }
}
