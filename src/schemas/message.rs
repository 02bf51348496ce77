use std::fmt;

use serde::{Deserialize, Serialize};

use super::MessageType;

/// Struct `Message` represents one entry of the LLM conversation.
///
/// # Usage
/// ```rust,ignore
/// let human_message = Message::new_human_message("Hello");
/// let system_message = Message::new_system_message("System Alert");
/// let ai_message = Message::new_ai_message("AI Response");
/// ```
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct Message {
    pub content: String,
    pub message_type: MessageType,
}

impl Message {
    pub fn new<T: fmt::Display>(message_type: MessageType, content: T) -> Self {
        Message {
            content: content.to_string(),
            message_type,
        }
    }

    pub fn new_system_message<T: fmt::Display>(content: T) -> Self {
        Self::new(MessageType::System, content)
    }

    pub fn new_human_message<T: fmt::Display>(content: T) -> Self {
        Self::new(MessageType::Human, content)
    }

    pub fn new_ai_message<T: fmt::Display>(content: T) -> Self {
        Self::new(MessageType::Ai, content)
    }

    pub fn messages_to_string(messages: &[Message]) -> String {
        messages
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<String>>()
            .join("\n")
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.message_type, self.content)
    }
}
