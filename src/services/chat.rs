use anyhow::Result;
use log::error;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::services::llm::{LlmClient, OnChunk};
use crate::services::prompt::CHAT_SYSTEM_PROMPT;

pub const FAILED_REPLY: &str = "(generation failed)";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "User"),
            Role::Assistant => write!(f, "Assistant"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

impl ChatMessage {
    fn is_failed_reply(&self) -> bool {
        self.role == Role::Assistant && self.text == FAILED_REPLY
    }
}

/// One conversation with the assistant. Lives only for the session.
#[derive(Debug, Default, Clone)]
pub struct ChatSession {
    messages: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// History plus the new message, flattened into one prompt. Failed
    /// replies stay visible in the session but are not sent back.
    fn transcript(&self) -> String {
        let mut out = String::new();
        for message in self.messages.iter().filter(|m| !m.is_failed_reply()) {
            out.push_str(&format!("{}: {}\n\n", message.role, message.text.trim()));
        }
        out.push_str("Assistant:");
        out
    }

    /// Sends `text` and streams the reply. On failure the placeholder reply
    /// is recorded and the error returned.
    pub async fn send(
        &mut self,
        llm: &dyn LlmClient,
        text: &str,
        on_chunk: &mut OnChunk<'_>,
    ) -> Result<String> {
        self.messages.push(ChatMessage { role: Role::User, text: text.to_string() });
        let prompt = self.transcript();

        match llm.stream_chat(CHAT_SYSTEM_PROMPT, &prompt, on_chunk).await {
            Ok(reply) => {
                let reply = reply.trim().to_string();
                self.messages.push(ChatMessage { role: Role::Assistant, text: reply.clone() });
                Ok(reply)
            }
            Err(e) => {
                error!("Chat failed: {:#}", e);
                self.messages.push(ChatMessage { role: Role::Assistant, text: FAILED_REPLY.to_string() });
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    struct MockLlmClient {
        prompts: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn chat(&self, _system: &str, user: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(user.to_string());
            if self.fail {
                return Err(anyhow!("timeout"));
            }
            Ok(" Try a lighthouse keeper. ".to_string())
        }
    }

    #[tokio::test]
    async fn test_send_flattens_history() -> Result<()> {
        let llm = MockLlmClient { prompts: Arc::new(Mutex::new(Vec::new())), fail: false };
        let mut session = ChatSession::new();

        let reply = session.send(&llm, "Give me a hero", &mut |_: &str| {}).await?;
        assert_eq!(reply, "Try a lighthouse keeper.");
        session.send(&llm, "Another?", &mut |_: &str| {}).await?;

        assert_eq!(session.messages().len(), 4);
        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts[0], "User: Give me a hero\n\nAssistant:");
        assert!(prompts[1].starts_with("User: Give me a hero\n\nAssistant: Try a lighthouse keeper.\n\nUser: Another?"));
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_appends_placeholder() {
        let llm = MockLlmClient { prompts: Arc::new(Mutex::new(Vec::new())), fail: true };
        let mut session = ChatSession::new();

        assert!(session.send(&llm, "Hello", &mut |_: &str| {}).await.is_err());
        let last = session.messages().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.text, FAILED_REPLY);

        session.clear();
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn test_failed_reply_is_not_sent_back_to_the_model() {
        let llm = MockLlmClient { prompts: Arc::new(Mutex::new(Vec::new())), fail: true };
        let mut session = ChatSession::new();

        assert!(session.send(&llm, "Hello", &mut |_: &str| {}).await.is_err());
        assert!(session.send(&llm, "Still there?", &mut |_: &str| {}).await.is_err());

        assert_eq!(session.messages().len(), 4);
        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts[1], "User: Hello\n\nUser: Still there?\n\nAssistant:");
        assert!(!prompts[1].contains(FAILED_REPLY));
    }
}
