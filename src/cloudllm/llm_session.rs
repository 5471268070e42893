//! The `llm_session` module encapsulates a conversational session with a Language Learning Model (LLM).
//!
//! At its core is the [`LLMSession`] structure, responsible for maintaining a running dialogue
//! history while adhering to the token limitations of the LLM. [`crate::agent_runner`] talks to
//! its [`crate::cloudllm::client_wrapper::ClientWrapper`] directly instead of through a session —
//! each agent call is exactly one system-context/user-message exchange with no history to retain
//! across calls — but `LLMSession` remains the building block for any caller that does need a
//! running conversation with an LLM provider.
//!
//! ## Example
//!
//! ```rust
//! use cloudllm::clients::openai::{Model, OpenAIClient};
//! use cloudllm::LLMSession;
//!
//! let secret_key = "YOUR_OPENAI_SECRET_KEY";
//! let openai_client = OpenAIClient::new_with_model_enum(secret_key, Model::GPT41Nano);
//! let system_prompt = "You are an AI assistant.";
//! let max_tokens = 8000;
//! let session = LLMSession::new(openai_client, system_prompt.to_string(), max_tokens);
//! assert_eq!(session.get_max_tokens(), 8000);
//! ```
//!
//! The session's history grows with each interaction but remains within the token constraints of
//! the LLM: the oldest messages are trimmed first when `estimated_history_tokens()` would
//! otherwise exceed `max_tokens`.

use std::sync::Arc;

use crate::cloudllm::client_wrapper::{ClientWrapper, Message, Role, ToolDefinition};

/// Represents a conversational session with an LLM.
///
/// `LLMSession` allows for real-time, back-and-forth interactions with the LLM while maintaining
/// a history of the conversation, trimming the oldest entries first whenever the estimated token
/// count would exceed `max_tokens`.
pub struct LLMSession<T: ClientWrapper> {
    client: Arc<T>,
    system_prompt: Message,
    conversation_history: Vec<Message>,
    max_tokens: usize,
}

impl<T: ClientWrapper> LLMSession<T> {
    /// Creates a new `LLMSession` with the given client and system prompt.
    pub fn new(client: T, system_prompt: String, max_tokens: usize) -> Self {
        Self::from_arc(Arc::new(client), system_prompt, max_tokens)
    }

    /// Creates a new `LLMSession` from an already-shared client.
    ///
    /// Useful when several agents share the same underlying [`ClientWrapper`] (e.g. all four
    /// pipeline agents talking to the same provider).
    pub fn from_arc(client: Arc<T>, system_prompt: String, max_tokens: usize) -> Self {
        LLMSession {
            client,
            system_prompt: Message {
                role: Role::System,
                content: Arc::from(system_prompt.as_str()),
            },
            conversation_history: Vec::new(),
            max_tokens,
        }
    }

    /// Sends a message to the LLM and appends both the request and the reply to the session
    /// history, trimming oldest-first whenever the budget is exceeded.
    pub async fn send_message(
        &mut self,
        role: Role,
        content: String,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn std::error::Error>> {
        let message = Message {
            role,
            content: Arc::from(content.as_str()),
        };
        self.conversation_history.push(message);
        self.trim_conversation_history();

        let mut outgoing = Vec::with_capacity(self.conversation_history.len() + 1);
        outgoing.push(self.system_prompt.clone());
        outgoing.extend(self.conversation_history.iter().cloned());

        let response = self.client.send_message(&outgoing, tools).await?;

        self.conversation_history.push(response.clone());
        self.trim_conversation_history();

        Ok(response)
    }

    /// Replaces the system prompt for this session.
    pub fn set_system_prompt(&mut self, prompt: String) {
        self.system_prompt = Message {
            role: Role::System,
            content: Arc::from(prompt.as_str()),
        };
    }

    /// Returns the current system prompt message.
    pub fn get_system_prompt(&self) -> &Message {
        &self.system_prompt
    }

    /// Returns the conversation history, excluding the system prompt.
    pub fn get_conversation_history(&self) -> &[Message] {
        &self.conversation_history
    }

    /// Drops all conversation history, keeping the system prompt.
    pub fn clear_history(&mut self) {
        self.conversation_history.clear();
    }

    /// Injects a message directly into history without a round-trip to the LLM.
    pub fn inject_message(&mut self, role: Role, content: String) {
        self.conversation_history.push(Message {
            role,
            content: Arc::from(content.as_str()),
        });
        self.trim_conversation_history();
    }

    /// The configured maximum token budget for this session.
    pub fn get_max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// A cheap approximation of the token cost of the system prompt plus history, at one token
    /// per four characters — good enough for the trimming heuristic below.
    pub fn estimated_history_tokens(&self) -> usize {
        count_message_tokens(&self.system_prompt)
            + self
                .conversation_history
                .iter()
                .map(count_message_tokens)
                .sum::<usize>()
    }

    fn trim_conversation_history(&mut self) {
        while self.max_tokens > 0 && self.estimated_history_tokens() > self.max_tokens {
            if self.conversation_history.is_empty() {
                break;
            }
            self.conversation_history.remove(0);
        }
    }
}

fn count_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}

fn count_message_tokens(message: &Message) -> usize {
    1 + count_tokens(&message.content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::client_wrapper::TokenUsage;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    struct EchoClient {
        usage: Mutex<Option<TokenUsage>>,
    }

    impl EchoClient {
        fn new() -> Self {
            Self {
                usage: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ClientWrapper for EchoClient {
        async fn send_message(
            &self,
            messages: &[Message],
            _tools: Option<Vec<ToolDefinition>>,
        ) -> Result<Message, Box<dyn std::error::Error>> {
            let last = messages.last().map(|m| m.content.to_string()).unwrap_or_default();
            Ok(Message {
                role: Role::Assistant,
                content: Arc::from(format!("echo: {}", last).as_str()),
            })
        }

        fn model_name(&self) -> &str {
            "echo"
        }

        fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
            Some(&self.usage)
        }
    }

    #[tokio::test]
    async fn round_trips_a_message() {
        let mut session = LLMSession::new(EchoClient::new(), "be terse".to_string(), 10_000);
        let reply = session
            .send_message(Role::User, "hello".to_string(), None)
            .await
            .unwrap();
        assert_eq!(&*reply.content, "echo: hello");
        assert_eq!(session.get_conversation_history().len(), 2);
    }

    #[tokio::test]
    async fn trims_oldest_messages_first() {
        let mut session = LLMSession::new(EchoClient::new(), "s".to_string(), 12);
        for i in 0..10 {
            session
                .send_message(Role::User, format!("message number {i}"), None)
                .await
                .unwrap();
        }
        assert!(session.estimated_history_tokens() <= 12 + 8);
        assert!(session.get_conversation_history().len() < 20);
    }

    #[test]
    fn set_system_prompt_replaces_content() {
        let mut session = LLMSession::new(EchoClient::new(), "old".to_string(), 1000);
        session.set_system_prompt("new".to_string());
        assert_eq!(&*session.get_system_prompt().content, "new");
    }
}
