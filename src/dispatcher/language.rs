//! Response-language directive
//!
//! Rewrites the outgoing message list so the model answers in a fixed
//! language. Applied once per call, before any attempt, so every retry sends
//! the same messages.

use crate::provider::{ChatMessage, Role};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageDirective {
    language: String,
}

impl LanguageDirective {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn instruction(&self) -> String {
        format!("Always respond in {}.", self.language)
    }

    /// Prefix the first system message, or insert one at the front
    pub fn apply(&self, messages: &[ChatMessage]) -> Vec<ChatMessage> {
        let instruction = self.instruction();
        let mut rewritten = messages.to_vec();
        match rewritten.iter_mut().find(|m| m.role == Role::System) {
            Some(system) => {
                system.content = format!("{}\n\n{}", instruction, system.content);
            }
            None => rewritten.insert(0, ChatMessage::system(instruction)),
        }
        rewritten
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inserts_system_message_when_missing() {
        let directive = LanguageDirective::new("French");
        let messages = vec![ChatMessage::user("hello")];
        let rewritten = directive.apply(&messages);

        assert_eq!(rewritten.len(), 2);
        assert_eq!(rewritten[0], ChatMessage::system("Always respond in French."));
        assert_eq!(rewritten[1], messages[0]);
    }

    #[test]
    fn test_prefixes_first_system_message_only() {
        let directive = LanguageDirective::new("German");
        let messages = vec![
            ChatMessage::user("hi"),
            ChatMessage::system("Be brief."),
            ChatMessage::system("Be kind."),
        ];
        let rewritten = directive.apply(&messages);

        assert_eq!(rewritten.len(), 3);
        assert_eq!(rewritten[1].content, "Always respond in German.\n\nBe brief.");
        assert_eq!(rewritten[2].content, "Be kind.");
    }

    #[test]
    fn test_empty_conversation_gets_directive() {
        let rewritten = LanguageDirective::new("Spanish").apply(&[]);
        assert_eq!(rewritten, vec![ChatMessage::system("Always respond in Spanish.")]);
    }
}
