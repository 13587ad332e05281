//! Role-tagged chat messages extracted from evaluated query trees.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Query;

/// Conversational role of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message handed to a generation backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

impl Query {
    /// Flatten an evaluated subtree into the linear message list a backend
    /// consumes. Cross and Plus children are concatenated in order; Print
    /// annotations and unevaluated Repeat/Generate nodes contribute nothing.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut out = Vec::new();
        self.collect_messages(&mut out);
        out
    }

    fn collect_messages(&self, out: &mut Vec<ChatMessage>) {
        match self {
            Query::User(s) => out.push(ChatMessage::user(s.as_str())),
            Query::System(s) => out.push(ChatMessage::system(s.as_str())),
            Query::Assistant(s) => out.push(ChatMessage::assistant(s.as_str())),
            Query::Cross(children) | Query::Plus(children) => {
                children.iter().for_each(|c| c.collect_messages(out));
            }
            Query::Print(_) | Query::Repeat(_) | Query::Generate(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Generate;

    #[test]
    fn test_messages_flatten_in_order() {
        let query = Query::cross([
            Query::system("be brief"),
            Query::print("note"),
            Query::plus([Query::user("a"), Query::user("b")]),
            Query::assistant("ok"),
        ]);
        assert_eq!(
            query.messages(),
            vec![
                ChatMessage::system("be brief"),
                ChatMessage::user("a"),
                ChatMessage::user("b"),
                ChatMessage::assistant("ok"),
            ]
        );
    }

    #[test]
    fn test_unevaluated_nodes_contribute_nothing() {
        let query = Query::cross([
            Query::user("x"),
            Generate::new("m", Query::user("y")).into(),
            Query::repeat(2, Query::user("z")),
        ]);
        assert_eq!(query.messages(), vec![ChatMessage::user("x")]);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }
}
