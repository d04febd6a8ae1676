//! Interactive chat: a running message history and multi-line console input.

use std::io::{BufRead, Write};

use tracing::info;

use versebatch_shared::{Result, VersebatchError};

use crate::model::{ChatMessage, ModelClient, Role};

/// A conversation with one model, seeded with a system prompt.
#[derive(Debug)]
pub struct ChatSession<M> {
    model: M,
    messages: Vec<ChatMessage>,
}

impl<M: ModelClient> ChatSession<M> {
    pub fn new(model: M, system_prompt: &str) -> Self {
        info!(prompt = %system_prompt, "chat started");
        Self {
            model,
            messages: vec![ChatMessage::new(Role::System, system_prompt)],
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Send a user message with the full history and record the reply.
    /// The history only changes once a reply arrives, so a failed or
    /// cancelled call leaves it as it was.
    pub async fn send(&mut self, user: &str) -> Result<String> {
        info!(message = %user, "user");
        let user = ChatMessage::new(Role::User, user);
        let mut messages = self.messages.clone();
        messages.push(user.clone());

        let completion = self.model.complete(messages).await?;
        self.messages.push(user);
        self.messages
            .push(ChatMessage::new(Role::Assistant, completion.content.clone()));
        Ok(completion.content)
    }
}

/// Read one multi-line message. Each line is prompted with `label> `; a line
/// of `end` or `go` (any case) finishes the message. `exit` or `quit` as the
/// first line, or end of input before any line, ends the chat with `None`.
pub fn read_message<R, W>(input: &mut R, output: &mut W, label: &str) -> Result<Option<String>>
where
    R: BufRead,
    W: Write,
{
    let console = |e: std::io::Error| VersebatchError::io("<console>", e);
    let mut lines: Vec<String> = Vec::new();

    loop {
        write!(output, "{label}> ").map_err(console)?;
        output.flush().map_err(console)?;

        let mut line = String::new();
        if input.read_line(&mut line).map_err(console)? == 0 {
            break;
        }
        let command = line.trim().to_lowercase();
        if command == "end" || command == "go" {
            break;
        }
        if lines.is_empty() && (command == "exit" || command == "quit") {
            return Ok(None);
        }
        lines.push(line.trim_end_matches(['\r', '\n']).to_string());
    }

    if lines.is_empty() {
        return Ok(None);
    }
    Ok(Some(lines.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MathModel;
    use std::io::Cursor;

    fn read(text: &str) -> (Option<String>, String) {
        let mut input = Cursor::new(text.as_bytes().to_vec());
        let mut output = Vec::new();
        let message = read_message(&mut input, &mut output, "gpt-4").unwrap();
        (message, String::from_utf8(output).unwrap())
    }

    #[test]
    fn message_ends_at_go_or_end() {
        let (message, shown) = read("first line\nsecond line\nGO\nignored\n");
        assert_eq!(message.as_deref(), Some("first line\nsecond line"));
        assert_eq!(shown, "gpt-4> gpt-4> gpt-4> ");

        let (message, _) = read("only\n  end  \n");
        assert_eq!(message.as_deref(), Some("only"));
    }

    #[test]
    fn exit_only_counts_as_the_first_line() {
        assert_eq!(read("quit\n").0, None);
        assert_eq!(read("Exit\nmore\n").0, None);
        assert_eq!(read("hello\nexit\nend\n").0.as_deref(), Some("hello\nexit"));
    }

    #[test]
    fn end_of_input_finishes_the_message() {
        assert_eq!(read("partial").0.as_deref(), Some("partial"));
        assert_eq!(read("").0, None);
    }

    #[tokio::test]
    async fn session_keeps_history() {
        let mut chat = ChatSession::new(MathModel, "You are a calculator.");
        assert_eq!(chat.send("2 + 3").await.unwrap(), "5");
        assert_eq!(chat.send("6 * 7").await.unwrap(), "42");

        let roles: Vec<Role> = chat.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            [Role::System, Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn failed_reply_is_not_recorded() {
        let mut chat = ChatSession::new(MathModel, "sys");
        assert!(chat.send("1 +").await.is_err());
        assert_eq!(chat.messages().len(), 1);
    }
}
