//! Chat message model and the ordered conversation log.

use iced::widget::image::Handle;

pub type MessageId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Assistant,
}

/// What the user submitted. Assistant replies always render as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Text,
    Image,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: MessageId,
    pub kind: InputKind,
    /// The literal text the user typed. Empty for assistant messages and
    /// image submissions.
    pub input: String,
    /// Decoded preview for image submissions.
    pub preview: Option<Handle>,
    pub sender: Sender,
    /// Analysis text for assistant messages.
    pub result: Option<String>,
    pub error: bool,
}

/// Whether an analysis request is currently outstanding. A new submission is
/// rejected while awaiting a response; there is no queueing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    AwaitingResponse,
}

/// Ordered conversation history, oldest first. Messages are immutable once
/// appended; the only mutation besides appending is whole-message deletion.
#[derive(Debug, Default)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
    next_id: MessageId,
    phase: Phase,
}

impl ChatLog {
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_busy(&self) -> bool {
        self.phase == Phase::AwaitingResponse
    }

    /// Transition into `AwaitingResponse`. Returns false, leaving the log
    /// untouched, if a request is already outstanding.
    pub fn begin_request(&mut self) -> bool {
        if self.phase == Phase::AwaitingResponse {
            return false;
        }
        self.phase = Phase::AwaitingResponse;
        true
    }

    /// Return to `Idle`. Called on every completion, success or failure.
    pub fn finish_request(&mut self) {
        self.phase = Phase::Idle;
    }

    pub fn push_user_text(&mut self, text: &str) -> MessageId {
        self.push(ChatMessage {
            id: 0,
            kind: InputKind::Text,
            input: text.to_string(),
            preview: None,
            sender: Sender::User,
            result: None,
            error: false,
        })
    }

    pub fn push_user_image(&mut self, preview: Handle) -> MessageId {
        self.push(ChatMessage {
            id: 0,
            kind: InputKind::Image,
            input: String::new(),
            preview: Some(preview),
            sender: Sender::User,
            result: None,
            error: false,
        })
    }

    pub fn push_assistant(&mut self, content: String) -> MessageId {
        self.push(ChatMessage {
            id: 0,
            kind: InputKind::Text,
            input: String::new(),
            preview: None,
            sender: Sender::Assistant,
            result: Some(content),
            error: false,
        })
    }

    pub fn push_error(&mut self, explanation: String) -> MessageId {
        self.push(ChatMessage {
            id: 0,
            kind: InputKind::Text,
            input: String::new(),
            preview: None,
            sender: Sender::Assistant,
            result: Some(explanation),
            error: true,
        })
    }

    /// Remove exactly the message with the given id, preserving the relative
    /// order of the rest. Unknown ids are ignored.
    pub fn delete(&mut self, id: MessageId) {
        self.messages.retain(|message| message.id != id);
    }

    fn push(&mut self, mut message: ChatMessage) -> MessageId {
        let id = self.next_id;
        self.next_id += 1;
        message.id = id;
        self.messages.push(message);
        id
    }
}

/// A submission needs a non-blank text or a staged image.
pub fn submission_eligible(text: &str, has_image: bool) -> bool {
    has_image || !text.trim().is_empty()
}
