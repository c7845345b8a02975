use futures::stream::BoxStream;
use serde_json::json;

use super::models::Transcript;
use crate::ai::ActivityError;
use crate::ai::prompt::{self, Prompt};
use crate::openai::chat::chat_stream;
use crate::openai::{Client, Message, Role};

/// Characters the child can pick to chat with.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatRole {
    Alien,
    CaptainAmerica,
    TalkingCat,
    MagicTeacher,
    Robot,
    Dinosaur,
    Astronaut,
    Fairy,
}

impl ChatRole {
    pub const ALL: [ChatRole; 8] = [
        ChatRole::Alien,
        ChatRole::CaptainAmerica,
        ChatRole::TalkingCat,
        ChatRole::MagicTeacher,
        ChatRole::Robot,
        ChatRole::Dinosaur,
        ChatRole::Astronaut,
        ChatRole::Fairy,
    ];

    /// How the model is told who it is.
    pub fn description(&self) -> &'static str {
        match self {
            ChatRole::Alien => "a friendly alien",
            ChatRole::CaptainAmerica => "Captain America",
            ChatRole::TalkingCat => "a talking cat",
            ChatRole::MagicTeacher => "a magic teacher from Hogwarts",
            ChatRole::Robot => "a robot from the future",
            ChatRole::Dinosaur => "a cute dinosaur",
            ChatRole::Astronaut => "an astronaut on the International Space Station",
            ChatRole::Fairy => "a little fairy from the forest",
        }
    }

    /// Short name used when the character talks about themself.
    pub fn name(&self) -> &'static str {
        match self {
            ChatRole::Alien => "the friendly alien",
            ChatRole::CaptainAmerica => "Captain America",
            ChatRole::TalkingCat => "the talking cat",
            ChatRole::MagicTeacher => "the magic teacher",
            ChatRole::Robot => "the robot",
            ChatRole::Dinosaur => "the cute dinosaur",
            ChatRole::Astronaut => "the astronaut",
            ChatRole::Fairy => "the forest fairy",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            ChatRole::Alien => "🛸",
            ChatRole::CaptainAmerica => "🦸",
            ChatRole::TalkingCat => "🐱",
            ChatRole::MagicTeacher => "🧙",
            ChatRole::Robot => "🤖",
            ChatRole::Dinosaur => "🦖",
            ChatRole::Astronaut => "👨‍🚀",
            ChatRole::Fairy => "🧚",
        }
    }
}

/// Conversation starters for kids who don't know what to say.
pub const CHAT_TIPS: [&str; 5] = [
    "Hello! How are you?",
    "What do you like to do?",
    "Can you tell me a story?",
    "What's your favorite food?",
    "Where are you from?",
];

/// A role-play conversation with one character. Every new turn
/// streams the reply and re-sends a bounded window of the transcript
/// so the character remembers what was just said.
#[derive(Debug)]
pub struct RoleChat {
    role: ChatRole,
    transcript: Transcript,
}

impl RoleChat {
    pub fn new(role: ChatRole) -> Result<Self, ActivityError> {
        let mut chat = Self {
            role,
            transcript: Transcript::new(),
        };
        chat.reset()?;
        Ok(chat)
    }

    pub fn role(&self) -> ChatRole {
        self.role
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Switching to a different character starts a new conversation.
    pub fn set_role(&mut self, role: ChatRole) -> Result<(), ActivityError> {
        if role != self.role {
            self.role = role;
            self.reset()?;
        }
        Ok(())
    }

    /// Forget everything and greet the child again.
    pub fn reset(&mut self) -> Result<(), ActivityError> {
        let welcome = self.welcome()?;
        self.transcript.clear();
        self.transcript.push(Message::new(Role::Assistant, &welcome));
        Ok(())
    }

    pub fn welcome(&self) -> Result<String, ActivityError> {
        let content = prompt::templates().render(
            &Prompt::RoleChatWelcome.to_string(),
            &json!({"name": self.role.name()}),
        )?;
        Ok(content)
    }

    pub fn system_prompt(&self) -> Result<String, ActivityError> {
        let content = prompt::templates().render(
            &Prompt::RoleChatSystem.to_string(),
            &json!({
                "role": self.role.description(),
                "name": self.role.name(),
            }),
        )?;
        Ok(content)
    }

    /// Start the next turn. The user's message is recorded right away,
    /// the caller drains the stream and hands the full text back with
    /// `record_reply`.
    pub fn reply(
        &mut self,
        client: Option<&Client>,
        prompt: &str,
    ) -> Result<BoxStream<'static, String>, ActivityError> {
        if prompt.trim().is_empty() {
            return Err(ActivityError::EmptyInput("Type a message in English first!"));
        }

        let system = self.system_prompt()?;
        let stream = chat_stream(client, prompt, &system, Some(self.transcript.as_slice()));
        self.transcript.push(Message::new(Role::User, prompt));

        tracing::debug!(
            "Role chat turn with {:?} ({} messages in transcript)",
            self.role,
            self.transcript.len()
        );

        Ok(stream)
    }

    pub fn record_reply(&mut self, reply: &str) {
        self.transcript.push(Message::new(Role::Assistant, reply));
    }

    /// Completed back and forth exchanges so far.
    pub fn rounds(&self) -> usize {
        self.transcript.len() / 2
    }
}
