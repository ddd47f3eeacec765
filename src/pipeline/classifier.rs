//! Job-offer classification and reply generation on top of an LLM.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::ReplyProfile;
use crate::error::LlmError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

/// Longest body excerpt sent to the model.
const MAX_BODY_CHARS: usize = 12_000;

/// The verdict is a single word.
const CLASSIFY_MAX_TOKENS: u32 = 8;
const CLASSIFY_TEMPERATURE: f32 = 0.0;
const CLASSIFY_INSTRUCTIONS: &str = "Analyze the following email content and tell me if it's a job offer or not. \
     Respond only with \"YES\" or \"NO\".";

const REPLY_MAX_TOKENS: u32 = 700;
const REPLY_TEMPERATURE: f32 = 0.7;

/// Decides whether a message is a job offer and writes the answer.
#[async_trait]
pub trait ReplyService: Send + Sync {
    async fn classify(&self, body: &str) -> Result<bool, LlmError>;

    async fn generate_reply(&self, body: &str, profile: &ReplyProfile)
    -> Result<String, LlmError>;
}

/// `ReplyService` backed by a chat-completion model.
pub struct LlmReplyService {
    llm: Arc<dyn LlmProvider>,
}

impl LlmReplyService {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    async fn ask(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let response = self.llm.complete(request).await?;
        let content = response.content.trim();
        if content.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.llm.model_name().to_string(),
                reason: "empty completion".to_string(),
            });
        }
        debug!(
            model = self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Completion received"
        );
        Ok(content.to_string())
    }
}

#[async_trait]
impl ReplyService for LlmReplyService {
    async fn classify(&self, body: &str) -> Result<bool, LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(CLASSIFY_INSTRUCTIONS),
            ChatMessage::user(build_classify_prompt(body)),
        ])
        .with_max_tokens(CLASSIFY_MAX_TOKENS)
        .with_temperature(CLASSIFY_TEMPERATURE);

        let answer = self.ask(request).await?;
        Ok(parse_verdict(&answer))
    }

    async fn generate_reply(
        &self,
        body: &str,
        profile: &ReplyProfile,
    ) -> Result<String, LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_reply_instructions(profile)),
            ChatMessage::user(build_reply_prompt(body)),
        ])
        .with_max_tokens(REPLY_MAX_TOKENS)
        .with_temperature(REPLY_TEMPERATURE);

        self.ask(request).await
    }
}

/// `true` only for a bare YES, ignoring case, whitespace and trailing
/// punctuation.
pub fn parse_verdict(answer: &str) -> bool {
    let word = answer
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_ascii_uppercase();
    word == "YES"
}

fn excerpt(body: &str) -> &str {
    match body.char_indices().nth(MAX_BODY_CHARS) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

pub fn build_classify_prompt(body: &str) -> String {
    format!("Email content:\n---\n{}\n---\n", excerpt(body))
}

pub fn build_reply_instructions(profile: &ReplyProfile) -> String {
    format!(
        "Write a professional and enthusiastic email response to a job offer for a {title} role.\n\
         Mention that I'm attaching my CV, thank the recruiter, and express excitement to learn more about the role.\n\n\
         My Information:\n\
         Name: {name}\n\
         Contact: {contact}\n\n\
         - Do NOT include placeholders like [Your Name], [Company Name], or [Date].\n\
         - Mention that the CV is attached.\n\
         - Be concise and enthusiastic.",
        title = profile.job_title,
        name = profile.full_name,
        contact = profile.contact,
    )
}

pub fn build_reply_prompt(body: &str) -> String {
    format!("Here's the job offer email:\n---\n{}\n---\n", excerpt(body))
}
