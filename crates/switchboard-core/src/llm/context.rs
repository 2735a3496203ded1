//! Conversation history to prompt conversion.

use switchboard_types::chat::{ChatMessage, SenderType};
use switchboard_types::llm::Message;

/// Build the prompt context from stored history under a character budget.
///
/// Walks newest-first, keeping messages until the next one would exceed
/// `max_context_length`, and returns them oldest-first. Contact messages map
/// to `user`, agent and AI messages to `assistant`; system messages are
/// dropped. Lengths are counted in characters.
pub fn build_conversation_context(history: &[ChatMessage], max_context_length: usize) -> Vec<Message> {
    let mut context = Vec::new();
    let mut total = 0usize;

    for message in history.iter().rev() {
        let converted = match message.sender_type {
            SenderType::Contact => Message::user(message.content.clone()),
            SenderType::Agent | SenderType::Ai => Message::assistant(message.content.clone()),
            SenderType::System => continue,
        };

        let length = message.content.chars().count();
        if total + length > max_context_length {
            break;
        }
        total += length;
        context.push(converted);
    }

    context.reverse();
    context
}

const SYSTEM_PROMPT_ZH: &str = "你是一个专业的客服助手，请遵循以下原则：
1. 友好、耐心、专业地回答用户问题
2. 如果不确定答案，请诚实说明并建议联系人工客服
3. 保持回答简洁明了，避免过于冗长
4. 优先解决用户的实际问题
5. 如果用户要求转人工客服，请及时响应";

const SYSTEM_PROMPT_EN: &str = "You are a professional customer service assistant. Please follow these principles:
1. Answer user questions in a friendly, patient, and professional manner
2. If you're unsure about an answer, be honest and suggest contacting human support
3. Keep responses concise and clear, avoiding overly lengthy explanations
4. Prioritize solving users' actual problems
5. If users request human support, respond promptly";

/// Default customer-service system prompt. Unknown languages get zh-CN.
pub fn default_system_prompt(language: &str) -> &'static str {
    match language {
        "en-US" => SYSTEM_PROMPT_EN,
        _ => SYSTEM_PROMPT_ZH,
    }
}
