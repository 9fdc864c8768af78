use docchat_memory::RetrievedChunk;
use docchat_provider::LlmMessage;
use docchat_schema::{Role, Turn};

const QA_INSTRUCTION: &str = "Use the following pieces of context from the loaded document to answer \
the user's question. If you don't know the answer, just say that you don't know, don't try to \
make up an answer.";

const CONDENSE_INSTRUCTION: &str = "Given the following conversation and a follow up question, \
rephrase the follow up question to be a standalone question, in its original language. \
Reply with the standalone question only.";

/// System message: optional persona, the QA instruction, then the retrieved
/// context numbered in rank order.
pub fn build_system_prompt(persona: Option<&str>, context: &[RetrievedChunk]) -> String {
    let mut out = String::new();
    if let Some(persona) = persona.map(str::trim).filter(|p| !p.is_empty()) {
        out.push_str(persona);
        out.push_str("\n\n");
    }
    out.push_str(QA_INSTRUCTION);
    out.push_str("\n\nContext:");
    if context.is_empty() {
        out.push_str("\n(no relevant passages found)");
    }
    for (rank, hit) in context.iter().enumerate() {
        out.push_str(&format!("\n\n[{}] {}", rank + 1, hit.chunk.text));
    }
    out
}

pub fn history_messages(turns: &[Turn]) -> Vec<LlmMessage> {
    turns
        .iter()
        .map(|turn| LlmMessage::new(turn.role.as_str(), turn.text.clone()))
        .collect()
}

/// Full message list for the answering call: history then the question.
pub fn answer_messages(turns: &[Turn], question: &str) -> Vec<LlmMessage> {
    let mut messages = history_messages(turns);
    messages.push(LlmMessage::user(question));
    messages
}

/// System and user text for the follow-up rewriting call.
pub fn condense_prompt(turns: &[Turn], question: &str) -> (String, String) {
    let mut transcript = String::new();
    for turn in turns {
        let speaker = match turn.role {
            Role::User => "Human",
            Role::Assistant => "Assistant",
        };
        transcript.push_str(&format!("{speaker}: {}\n", turn.text));
    }
    let user = format!("Chat History:\n{transcript}\nFollow Up Input: {question}\nStandalone question:");
    (CONDENSE_INSTRUCTION.to_string(), user)
}
