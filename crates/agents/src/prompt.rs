//! System prompt generation for agents created without an explicit prompt

use agentdesk_core::AgentConfig;

/// Characters of each uploaded document that go into a knowledge summary
pub const DOCUMENT_SUMMARY_CHARS: usize = 1000;

/// Characters of the knowledge summary quoted in the system prompt
pub const PROMPT_SUMMARY_CHARS: usize = 700;

fn prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Join the opening of each document into a short summary of what the
/// agent knows. Empty texts are skipped.
pub fn knowledge_summary<S: AsRef<str>>(texts: &[S]) -> String {
    texts
        .iter()
        .map(|t| t.as_ref().trim())
        .filter(|t| !t.is_empty())
        .map(|t| format!("{}...", prefix(t, DOCUMENT_SUMMARY_CHARS)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build a system prompt from the agent's name, description and tools.
///
/// `knowledge_summary` is cut to [`PROMPT_SUMMARY_CHARS`]; when it is empty
/// the knowledge base paragraph is left out.
pub fn generate_system_prompt(agent: &AgentConfig, knowledge_summary: &str) -> String {
    let mut prompt = format!("You are {}, a helpful AI assistant.\n", agent.name);

    if !agent.description.trim().is_empty() {
        prompt.push_str(&format!("\nDescription: {}\n", agent.description.trim()));
    }

    if !agent.tools.is_empty() {
        prompt.push_str(&format!(
            "\nYou have access to these tools: {}.\n",
            agent.tools.join(", ")
        ));
    }

    prompt.push_str(
        "\nUse your knowledge base and tools when appropriate to help users efficiently.\n",
    );

    let summary = knowledge_summary.trim();
    if !summary.is_empty() {
        prompt.push_str(&format!(
            "\nHere is a brief summary of the knowledge base you might reference: {}...\n",
            prefix(summary, PROMPT_SUMMARY_CHARS)
        ));
    }

    prompt.push_str("\nKeep your responses concise, clear, and professional.");
    prompt
}
