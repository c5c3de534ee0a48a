//! Plain-text transcript formatting for the embedded engine.
//!
//! The daemon accepts structured message lists natively; the local runtime
//! wants a single prompt string. This is the only place that conversion
//! happens.

use super::{ChatMessage, Role};

/// Renders an ordered message sequence into the transcript the local
/// runtime is primed with.
///
/// Each known-role message becomes `"<Role>: <content>\n\n"`; messages with
/// any other role are dropped. A trailing `"Assistant: "` cue primes the
/// model to continue the conversation.
pub fn format_transcript(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();

    for msg in messages {
        let label = match msg.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Other => continue,
        };
        prompt.push_str(label);
        prompt.push_str(": ");
        prompt.push_str(&msg.content);
        prompt.push_str("\n\n");
    }

    prompt.push_str("Assistant: ");
    prompt
}
