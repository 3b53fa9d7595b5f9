//! Pick the usable text out of a model reply.

use crate::client::ModelReply;

/// Return the trimmed answer text, falling back to the trimmed reasoning text.
///
/// Models that have thinking suppressed sometimes put their whole JSON
/// answer into the reasoning channel. An empty result means the reply
/// carried nothing usable.
pub fn select_response(reply: &ModelReply) -> String {
    let answer = reply.answer_text.trim();
    if !answer.is_empty() {
        return answer.to_string();
    }
    reply.reasoning_text.trim().to_string()
}
