//! System instructions for the structuring service
//!
//! Three interpretation levels control how aggressively the service
//! reorganizes what was said. Every instruction pins the same JSON contract
//! so responses can be parsed without guesswork, and every request asks for
//! the complete updated tree rather than a delta.

use crate::settings::InterpretationLevel;
use crate::structure::TreeStructure;

/// JSON contract appended to every interpretation-level instruction.
const RESPONSE_CONTRACT: &str = r#"Respond with a single raw JSON object and nothing else - no code fences, no commentary before or after.

The object must contain:
- "root": the root node of the knowledge map
- "crossReferences": array of {"sourceId", "targetId", "relation"} links between related nodes anywhere in the map
- "metadata": {"totalSpeakers", "durationSeconds"}

Every node has:
- "id": string, stable across updates; reuse the id of every node you keep and invent ids only for new nodes
- "label": short display phrase
- "category": one of "topic", "subtopic", "detail", "question", "decision", "action", "contradiction"
- "speaker": string like "Speaker 0" when one speaker owns the point, else null
- "timestamp": seconds into the session where the point was made, else null
- "confidence": "high", "medium" or "low" - how clearly the transcript supports this node
- "children": array of nodes

Always return the complete updated map, never a fragment or a delta. Never drop a branch unless the new transcript contradicts it."#;

/// Instruction for the Literal interpretation level.
const LITERAL_INSTRUCTION: &str = r#"You are a careful note-taker maintaining a live knowledge map of an ongoing conversation.

Stay as close to what was actually said as possible. Keep the speakers' own wording in labels, group only obviously consecutive statements, and never infer themes or conclusions that were not stated. Do not add nodes with category "contradiction"; when speakers disagree, record the disagreement only as a cross-reference with relation "contradicts"."#;

/// Instruction for the Thematic interpretation level.
const THEMATIC_INSTRUCTION: &str = r#"You are an analyst maintaining a live knowledge map of an ongoing conversation.

Organize what was said by theme rather than by order of mention. You may rephrase labels for clarity and merge statements that make the same point, but every node must be traceable to something said. Mark questions, decisions and action items with their categories. When speakers disagree, link the conflicting nodes with a cross-reference using relation "contradicts"."#;

/// Instruction for the Critical interpretation level.
const CRITICAL_INSTRUCTION: &str = r#"You are a critical analyst maintaining a live knowledge map of an ongoing conversation.

Beyond organizing by theme, examine the discussion: surface tensions, unstated assumptions and weak reasoning. You may add nodes with category "contradiction" that name a conflict between statements, with the conflicting nodes linked to it via cross-references using relation "contradicts". Keep analysis nodes clearly labeled as such and grounded in what was said; do not speculate about anything outside the transcript."#;

/// Appended to the instruction when the previous response failed to parse.
const SIMPLIFIED_NOTE: &str = r#"Your previous reply could not be parsed. Return a drastically simplified map this time: at most two levels below the root, short plain labels, no crossReferences unless you are certain of them, and strictly valid JSON exactly matching the contract above."#;

/// Full system instruction for the given interpretation level.
pub(crate) fn system_instruction(level: InterpretationLevel) -> String {
    let instruction = match level {
        InterpretationLevel::Literal => LITERAL_INSTRUCTION,
        InterpretationLevel::Thematic => THEMATIC_INSTRUCTION,
        InterpretationLevel::Critical => CRITICAL_INSTRUCTION,
    };
    format!("{instruction}\n\n{RESPONSE_CONTRACT}")
}

/// System instruction amended for the one retry after a parse failure.
pub(crate) fn simplified_instruction(level: InterpretationLevel) -> String {
    format!("{}\n\n{SIMPLIFIED_NOTE}", system_instruction(level))
}

/// User payload for an incremental update: the current map plus the
/// newly transcribed text.
pub(crate) fn incremental_payload(current: &TreeStructure, new_text: &str) -> String {
    let current_json =
        serde_json::to_string(current).unwrap_or_else(|_| "{\"root\": null}".to_string());
    format!(
        "Current knowledge map (JSON):\n{current_json}\n\nNew transcript since the last update:\n{new_text}\n\nExtend and update the map with the new content."
    )
}

/// User payload for a full regeneration from the transcript tail.
pub(crate) fn regeneration_payload(transcript: &str) -> String {
    format!("Session transcript:\n{transcript}\n\nBuild the complete knowledge map from this transcript.")
}
