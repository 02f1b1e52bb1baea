//! Echo suppression for the open-microphone loop.
//!
//! With no hardware echo cancellation guaranteed, the microphone can
//! pick up the tail of the system's own synthesized speech and hand it
//! back as a "user" transcript. The predicate here decides whether a
//! candidate transcript is such an echo of the last system utterance.

/// Candidates with fewer normalized characters than this are never
/// suppressed; they are too short to judge reliably, and short genuine
/// replies ("yes", "okay") often appear inside system sentences.
const MIN_CANDIDATE_CHARS: usize = 6;

/// The candidate must cover at least this fraction of the system
/// utterance to count as an echo rather than a coincidental overlap.
const OVERLAP_RATIO: f32 = 0.35;

/// Returns true when `candidate` looks like the system hearing itself
/// say `last_system`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn is_echo(candidate: &str, last_system: &str) -> bool {
    let candidate = normalize(candidate);
    let candidate_chars = candidate.chars().count();
    if candidate_chars < MIN_CANDIDATE_CHARS {
        return false;
    }
    let system = normalize(last_system);
    let system_chars = system.chars().count();
    if system_chars == 0 || !system.contains(&candidate) {
        return false;
    }
    let ratio = candidate_chars as f32 / system_chars as f32;
    ratio > OVERLAP_RATIO
}

/// Lowercases, strips punctuation, and collapses runs of whitespace so
/// transcription artifacts ("let's" vs "lets") do not defeat matching.
fn normalize(text: &str) -> String {
    let kept: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}
