//! Dialogue language classification with hysteresis.
//!
//! The session speaks one language at a time. English is the default;
//! Vietnamese is adopted when an utterance carries positive evidence
//! (diacritics or closed-class words), and the session only falls back
//! to English when an utterance is plainly representable in ASCII.
//! The asymmetry keeps the recognizer from oscillating on short or
//! ambiguous utterances.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Vietnamese-specific letter forms. Deliberately excludes the plain
/// acute/grave vowels shared with other Latin-script languages; the
/// keyword list covers common words spelled only with those.
const VI_DIACRITICS: &str =
    "ăâđêôơưạảấầẩẫậắằẳẵặẹẻẽềểễệọỏốồổỗộớờởỡợụủứừửữựỳỵỷỹ";

/// Closed-class Vietnamese words, matched on word boundaries. Several
/// are ASCII ("em", "anh") so they also catch unaccented typing.
const VI_KEYWORDS: &[&str] = &["chào", "em", "anh", "chị", "cảm ơn", "vui lòng"];

/// A dialogue language the session can operate in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Language {
    /// English (US). The session default.
    #[default]
    #[serde(rename = "en-US")]
    EnUs,
    /// Vietnamese.
    #[serde(rename = "vi-VN")]
    ViVn,
}

impl Language {
    /// BCP 47 tag, as carried on the dialogue and recognition wires.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::EnUs => "en-US",
            Self::ViVn => "vi-VN",
        }
    }

    /// Two-letter code for services that take ISO 639-1 hints.
    #[must_use]
    pub const fn short_code(self) -> &'static str {
        match self {
            Self::EnUs => "en",
            Self::ViVn => "vi",
        }
    }

    /// Voice name understood by the local espeak-ng fallback.
    #[must_use]
    pub const fn espeak_voice(self) -> &'static str {
        match self {
            Self::EnUs => "en-us",
            Self::ViVn => "vi",
        }
    }

    /// Parses a tag or short code, case-insensitively.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "en-us" | "en" => Some(Self::EnUs),
            "vi-vn" | "vi" => Some(Self::ViVn),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Decides the active language after hearing `text`.
///
/// Switching to Vietnamese requires positive evidence; switching back to
/// English requires the text to be pure ASCII with no Vietnamese
/// keywords. Anything else keeps the current language, including empty
/// or whitespace-only text.
#[must_use]
pub fn classify(text: &str, current: Language) -> Language {
    let lowered = text.to_lowercase();
    if lowered.trim().is_empty() {
        return current;
    }
    if has_vietnamese_evidence(&lowered) {
        return Language::ViVn;
    }
    if current == Language::ViVn && lowered.is_ascii() {
        return Language::EnUs;
    }
    current
}

fn has_vietnamese_evidence(lowered: &str) -> bool {
    if lowered.chars().any(|c| VI_DIACRITICS.contains(c)) {
        return true;
    }
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    VI_KEYWORDS.iter().any(|keyword| {
        let parts: Vec<&str> = keyword.split_whitespace().collect();
        words.windows(parts.len()).any(|window| window == parts)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diacritics_switch_to_vietnamese() {
        assert_eq!(classify("cảm ơn bạn nhiều", Language::EnUs), Language::ViVn);
    }

    #[test]
    fn keywords_switch_even_without_diacritics() {
        assert_eq!(classify("xin chào", Language::EnUs), Language::ViVn);
        assert_eq!(classify("anh yeu em", Language::EnUs), Language::ViVn);
    }

    #[test]
    fn embedded_fragments_do_not_count_as_keywords() {
        // "them" contains "em" and "branch" contains "anh"; word-boundary
        // matching must not treat those as Vietnamese.
        assert_eq!(
            classify("tell them about the branch", Language::EnUs),
            Language::EnUs
        );
    }

    #[test]
    fn ascii_text_switches_back_to_english() {
        assert_eq!(
            classify("okay let's do some math", Language::ViVn),
            Language::EnUs
        );
    }

    #[test]
    fn ascii_with_vietnamese_words_stays_vietnamese() {
        assert_eq!(classify("da vang anh", Language::ViVn), Language::ViVn);
    }

    #[test]
    fn non_ascii_non_vietnamese_keeps_current() {
        assert_eq!(classify("один кофе", Language::ViVn), Language::ViVn);
        assert_eq!(classify("café au lait", Language::ViVn), Language::ViVn);
    }

    #[test]
    fn empty_text_keeps_current() {
        assert_eq!(classify("", Language::ViVn), Language::ViVn);
        assert_eq!(classify("   ", Language::EnUs), Language::EnUs);
    }

    #[test]
    fn tags_round_trip() {
        assert_eq!(Language::from_tag("en-US"), Some(Language::EnUs));
        assert_eq!(Language::from_tag("vi"), Some(Language::ViVn));
        assert_eq!(Language::from_tag("fr-FR"), None);
        assert_eq!(Language::ViVn.tag(), "vi-VN");
    }
}
