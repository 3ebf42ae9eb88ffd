//! Hyphenation behind an injectable predicate.
//!
//! The breakers never hyphenate on their own; whoever builds the inline
//! sequence asks a [`Hyphenator`] for syllable boundaries and plants flagged
//! penalty items there. The default implementation wraps `hypher`'s
//! Knuth-Liang patterns and enforces the minimum word length and the
//! minimum characters on either side of a hyphen.

use crate::options::LayoutOptions;

/// Breakpoint predicate over single words. Returns char offsets at which
/// the word may be hyphenated, in increasing order.
pub trait Hyphenator {
    fn break_points(&self, word: &str) -> Vec<usize>;
}

/// The default `hypher`-backed hyphenator.
pub struct HypherHyphenator {
    lang: hypher::Lang,
    min_word_length: usize,
    min_left: usize,
    min_right: usize,
}

impl HypherHyphenator {
    /// Build from layout options; `None` when the language has no
    /// dictionary (hyphenation then stays off).
    pub fn from_options(options: &LayoutOptions) -> Option<HypherHyphenator> {
        let lang = resolve_lang(&options.hyphenation_language)?;
        Some(HypherHyphenator {
            lang,
            min_word_length: options.hyphenation_min_word_length.max(2) as usize,
            min_left: options.hyphenation_min_left_chars.max(1) as usize,
            min_right: options.hyphenation_min_right_chars.max(1) as usize,
        })
    }

    /// Override the language (per-block `language` property).
    pub fn for_language(&self, tag: &str) -> Option<HypherHyphenator> {
        let lang = resolve_lang(tag)?;
        Some(HypherHyphenator {
            lang,
            min_word_length: self.min_word_length,
            min_left: self.min_left,
            min_right: self.min_right,
        })
    }
}

impl Hyphenator for HypherHyphenator {
    fn break_points(&self, word: &str) -> Vec<usize> {
        let len = word.chars().count();
        if len < self.min_word_length || !word.chars().all(char::is_alphabetic) {
            return Vec::new();
        }
        let mut points = Vec::new();
        let mut offset = 0;
        for syllable in hypher::hyphenate(word, self.lang) {
            offset += syllable.chars().count();
            if offset >= len {
                break;
            }
            if offset >= self.min_left && len - offset >= self.min_right {
                points.push(offset);
            }
        }
        points
    }
}

/// Map a BCP 47 tag to a hyphenation dictionary by its primary subtag.
fn resolve_lang(tag: &str) -> Option<hypher::Lang> {
    let primary = tag.split('-').next().unwrap_or(tag).to_lowercase();
    match primary.as_str() {
        "af" => Some(hypher::Lang::Afrikaans),
        "sq" => Some(hypher::Lang::Albanian),
        "be" => Some(hypher::Lang::Belarusian),
        "bg" => Some(hypher::Lang::Bulgarian),
        "ca" => Some(hypher::Lang::Catalan),
        "hr" => Some(hypher::Lang::Croatian),
        "cs" => Some(hypher::Lang::Czech),
        "da" => Some(hypher::Lang::Danish),
        "nl" => Some(hypher::Lang::Dutch),
        "en" => Some(hypher::Lang::English),
        "et" => Some(hypher::Lang::Estonian),
        "fi" => Some(hypher::Lang::Finnish),
        "fr" => Some(hypher::Lang::French),
        "ka" => Some(hypher::Lang::Georgian),
        "de" => Some(hypher::Lang::German),
        "el" => Some(hypher::Lang::Greek),
        "hu" => Some(hypher::Lang::Hungarian),
        "is" => Some(hypher::Lang::Icelandic),
        "it" => Some(hypher::Lang::Italian),
        "ku" => Some(hypher::Lang::Kurmanji),
        "la" => Some(hypher::Lang::Latin),
        "lt" => Some(hypher::Lang::Lithuanian),
        "mn" => Some(hypher::Lang::Mongolian),
        "nb" | "nn" | "no" => Some(hypher::Lang::Norwegian),
        "pl" => Some(hypher::Lang::Polish),
        "pt" => Some(hypher::Lang::Portuguese),
        "ru" => Some(hypher::Lang::Russian),
        "sr" => Some(hypher::Lang::Serbian),
        "sk" => Some(hypher::Lang::Slovak),
        "sl" => Some(hypher::Lang::Slovenian),
        "es" => Some(hypher::Lang::Spanish),
        "sv" => Some(hypher::Lang::Swedish),
        "tr" => Some(hypher::Lang::Turkish),
        "tk" => Some(hypher::Lang::Turkmen),
        "uk" => Some(hypher::Lang::Ukrainian),
        _ => None,
    }
}
