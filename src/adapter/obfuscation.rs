//! Email deobfuscation strategies seen on bar directory profile pages.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::contact::clean_email;

static CHAR_SHIFT_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"CharShiftDecrypt\('([^']+)',\s*(\d+),\s*'([^']+)'\)").unwrap()
});
static VISIBLE_SPAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#(e\d+)\s*\{\s*display\s*:\s*inline;?\s*\}").unwrap());
static MAILTO_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href^="mailto:"]"#).unwrap());
static STYLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("style").unwrap());

/// Which decoding a profile page needs before its email is readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStrategy {
    /// Plain `mailto:` link.
    Mailto,
    /// Caesar shift over a custom alphabet, emitted as a JS call.
    CharShift,
    /// Several decoy spans; a `<style>` rule makes exactly one visible.
    CloakedSpan,
}

/// Shift every alphabet character back by `shift`; others pass through.
pub fn char_shift_decrypt(encrypted: &str, shift: usize, alphabet: &str) -> String {
    let letters: Vec<char> = alphabet.chars().collect();
    if letters.is_empty() {
        return encrypted.to_string();
    }
    let n = letters.len();
    encrypted
        .chars()
        .map(|c| match letters.iter().position(|&l| l == c) {
            Some(idx) => letters[(idx + n - shift % n) % n],
            None => c,
        })
        .collect()
}

/// Find a `CharShiftDecrypt('…', n, '…')` call in page source and decode it.
pub fn decode_char_shift(html: &str) -> Option<String> {
    let caps = CHAR_SHIFT_CALL_RE.captures(html)?;
    let shift: usize = caps.get(2)?.as_str().parse().ok()?;
    let decoded = char_shift_decrypt(caps.get(1)?.as_str(), shift, caps.get(3)?.as_str());
    clean_email(&decoded)
}

pub fn decode_mailto(doc: &Html) -> Option<String> {
    doc.select(&MAILTO_SELECTOR)
        .filter_map(|a| a.value().attr("href"))
        .find_map(clean_email)
}

pub fn decode_cloaked_span(doc: &Html) -> Option<String> {
    let styles: String = doc
        .select(&STYLE_SELECTOR)
        .map(|s| s.text().collect::<String>())
        .collect();
    let visible_id = VISIBLE_SPAN_RE.captures(&styles)?.get(1)?.as_str().to_string();
    let selector = Selector::parse(&format!("#{}", visible_id)).ok()?;
    let span = doc.select(&selector).next()?;
    clean_email(&span.text().collect::<String>())
}

pub fn decode_email(strategy: EmailStrategy, html: &str, doc: &Html) -> Option<String> {
    match strategy {
        EmailStrategy::Mailto => decode_mailto(doc),
        EmailStrategy::CharShift => decode_char_shift(html).or_else(|| decode_mailto(doc)),
        EmailStrategy::CloakedSpan => decode_cloaked_span(doc),
    }
}
