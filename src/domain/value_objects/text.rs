//! Persian text helpers shared by the catalog.

use rand::Rng;
use sha2::{Digest, Sha256};

const ZWNJ: char = '\u{200c}';
const ZWJ: char = '\u{200d}';

/// Canonical form used when matching attribute values.
pub fn normalize_attribute_value(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .filter(|c| *c != ZWNJ && *c != ZWJ)
        .map(ascii_digit)
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn ascii_digit(c: char) -> char {
    match c {
        '۰'..='۹' => char::from(b'0' + (c as u32 - '۰' as u32) as u8),
        '٠'..='٩' => char::from(b'0' + (c as u32 - '٠' as u32) as u8),
        _ => c,
    }
}

/// Slug for tags and products.
///
/// Latin letters and digits win when present. Pure Persian text keeps its
/// word characters joined by dashes. Anything else gets a generated slug.
pub fn persian_slugify(text: &str) -> String {
    let latin = join_words(text, |c| c.is_ascii_alphanumeric()).to_lowercase();
    if !latin.is_empty() {
        return latin;
    }
    let persian = join_words(text, |c| c.is_alphanumeric() || c == '_' || c == ZWNJ);
    if !persian.is_empty() {
        return persian;
    }
    fallback_slug(text)
}

fn join_words(text: &str, keep: impl Fn(char) -> bool) -> String {
    text.split(|c: char| c.is_whitespace() || c == '-')
        .map(|word| word.chars().filter(|c| keep(*c)).collect::<String>())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn fallback_slug(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let hash = u16::from_be_bytes([digest[0], digest[1]]) % 10_000;
    let suffix = rand::thread_rng().gen_range(1000..10_000);
    format!("tag-{hash}-{suffix}")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameGender { Men, Women, Unisex, General }

const GENDER_SUFFIXES: [(&str, NameGender); 3] = [
    ("مردانه", NameGender::Men),
    ("زنانه", NameGender::Women),
    ("یونیسکس", NameGender::Unisex),
];

pub fn gender_from_name(name: &str) -> NameGender {
    GENDER_SUFFIXES
        .iter()
        .find(|(word, _)| name.contains(word))
        .map(|(_, gender)| *gender)
        .unwrap_or(NameGender::General)
}

/// Category name without its gender word, e.g. `کفش مردانه` -> `کفش`.
pub fn clean_name(name: &str) -> String {
    let mut cleaned = name.to_string();
    for (word, _) in GENDER_SUFFIXES {
        cleaned = cleaned.replace(word, "");
    }
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() { name.trim().to_string() } else { cleaned }
}
