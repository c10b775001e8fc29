//! Pulls domains out of free text such as comment bodies and normalizes
//! them to their registrable apex. Everything here is pure: no I/O, no
//! clock, same input same output.

use crate::core::public_suffix::split_registrable;
use crate::domain::model::{DomainMention, NormalizedDomain};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

const MAX_LABEL_LEN: usize = 63;
const MAX_HOST_LEN: usize = 253;

/// Optional scheme and `www.`, then the host (group 1), then whatever
/// non-space tail follows it.
static DOMAIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:(?:https?://)?(?:www\.)?)((?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+(?:[a-zA-Z]{2,}|xn--[a-zA-Z0-9-]{2,}))\b[^\s,;]*",
    )
    .expect("domain regex should compile")
});

fn is_zero_width(c: char) -> bool {
    matches!(c, '\u{200B}'..='\u{200D}' | '\u{FEFF}')
}

fn cyrillic_lookalike(c: char) -> Option<char> {
    match c {
        'а' => Some('a'),
        'е' => Some('e'),
        'о' => Some('o'),
        'р' => Some('p'),
        'с' => Some('c'),
        'х' => Some('x'),
        'у' => Some('y'),
        'і' => Some('i'),
        _ => None,
    }
}

/// Conservative homoglyph repair. Only touches characters sitting inside
/// ASCII words, so ordinary Cyrillic prose is left alone.
fn fix_homoglyphs(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());

    for (i, &c) in chars.iter().enumerate() {
        let prev = if i > 0 { chars.get(i - 1).copied() } else { None };
        let next = chars.get(i + 1).copied();
        let lower_on_both_sides = prev.is_some_and(|p| p.is_ascii_lowercase())
            && next.is_some_and(|n| n.is_ascii_lowercase());
        let touches_ascii = prev.is_some_and(|p| p.is_ascii_alphabetic())
            || next.is_some_and(|n| n.is_ascii_alphabetic());

        let mapped = match c {
            // exampIe.com
            'I' if lower_on_both_sides => 'l',
            other => match cyrillic_lookalike(other) {
                Some(latin) if touches_ascii => latin,
                _ => other,
            },
        };
        out.push(mapped);
    }
    out
}

/// NFKC, zero-width removal and homoglyph repair, in that order.
pub fn prepare_text(text: &str) -> String {
    let folded: String = text.nfkc().filter(|c| !is_zero_width(*c)).collect();
    fix_homoglyphs(&folded)
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        s.get(prefix.len()..)
    } else {
        None
    }
}

fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && !label.starts_with('-')
        && !label.ends_with('-')
}

fn is_valid_tld(label: &str) -> bool {
    match label.strip_prefix("xn--") {
        Some(rest) => rest.len() >= 2,
        None => label.len() >= 2 && label.chars().all(|c| c.is_ascii_alphabetic()),
    }
}

/// Reduces a raw span (`HTTPS://www.Shop.Example.com:443/x?y#z.`) to a bare
/// lowercase host (`shop.example.com`), or `None` when nothing host-shaped
/// is left. Idempotent on its own output.
pub fn normalize_host(raw: &str) -> Option<String> {
    let prepared = prepare_text(raw);
    let mut token = prepared.trim().trim_start_matches(['(', '[', '<', '"', '\'']);

    for scheme in ["https://", "http://"] {
        if let Some(rest) = strip_prefix_ignore_case(token, scheme) {
            token = rest;
            break;
        }
    }
    while let Some(rest) = strip_prefix_ignore_case(token, "www.") {
        token = rest;
    }
    if let Some(cut) = token.find(['/', '?', '#']) {
        token = &token[..cut];
    }
    if let Some(cut) = token.find(':') {
        token = &token[..cut];
    }
    let token = token.trim_end_matches(|c: char| c.is_whitespace() || ".,;:!?)]>\"'".contains(c));

    let host = token.to_ascii_lowercase();
    if host.is_empty() || host.len() > MAX_HOST_LEN {
        return None;
    }

    let labels: Vec<&str> = host.split('.').collect();
    let (tld, rest) = labels.split_last()?;
    if rest.is_empty() || !is_valid_tld(tld) || !labels.iter().all(|l| is_valid_label(l)) {
        return None;
    }
    Some(host)
}

/// Normalizes one raw span all the way to its registrable split.
pub fn normalize_domain(raw: &str) -> Option<NormalizedDomain> {
    normalize_host(raw).and_then(|host| split_registrable(&host))
}

/// Every distinct apex domain mentioned in `text`, with the raw span it was
/// first seen in. Order follows first appearance.
pub fn extract_mentions(text: &str) -> Vec<DomainMention> {
    let prepared = prepare_text(text);
    let mut seen = HashSet::new();
    let mut mentions = Vec::new();

    for caps in DOMAIN_PATTERN.captures_iter(&prepared) {
        let (Some(whole), Some(host)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        // user@example.com and first.last@example.com
        let after_at = prepared[..whole.start()].ends_with('@');
        let before_at = prepared[host.end()..].starts_with('@');
        if after_at || before_at {
            continue;
        }

        let Some(domain) = normalize_domain(host.as_str()) else {
            continue;
        };
        if seen.insert(domain.domain_name.clone()) {
            mentions.push(DomainMention {
                domain,
                mention_text: whole.as_str().to_string(),
            });
        }
    }

    tracing::trace!(found = mentions.len(), "extracted domain mentions");
    mentions
}

/// Distinct apex domains mentioned in `text`, in first-seen order.
pub fn extract(text: &str) -> Vec<NormalizedDomain> {
    extract_mentions(text).into_iter().map(|m| m.domain).collect()
}
