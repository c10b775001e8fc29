//! Registrable-domain split over a compact list of multi-label public
//! suffixes. Single-label TLDs need no entry: any final label is a suffix.

use crate::domain::model::NormalizedDomain;

pub const MULTI_PART_SUFFIXES: &[&str] = &[
    // United Kingdom
    "co.uk", "org.uk", "gov.uk", "ac.uk", "me.uk", "ltd.uk", "plc.uk", "net.uk", "sch.uk",
    // Japan
    "co.jp", "ne.jp", "or.jp", "ac.jp", "go.jp",
    // Australia
    "com.au", "net.au", "org.au", "edu.au", "gov.au",
    // New Zealand
    "co.nz", "org.nz", "net.nz", "ac.nz", "govt.nz",
    // Brazil
    "com.br", "net.br", "org.br", "gov.br",
    // Mexico
    "com.mx", "org.mx", "gob.mx",
    // Turkey
    "com.tr", "org.tr", "net.tr", "gov.tr",
    // China
    "com.cn", "co.cn", "net.cn", "org.cn", "gov.cn",
    // India
    "co.in", "net.in", "org.in", "gov.in",
    // Singapore
    "com.sg", "edu.sg", "gov.sg",
    // South Africa
    "co.za", "org.za", "gov.za",
    // South Korea
    "co.kr", "or.kr", "go.kr",
    // Others seen in promo links
    "com.ar", "com.co", "com.hk", "com.my", "com.ph", "com.tw", "co.id", "co.il", "co.th",
];

pub fn is_multi_part_suffix(candidate: &str) -> bool {
    MULTI_PART_SUFFIXES.contains(&candidate)
}

/// Splits a lowercase host into apex, suffix and subdomain.
///
/// The suffix is the longest listed multi-part suffix the host ends with,
/// or the last label otherwise. Returns `None` when no label is left in
/// front of the suffix (the host is itself a public suffix).
pub fn split_registrable(host: &str) -> Option<NormalizedDomain> {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return None;
    }

    let suffix_start = (0..labels.len() - 1)
        .find(|&i| is_multi_part_suffix(&labels[i..].join(".")))
        .unwrap_or(labels.len() - 1);

    let apex_start = suffix_start.checked_sub(1)?;
    let subdomain = if apex_start > 0 {
        Some(labels[..apex_start].join("."))
    } else {
        None
    };

    Some(NormalizedDomain {
        domain_name: labels[apex_start..].join("."),
        tld: labels[suffix_start..].join("."),
        subdomain,
    })
}
