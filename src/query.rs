//! Candidate query extraction.
//!
//! Turns a [`Trigger`] into the strings worth searching for. Pure: no
//! network, no storage.
//!
//! | Slot | Derived from | Suppressed when |
//! |------|--------------|-----------------|
//! | `Query` | the URL's `q` parameter | no `q` parameter |
//! | `Full URL` | the whole href | `q` present, or scheme not http/https/file/ftp |
//! | `Partial URL` | registrable domain minus public suffix | same as `Full URL`, or host has no registrable domain |
//! | `Title` | tab title | never on its own (see [`extract_candidates`]) |

use url::Url;

use crate::models::{Candidate, CandidateOrigin, SearchType, Settings, Tab, Trigger};

const COMMON_PROTOCOLS: [&str; 4] = ["http", "https", "file", "ftp"];

/// Default width used by [`short_query`].
pub const SHORT_QUERY_CHARS: usize = 30;

/// The four derivation slots for a tab, before mode selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabSlots {
    pub query: Option<String>,
    pub full_url: Option<String>,
    pub partial_url: Option<String>,
    pub title: Option<String>,
}

impl TabSlots {
    fn into_candidates(self) -> Vec<Candidate> {
        [
            (self.query, CandidateOrigin::Query),
            (self.full_url, CandidateOrigin::FullUrl),
            (self.partial_url, CandidateOrigin::PartialUrl),
            (self.title, CandidateOrigin::Title),
        ]
        .into_iter()
        .filter_map(|(query, origin)| query.map(|query| Candidate { query, origin }))
        .collect()
    }
}

/// Derives the ordered candidate queries for `trigger`.
///
/// Explicit text always yields exactly itself, whatever the search mode.
/// For a tab, `Auto` returns every non-empty slot and any other mode
/// returns just its own slot. A tab that only produces a title (new-tab
/// and other internal pages) yields nothing at all.
pub fn extract_candidates(trigger: &Trigger, settings: &Settings) -> Vec<Candidate> {
    match trigger {
        Trigger::Text(text) => match non_empty(text) {
            Some(query) => vec![Candidate {
                query,
                origin: CandidateOrigin::Text,
            }],
            None => Vec::new(),
        },
        Trigger::Tab(tab) => {
            let slots = tab_slots(tab);
            if slots.query.is_none() && slots.full_url.is_none() && slots.partial_url.is_none() {
                return Vec::new();
            }
            select_mode(slots, settings.search_type)
        }
    }
}

fn select_mode(slots: TabSlots, mode: SearchType) -> Vec<Candidate> {
    let (picked, origin) = match mode {
        SearchType::Auto => return slots.into_candidates(),
        SearchType::Query => (slots.query, CandidateOrigin::Query),
        SearchType::FullUrl => (slots.full_url, CandidateOrigin::FullUrl),
        SearchType::PartialUrl => (slots.partial_url, CandidateOrigin::PartialUrl),
        SearchType::Title => (slots.title, CandidateOrigin::Title),
    };
    picked
        .map(|query| vec![Candidate { query, origin }])
        .unwrap_or_default()
}

/// Computes every slot for `tab` independently of the search mode.
pub fn tab_slots(tab: &Tab) -> TabSlots {
    let title = tab.title.as_deref().and_then(non_empty);

    let parsed = match tab.url.as_deref().map(Url::parse) {
        Some(Ok(url)) => url,
        _ => {
            return TabSlots {
                title,
                ..Default::default()
            }
        }
    };

    let query = parsed
        .query_pairs()
        .find(|(k, _)| k == "q")
        .and_then(|(_, v)| non_empty(&v));

    let (full_url, partial_url) = if query.is_some() || !is_common_protocol(parsed.scheme()) {
        (None, None)
    } else {
        (
            Some(parsed.as_str().to_string()),
            parsed.host_str().and_then(domain_without_suffix),
        )
    };

    TabSlots {
        query,
        full_url,
        partial_url,
        title,
    }
}

/// Whether the scheme is one a browser uses for ordinary pages.
pub fn is_common_protocol(scheme: &str) -> bool {
    let scheme = scheme.trim_end_matches(':').to_ascii_lowercase();
    COMMON_PROTOCOLS.contains(&scheme.as_str())
}

/// Registrable domain with its public suffix stripped:
/// `www.example.co.uk` becomes `example`.
pub fn domain_without_suffix(host: &str) -> Option<String> {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.parse::<std::net::IpAddr>().is_ok() || host.starts_with('[') {
        return None;
    }
    let domain = psl::domain_str(&host)?;
    let suffix = psl::suffix_str(domain)?;
    let label = domain.strip_suffix(suffix)?.trim_end_matches('.');
    non_empty(label)
}

/// URL identity for tab de-duplication: scheme, host, port, path and
/// query. The fragment is ignored. Unparsable URLs compare verbatim.
pub fn normalize_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

/// Shortens `query` to at most `max_chars` characters (plus an ellipsis)
/// by keeping its head and tail.
pub fn short_query(query: &str, max_chars: usize) -> String {
    let chars: Vec<char> = query.chars().collect();
    if chars.len() < max_chars {
        return query.to_string();
    }
    let keep = (chars.len() / 2).min(max_chars / 2);
    let head: String = chars[..keep].iter().collect();
    let tail: String = chars[chars.len() - keep..].iter().collect();
    format!("{}...{}", head, tail)
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
