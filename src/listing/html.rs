//! Parser for Apache-style HTML directory index pages.
//!
//! Works on both the table layout (`<td class="indexcolname">`) and the
//! preformatted layout (`<pre><a href=..>name</a>  date  size</pre>`): every
//! anchor naming a direct child is an entry, and the text up to the next
//! anchor or row end holds its date and size.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{NaiveDateTime, TimeZone, Utc};
use percent_encoding::percent_decode_str;
use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use super::{EntryKind, RemoteEntry, RemoteSize};

struct Patterns {
    anchor: Regex,
    tags: Regex,
    row_end: Regex,
}

fn compile_patterns() -> Result<Patterns, regex::Error> {
    Ok(Patterns {
        anchor: Regex::new(
            r#"(?is)<a\s[^>]*?href\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))[^>]*>.*?</a\s*>"#,
        )?,
        tags: Regex::new(r"(?s)<[^>]*>")?,
        row_end: Regex::new(r"(?i)</tr\s*>")?,
    })
}

/// Compiled on first use and shared by every later parse.
fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| match compile_patterns() {
            Ok(patterns) => Some(patterns),
            Err(e) => {
                warn!("index page patterns failed to compile: {}", e);
                None
            }
        })
        .as_ref()
}

/// Parse `body`, the index page served at `dir_url`.
///
/// Anchors that do not name a direct child of `dir_url` (parent links, sort
/// links, fragments, other hosts) are skipped. When a name repeats, the
/// last row wins and keeps the last row's position.
pub fn parse_index(body: &str, dir_url: &Url, time_formats: &[String]) -> Vec<RemoteEntry> {
    let Some(Patterns {
        anchor,
        tags,
        row_end,
    }) = patterns()
    else {
        return Vec::new();
    };

    let matches: Vec<_> = anchor.captures_iter(body).collect();
    let mut entries = Vec::new();

    for (idx, caps) in matches.iter().enumerate() {
        let Some(href) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) else {
            continue;
        };
        let Some((name, kind)) = child_name(dir_url, &decode_entities(href.as_str())) else {
            continue;
        };

        let Some(whole) = caps.get(0) else { continue };
        let context_end = matches
            .get(idx + 1)
            .and_then(|next| next.get(0))
            .map_or(body.len(), |m| m.start());
        let mut context = &body[whole.end()..context_end];
        if let Some(end) = row_end.find(context) {
            context = &context[..end.start()];
        }
        let text = decode_entities(&tags.replace_all(context, " "));
        let (modified_at, size) = scan_columns(&text, time_formats);

        entries.push(RemoteEntry {
            name,
            kind,
            size: if kind == EntryKind::Directory {
                RemoteSize::Unknown
            } else {
                size
            },
            modified_at,
        });
    }

    dedup_last_wins(entries)
}

/// Name and kind of the child `href` points at, if it is a direct child.
fn child_name(dir_url: &Url, href: &str) -> Option<(String, EntryKind)> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with('?') {
        return None;
    }
    let target = dir_url.join(href).ok()?;
    if target.scheme() != dir_url.scheme()
        || target.host_str() != dir_url.host_str()
        || target.port_or_known_default() != dir_url.port_or_known_default()
        || target.query().is_some()
        || target.fragment().is_some()
    {
        return None;
    }

    let rest = target.path().strip_prefix(dir_url.path())?;
    let (segment, kind) = match rest.strip_suffix('/') {
        Some(seg) => (seg, EntryKind::Directory),
        None => (rest, EntryKind::File),
    };
    if segment.is_empty() || segment.contains('/') {
        return None;
    }

    let name = percent_decode_str(segment).decode_utf8().ok()?.into_owned();
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return None;
    }
    Some((name, kind))
}

/// Find a timestamp and a size token in the text following an anchor.
fn scan_columns(
    text: &str,
    time_formats: &[String],
) -> (Option<chrono::DateTime<Utc>>, RemoteSize) {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let mut modified_at = None;
    let mut used = vec![false; tokens.len()];

    'search: for i in 0..tokens.len() {
        for width in [2usize, 1] {
            if i + width > tokens.len() {
                continue;
            }
            let candidate = tokens[i..i + width].join(" ");
            for format in time_formats {
                if let Ok(naive) = NaiveDateTime::parse_from_str(&candidate, format) {
                    modified_at = Some(Utc.from_utc_datetime(&naive));
                    used[i..i + width].iter_mut().for_each(|u| *u = true);
                    break 'search;
                }
            }
        }
    }

    let size = tokens
        .iter()
        .zip(&used)
        .filter(|(_, used)| !**used)
        .find_map(|(token, _)| RemoteSize::parse(token))
        .unwrap_or_default();

    if modified_at.is_none() && !tokens.is_empty() {
        debug!("no timestamp in listing row {:?}", text.trim());
    }
    (modified_at, size)
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn dedup_last_wins(entries: Vec<RemoteEntry>) -> Vec<RemoteEntry> {
    let last: HashMap<&str, usize> = entries
        .iter()
        .enumerate()
        .map(|(idx, e)| (e.name.as_str(), idx))
        .collect();
    let keep: Vec<bool> = entries
        .iter()
        .enumerate()
        .map(|(idx, e)| last.get(e.name.as_str()) == Some(&idx))
        .collect();
    entries
        .into_iter()
        .zip(keep)
        .filter_map(|(e, keep)| keep.then_some(e))
        .collect()
}
