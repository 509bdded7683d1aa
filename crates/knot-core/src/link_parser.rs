
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

/// Sigil marking a literal, non-navigable occurrence: `[[~Name]]`.
pub const ESCAPE_SIGIL: char = '~';

// Compile regex once, reuse across calls
static WIKILINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[(.*?)\]\]").unwrap()
});

/// One distinct `[[...]]` token as it appears in the text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkToken {
    /// Full token text including delimiters, e.g. `[[~Foo]]`
    pub raw: String,
    /// Text between the delimiters, e.g. `~Foo`
    pub body: String,
}

impl LinkToken {
    pub fn from_body(body: &str) -> Self {
        Self {
            raw: format!("[[{}]]", body),
            body: body.to_string(),
        }
    }

    pub fn is_escaped(&self) -> bool {
        self.body.starts_with(ESCAPE_SIGIL)
    }

    /// Note name with the escape sigil removed.
    pub fn name(&self) -> &str {
        self.body.strip_prefix(ESCAPE_SIGIL).unwrap_or(&self.body)
    }
}

/// Extract distinct wikilink tokens in first-seen order.
/// Tokens are distinct by exact text, so `[[Foo]]` and `[[~Foo]]` are both kept.
/// `[[]]` is treated as plain text.
pub fn extract_link_tokens(markdown: &str) -> Vec<LinkToken> {
    let mut seen = HashSet::new();
    let mut tokens = Vec::new();

    for cap in WIKILINK_RE.captures_iter(markdown) {
        let body = &cap[1];
        if body.is_empty() {
            continue;
        }
        if seen.insert(cap[0].to_string()) {
            tokens.push(LinkToken {
                raw: cap[0].to_string(),
                body: body.to_string(),
            });
        }
    }

    tokens
}

/// Names of the navigable (non-escaped, non-empty) tokens.
pub fn bare_names(tokens: &[LinkToken]) -> BTreeSet<String> {
    tokens
        .iter()
        .filter(|t| !t.is_escaped())
        .map(|t| t.body.clone())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Shorthand for `bare_names(&extract_link_tokens(markdown))`.
pub fn extract_bare_names(markdown: &str) -> BTreeSet<String> {
    bare_names(&extract_link_tokens(markdown))
}

/// Rewrite every occurrence of the given tokens for rendering.
///
/// A navigable token becomes `[name](link_format(name))`, an escaped one
/// becomes the literal `[[name]]`. Replacement happens in one left-to-right
/// pass, so text produced for one token is never matched again.
pub fn render_links<F>(markdown: &str, tokens: &[LinkToken], link_format: F) -> String
where
    F: Fn(&str) -> String,
{
    let wanted: HashSet<&str> = tokens.iter().map(|t| t.raw.as_str()).collect();

    WIKILINK_RE
        .replace_all(markdown, |cap: &Captures| {
            if !wanted.contains(&cap[0]) {
                return cap[0].to_string();
            }
            let token = LinkToken::from_body(&cap[1]);
            if token.is_escaped() {
                format!("[[{}]]", token.name())
            } else {
                format!("[{}]({})", token.name(), link_format(token.name()))
            }
        })
        .into_owned()
}

/// Route shape used for navigable links, chosen per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkFormat {
    /// `#name`, for single-page clients routed by URL fragment
    Hash,
    /// `/notes/name`
    #[default]
    Notes,
    /// `/public/name`, for the read-only public view
    Public,
}

impl LinkFormat {
    pub fn format(&self, name: &str) -> String {
        let encoded = urlencoding::encode(name);
        match self {
            LinkFormat::Hash => format!("#{}", encoded),
            LinkFormat::Notes => format!("/notes/{}", encoded),
            LinkFormat::Public => format!("/public/{}", encoded),
        }
    }
}
