//! In-memory authenticated-session cookie store with alias expansion.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use smallvec::SmallVec;

/// Observed cookie name -> additional names the venue requires it under.
///
/// The venue issues its auth tokens as `wat`/`wrt` but only accepts them back
/// as `msu_wat`/`msu_wrt`.
static VENUE_ALIASES: Lazy<Vec<AliasRule>> = Lazy::new(|| {
    vec![
        AliasRule::new("wat", &["msu_wat"]),
        AliasRule::new("wrt", &["msu_wrt"]),
    ]
});

/// Static mapping from an observed cookie name to its aliases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasRule {
    /// Name the cookie is observed under.
    pub source: &'static str,
    /// Names it must also be stored under.
    pub aliases: SmallVec<[&'static str; 2]>,
}

impl AliasRule {
    /// Create a rule.
    pub fn new(source: &'static str, aliases: &[&'static str]) -> Self {
        Self {
            source,
            aliases: aliases.iter().copied().collect(),
        }
    }

    /// The venue's auth-token aliases.
    pub fn venue_defaults() -> Vec<AliasRule> {
        VENUE_ALIASES.clone()
    }
}

/// Name -> value session store.
///
/// All mutation happens under one mutex so an alias-expanded `set` is never
/// observed half-applied.
#[derive(Debug)]
pub struct CookieJar {
    cookies: Mutex<HashMap<String, String>>,
    rules: Vec<AliasRule>,
}

impl CookieJar {
    /// Create an empty jar with the venue alias rules.
    pub fn new() -> Self {
        Self::with_rules(AliasRule::venue_defaults())
    }

    /// Create an empty jar with custom alias rules.
    pub fn with_rules(rules: Vec<AliasRule>) -> Self {
        Self {
            cookies: Mutex::new(HashMap::new()),
            rules,
        }
    }

    /// Set a cookie and every alias of its name. Last write wins.
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        let mut cookies = self.cookies.lock();
        self.insert_expanded(&mut cookies, name, value);
    }

    /// Set several cookies in one critical section.
    ///
    /// Alias sources are applied after every other entry, so a batch holding
    /// both `wat` and a stale `msu_wat` ends with the `wat` value under both
    /// names whatever order the batch lists them in.
    pub fn set_all<I, K, V>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let (sources, plain): (Vec<(String, String)>, Vec<(String, String)>) = entries
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .partition(|(name, _)| self.is_alias_source(name));

        let mut cookies = self.cookies.lock();
        for (name, value) in plain.into_iter().chain(sources) {
            self.insert_expanded(&mut cookies, name, value);
        }
    }

    fn is_alias_source(&self, name: &str) -> bool {
        self.rules.iter().any(|rule| rule.source == name)
    }

    fn insert_expanded(&self, cookies: &mut HashMap<String, String>, name: String, value: String) {
        if let Some(rule) = self.rules.iter().find(|rule| rule.source == name) {
            for alias in &rule.aliases {
                cookies.insert((*alias).to_string(), value.clone());
            }
        }
        cookies.insert(name, value);
    }

    /// Get a single cookie value.
    pub fn get(&self, name: &str) -> Option<String> {
        self.cookies.lock().get(name).cloned()
    }

    /// Snapshot of all cookies.
    pub fn get_all(&self) -> HashMap<String, String> {
        self.cookies.lock().clone()
    }

    /// Union with `other`; `other` wins on collision.
    ///
    /// `other` already holds its aliases, so its entries are copied as stored
    /// rather than expanded again.
    pub fn merge(&self, other: &CookieJar) {
        if std::ptr::eq(self, other) {
            return;
        }
        let entries = other.get_all();
        self.cookies.lock().extend(entries);
    }

    /// Drop all session state. Idempotent.
    pub fn clear(&self) {
        self.cookies.lock().clear();
    }

    /// Number of stored names (aliases included).
    pub fn len(&self) -> usize {
        self.cookies.lock().len()
    }

    /// Whether the jar is empty.
    pub fn is_empty(&self) -> bool {
        self.cookies.lock().is_empty()
    }

    /// Render as a `Cookie` request header value, sorted by name.
    pub fn header_value(&self) -> Option<String> {
        render_cookie_header(&self.get_all())
    }
}

impl Default for CookieJar {
    fn default() -> Self {
        Self::new()
    }
}

/// Render `name=value; ...` sorted by name, or `None` when empty.
pub fn render_cookie_header(cookies: &HashMap<String, String>) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    let mut pairs: Vec<_> = cookies.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    Some(
        pairs
            .into_iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// Extract the `name=value` pair from a raw `Set-Cookie` header value.
///
/// Attributes after the first `;` are ignored.
pub fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim().trim_matches('"');
    Some((name.to_string(), value.to_string()))
}
