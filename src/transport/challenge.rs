//! Anti-bot challenge page classification shared by every transport.

use once_cell::sync::Lazy;
use regex::Regex;

/// Body markers of an interactive verification page.
static BODY_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(_cf_chl_opt|cf-chl-[a-z]+|challenge-platform|cf-turnstile|<title>\s*just a moment\.{0,3}\s*</title>|attention required|captcha)",
    )
    .expect("static challenge regex is valid")
});

/// Markers that identify a challenge page even on a 2xx status.
static SCRIPT_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(_cf_chl_opt|/cdn-cgi/challenge-platform/)")
        .expect("static challenge script regex is valid")
});

/// Statuses the anti-bot layer serves challenge pages with.
const CHALLENGE_STATUSES: [u16; 3] = [403, 429, 503];

/// Why a response was classified as a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeMatch {
    /// Marker text that matched.
    pub marker: String,
}

/// Classify a response as an interactive challenge.
///
/// `headers` must be name/value pairs; name comparison is case-insensitive.
pub fn detect(status: u16, headers: &[(String, String)], body: &str) -> Option<ChallengeMatch> {
    let mitigated = headers
        .iter()
        .any(|(name, value)| name.eq_ignore_ascii_case("cf-mitigated") && value.eq_ignore_ascii_case("challenge"));
    if mitigated {
        return Some(ChallengeMatch {
            marker: "cf-mitigated: challenge".to_string(),
        });
    }

    if CHALLENGE_STATUSES.contains(&status) {
        if let Some(found) = BODY_MARKERS.find(body) {
            return Some(ChallengeMatch {
                marker: found.as_str().to_string(),
            });
        }
    }

    SCRIPT_MARKERS.find(body).map(|found| ChallengeMatch {
        marker: found.as_str().to_string(),
    })
}

/// Whether an HTML page still shows a challenge (used while waiting for clearance).
pub fn page_has_challenge(html: &str) -> bool {
    BODY_MARKERS.is_match(html)
}
