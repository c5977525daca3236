//! Authenticated session state.
//!
//! - [`CookieJar`]: cookie store with venue alias rules
//! - [`SessionedClient`]: binds one transport to one jar

pub mod client;
pub mod cookie_jar;

pub use client::{RequestOptions, SessionedClient};
pub use cookie_jar::{parse_set_cookie, render_cookie_header, AliasRule, CookieJar};
