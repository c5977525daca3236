//! Browser fingerprint profiles for the direct HTTPS transport.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Browser whose handshake and header layout the HTTPS transport imitates.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum BrowserProfile {
    /// Chrome 120 on Windows.
    #[default]
    #[strum(to_string = "chrome120")]
    Chrome120,
    /// Chrome 124 on Windows.
    #[strum(to_string = "chrome124")]
    Chrome124,
    /// Edge 101 on Windows.
    #[strum(to_string = "edge101")]
    Edge101,
    /// Firefox 121 on Windows.
    #[strum(to_string = "firefox121")]
    Firefox121,
    /// Safari 17 on macOS.
    #[strum(to_string = "safari17")]
    Safari17,
}

/// HTTP/2 connection settings a browser advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Http2Settings {
    /// SETTINGS_INITIAL_WINDOW_SIZE.
    pub initial_stream_window: u32,
    /// Connection-level WINDOW_UPDATE increment plus default window.
    pub initial_connection_window: u32,
    /// SETTINGS_MAX_FRAME_SIZE.
    pub max_frame_size: u32,
    /// SETTINGS_MAX_HEADER_LIST_SIZE.
    pub max_header_list_size: u32,
}

impl BrowserProfile {
    /// User-Agent string.
    pub fn user_agent(self) -> &'static str {
        match self {
            BrowserProfile::Chrome120 => "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            BrowserProfile::Chrome124 => "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
            BrowserProfile::Edge101 => "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/101.0.4951.64 Safari/537.36 Edg/101.0.1210.47",
            BrowserProfile::Firefox121 => "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
            BrowserProfile::Safari17 => "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
        }
    }

    /// Headers in the order the browser sends them. User-Agent is placed by
    /// the client builder.
    pub fn default_headers(self) -> Vec<(String, String)> {
        let pairs: &[(&str, &str)] = match self {
            BrowserProfile::Chrome120 => &[
                ("sec-ch-ua", r#""Not_A Brand";v="8", "Chromium";v="120", "Google Chrome";v="120""#),
                ("sec-ch-ua-mobile", "?0"),
                ("sec-ch-ua-platform", r#""Windows""#),
                ("accept", "application/json, text/plain, */*"),
                ("sec-fetch-site", "same-origin"),
                ("sec-fetch-mode", "cors"),
                ("sec-fetch-dest", "empty"),
                ("accept-language", "en-US,en;q=0.9"),
            ],
            BrowserProfile::Chrome124 => &[
                ("sec-ch-ua", r#""Chromium";v="124", "Google Chrome";v="124", "Not-A.Brand";v="99""#),
                ("sec-ch-ua-mobile", "?0"),
                ("sec-ch-ua-platform", r#""Windows""#),
                ("accept", "application/json, text/plain, */*"),
                ("sec-fetch-site", "same-origin"),
                ("sec-fetch-mode", "cors"),
                ("sec-fetch-dest", "empty"),
                ("accept-language", "en-US,en;q=0.9"),
                ("priority", "u=1, i"),
            ],
            BrowserProfile::Edge101 => &[
                ("sec-ch-ua", r#"" Not A;Brand";v="99", "Chromium";v="101", "Microsoft Edge";v="101""#),
                ("sec-ch-ua-mobile", "?0"),
                ("sec-ch-ua-platform", r#""Windows""#),
                ("accept", "application/json, text/plain, */*"),
                ("sec-fetch-site", "same-origin"),
                ("sec-fetch-mode", "cors"),
                ("sec-fetch-dest", "empty"),
                ("accept-language", "en-US,en;q=0.9"),
            ],
            BrowserProfile::Firefox121 => &[
                ("accept", "application/json, text/plain, */*"),
                ("accept-language", "en-US,en;q=0.5"),
                ("sec-fetch-dest", "empty"),
                ("sec-fetch-mode", "cors"),
                ("sec-fetch-site", "same-origin"),
                ("te", "trailers"),
            ],
            BrowserProfile::Safari17 => &[
                ("accept", "application/json, text/plain, */*"),
                ("sec-fetch-site", "same-origin"),
                ("accept-language", "en-US,en;q=0.9"),
                ("sec-fetch-mode", "cors"),
                ("sec-fetch-dest", "empty"),
            ],
        };
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    /// HTTP/2 SETTINGS the browser sends.
    pub fn http2(self) -> Http2Settings {
        match self {
            BrowserProfile::Chrome120 | BrowserProfile::Chrome124 | BrowserProfile::Edge101 => {
                Http2Settings {
                    initial_stream_window: 6_291_456,
                    initial_connection_window: 15_728_640,
                    max_frame_size: 16_384,
                    max_header_list_size: 262_144,
                }
            }
            BrowserProfile::Firefox121 => Http2Settings {
                initial_stream_window: 131_072,
                initial_connection_window: 12_517_377,
                max_frame_size: 16_384,
                max_header_list_size: 65_536,
            },
            BrowserProfile::Safari17 => Http2Settings {
                initial_stream_window: 4_194_304,
                initial_connection_window: 10_485_760,
                max_frame_size: 16_384,
                max_header_list_size: 65_536,
            },
        }
    }

    /// TCP keep-alive interval browsers use for pooled connections.
    pub fn keepalive(self) -> Duration {
        match self {
            BrowserProfile::Firefox121 => Duration::from_secs(115),
            _ => Duration::from_secs(45),
        }
    }
}
