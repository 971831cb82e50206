//! User agent generation

use rand::seq::SliceRandom;

const PLATFORMS: [&str; 4] = [
    "Windows NT 10.0; Win64; x64",
    "Macintosh; Intel Mac OS X 14_2_1",
    "X11; Linux x86_64",
    "X11; Ubuntu; Linux x86_64",
];

const CLIENTS: [&str; 3] = ["reqwest/0.11", "hyper/0.14", "curl/8.5.0"];

/// Generate a user agent naming this crate, a random client and platform
pub fn generate_user_agent(suffix: Option<&str>) -> String {
    let mut rng = rand::thread_rng();
    let platform = PLATFORMS.choose(&mut rng).copied().unwrap_or(PLATFORMS[0]);
    let client = CLIENTS.choose(&mut rng).copied().unwrap_or(CLIENTS[0]);

    let mut ua = format!(
        "multisearch-rs/{} ({}) {}",
        crate::VERSION,
        platform,
        client
    );
    if let Some(suffix) = suffix.filter(|s| !s.is_empty()) {
        ua.push(' ');
        ua.push_str(suffix);
    }
    ua
}

/// Accept header for backend responses
pub fn accept_any() -> &'static str {
    "application/json,text/plain;q=0.9,*/*;q=0.8"
}
