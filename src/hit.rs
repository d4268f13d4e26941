// Pageview events ("hits")
//
// Producers build a Hit from the incoming request and append it to the
// memstore. Everything below `created_at` in the struct is computed during
// persist: session assignment, referrer scheme, bot classification, and the
// path/user-agent IDs handed out by the sink. Once a hit is queued for storage
// nothing touches it again.

use crate::error::{Error, Result};
use crate::memstore::SessionId;
use crate::site::Collect;
use crate::store::HitSink;
use crate::util::truncate_utf8_safe;
use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Value;
use url::Url;

/// Longest path we store; anything longer is cut at a char boundary
pub const MAX_PATH_BYTES: usize = 2048;

/// Longest referrer we store
pub const MAX_REF_BYTES: usize = 2048;

/// Not a bot, as far as we can tell
pub const BOT_NONE: u8 = 0;

/// User agent looks automated, but the hit is still stored (flagged)
pub const BOT_HEURISTIC: u8 = 1;

/// Known crawler; hits at or above this are ignored entirely
pub const BOT_CRAWLER: u8 = 150;

/// How far in the future `created_at` may be before validation rejects it
const MAX_CLOCK_SKEW_MINUTES: i64 = 10;

/// Crawlers that identify themselves; never counted.
const CRAWLER_MARKERS: &[&str] = &[
    "googlebot",
    "bingbot",
    "yandexbot",
    "baiduspider",
    "duckduckbot",
    "slurp",
    "applebot",
    "ahrefsbot",
    "semrushbot",
    "petalbot",
    "facebookexternalhit",
];

/// Generic automation signals; counted but flagged.
const AUTOMATION_MARKERS: &[&str] = &[
    "bot",
    "crawl",
    "spider",
    "headless",
    "phantomjs",
    "curl/",
    "wget/",
    "python-requests",
    "go-http-client",
];

/// Classify a user-agent header
pub fn detect_bot(user_agent: &str) -> u8 {
    let ua = user_agent.to_ascii_lowercase();
    if CRAWLER_MARKERS.iter().any(|m| ua.contains(m)) {
        BOT_CRAWLER
    } else if AUTOMATION_MARKERS.iter().any(|m| ua.contains(m)) {
        BOT_HEURISTIC
    } else {
        BOT_NONE
    }
}

/// Where a referrer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefScheme {
    /// A regular http(s) URL
    Http,
    /// Not a URL at all (e.g. "newsletter" from a `?ref=` parameter)
    Generated,
    /// A URL with some other scheme (android-app://, file://, ...)
    Other,
}

impl RefScheme {
    /// Single-letter code stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "h",
            Self::Generated => "g",
            Self::Other => "o",
        }
    }

    /// Classify a non-empty referrer string
    pub fn classify(referrer: &str) -> Self {
        match Url::parse(referrer) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => Self::Http,
            Ok(_) => Self::Other,
            Err(_) => Self::Generated,
        }
    }
}

/// A single pageview
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub site: i64,
    pub path: String,
    pub referrer: String,
    pub user_agent: String,
    pub remote_addr: String,
    /// Stable identifier supplied by the client; bypasses fingerprinting
    pub user_session_id: String,
    /// Screen size as "width,height,scale"
    pub size: Option<String>,
    /// ISO 3166 code: "NL" or "US-CA"
    pub location: String,
    pub created_at: DateTime<Utc>,

    pub session: Option<SessionId>,
    pub first_visit: bool,
    pub bot: u8,
    pub ref_scheme: Option<RefScheme>,
    pub path_id: Option<i64>,
    pub user_agent_id: Option<i64>,
}

impl Hit {
    pub fn new(site: i64, path: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            site,
            path: path.into(),
            referrer: String::new(),
            user_agent: String::new(),
            remote_addr: String::new(),
            user_session_id: String::new(),
            size: None,
            location: String::new(),
            created_at,
            session: None,
            first_visit: false,
            bot: BOT_NONE,
            ref_scheme: None,
            path_id: None,
            user_agent_id: None,
        }
    }

    #[must_use]
    pub fn referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = referrer.into();
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn remote_addr(mut self, remote_addr: impl Into<String>) -> Self {
        self.remote_addr = remote_addr.into();
        self
    }

    #[must_use]
    pub fn user_session_id(mut self, token: impl Into<String>) -> Self {
        self.user_session_id = token.into();
        self
    }

    #[must_use]
    pub fn size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    #[must_use]
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Host of the referrer URL, if it parses as one
    pub fn referrer_host(&self) -> Option<String> {
        if self.referrer.is_empty() {
            return None;
        }
        Url::parse(&self.referrer)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }

    /// Fill in the bot flag from the user agent unless the producer already set one
    pub fn detect_bot(&mut self) {
        if self.bot == BOT_NONE {
            self.bot = detect_bot(&self.user_agent);
        }
    }

    /// Null out whatever the site opted out of collecting
    pub fn apply_collect(&mut self, collect: Collect) {
        if !collect.has(Collect::REFERRER) {
            self.referrer.clear();
            self.ref_scheme = None;
        }
        if !collect.has(Collect::SCREEN_SIZE) {
            self.size = None;
        }
        if !collect.has(Collect::USER_AGENT) {
            self.user_agent.clear();
            self.user_agent_id = None;
        }
        if !collect.has(Collect::LOCATION) {
            self.location.clear();
        }
        if !collect.has(Collect::LOCATION_REGION) {
            if let Some((country, _)) = self.location.split_once('-') {
                self.location = country.to_string();
            }
        }
    }

    /// Normalize fields and resolve path/user-agent IDs through the sink
    pub fn defaults(&mut self, sink: &dyn HitSink) -> Result<()> {
        let path = self.path.trim();
        let path = if path.is_empty() || path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        self.path = truncate_utf8_safe(&path, MAX_PATH_BYTES).to_string();

        self.referrer = truncate_utf8_safe(self.referrer.trim(), MAX_REF_BYTES).to_string();
        if self.referrer.is_empty() {
            self.ref_scheme = None;
        } else if self.ref_scheme.is_none() {
            self.ref_scheme = Some(RefScheme::classify(&self.referrer));
        }

        self.location = self.location.trim().to_ascii_uppercase();

        if !self.path.is_empty() {
            self.path_id = Some(sink.path_id(self.site, &self.path)?);
        }
        if !self.user_agent.is_empty() {
            self.user_agent_id = Some(sink.user_agent_id(&self.user_agent)?);
        }
        Ok(())
    }

    /// Known crawlers are dropped without being stored
    pub fn ignore(&self) -> bool {
        self.bot >= BOT_CRAWLER
    }

    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        if self.site <= 0 {
            return Err(Error::validation("site", "must be set"));
        }
        if self.path.is_empty() {
            return Err(Error::validation("path", "required"));
        }
        if self.path_id.is_none() {
            return Err(Error::validation("path_id", "not resolved"));
        }
        if self.created_at > now + Duration::minutes(MAX_CLOCK_SKEW_MINUTES) {
            return Err(Error::validation(
                "created_at",
                format!("in the future: {}", self.created_at),
            ));
        }
        if !valid_location(&self.location) {
            return Err(Error::validation(
                "location",
                format!("not an ISO 3166 code: {:?}", self.location),
            ));
        }
        Ok(())
    }

    /// Values in `store::HIT_COLUMNS` order
    pub fn to_row(&self) -> Vec<Value> {
        fn text_or_null(s: &str) -> Value {
            if s.is_empty() {
                Value::Null
            } else {
                Value::Text(s.to_string())
            }
        }

        vec![
            Value::Integer(self.site),
            self.path_id.map_or(Value::Null, Value::Integer),
            Value::Text(self.referrer.clone()),
            self.ref_scheme
                .map_or(Value::Null, |s| Value::Text(s.as_str().to_string())),
            self.user_agent_id.map_or(Value::Null, Value::Integer),
            self.size.as_deref().map_or(Value::Null, text_or_null),
            Value::Text(self.location.clone()),
            Value::Text(self.created_at.to_rfc3339()),
            Value::Integer(i64::from(self.bot)),
            self.session
                .map_or(Value::Null, |s| Value::Text(s.to_string())),
            Value::Integer(i64::from(self.first_visit)),
        ]
    }
}

/// "" | "NL" | "US-CA"
fn valid_location(loc: &str) -> bool {
    if loc.is_empty() {
        return true;
    }
    let (country, region) = match loc.split_once('-') {
        Some((c, r)) => (c, Some(r)),
        None => (loc, None),
    };
    let country_ok = country.len() == 2 && country.bytes().all(|b| b.is_ascii_uppercase());
    let region_ok = region.map_or(true, |r| {
        (1..=3).contains(&r.len()) && r.bytes().all(|b| b.is_ascii_alphanumeric())
    });
    country_ok && region_ok
}
