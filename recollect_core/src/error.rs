//! Errors returned by the client.

use reqwest::StatusCode;
use thiserror::Error;

/// Everything that can go wrong while talking to ReCollect.
#[derive(Debug, Error)]
pub enum Error {
    /// The feed could not be fetched.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The feed was fetched but is not what we expect.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The private HTTP session could not be built.
    #[error("failed to build HTTP session: {0}")]
    Build(#[source] reqwest::Error),

    /// The base URL could not be parsed.
    #[error("invalid base URL: {0}")]
    Url(#[from] url::ParseError),

    /// The base URL cannot have path segments, e.g. `mailto:`.
    #[error("{0} cannot be used as a base URL")]
    BaseUrl(String),

    /// A summary pattern failed to compile.
    #[error("failed to compile summary pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl Error {
    /// Whether this is a network/transport problem.
    pub fn is_request(&self) -> bool {
        matches!(self, Error::Request(_))
    }

    /// Whether this is an unexpected data format.
    pub fn is_parse(&self) -> bool {
        matches!(self, Error::Parse(_))
    }
}

/// Transport level failures.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} failed with HTTP {status}")]
    Status { url: String, status: StatusCode },
}

/// Feed decoding failures.
///
/// `event` is the 1-based position of the `VEVENT` in the feed, followed by its `UID` if it
/// has one.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("response body is not an iCalendar feed")]
    NotACalendar,

    /// Syntax error reported by the iCalendar reader.
    ///
    /// Only its message is kept, so `ParseError` stays comparable; there is no error source.
    #[error("invalid iCalendar data: {0}")]
    Calendar(String),

    #[error("event {event} has no DTSTART")]
    MissingDate { event: String },

    #[error("event {event} has an invalid DTSTART {value:?}")]
    InvalidDate { event: String, value: String },

    #[error("event {event} has no pickup types")]
    NoPickupTypes { event: String },
}
