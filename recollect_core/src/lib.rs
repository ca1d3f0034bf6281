//! This crate implements a client for the ReCollect Waste pickup schedule API.
//!
//! The schedule is read as an iCalendar feed from
//! <https://api.recollect.net/api/places/{place_id}/services/{service_id}/events.en-US.ics>
//! and turned into [`PickupEvent`]s.

pub use chrono;
pub use reqwest;
pub use url::Url;

pub mod client;
pub mod clock;
pub mod error;
pub mod feed;
pub mod query;

pub use client::{Client, ClientBuilder};
pub use clock::{Clock, FixedClock, LocalClock};
pub use error::{Error, ParseError, RequestError};
pub use feed::{PickupEvent, PickupType};
