//! This parser turns the ReCollect iCalendar feed into pickup events.

use std::{
    collections::HashMap,
    io::{BufReader, Cursor},
};

use chrono::{NaiveDate, NaiveDateTime};
use ical::{parser::ical::component::IcalEvent, IcalParser};
use regex::Regex;

use crate::error::ParseError;

static FORMAT: &str = "%Y%m%d";
static DATE_TIME_FORMAT: &str = "%Y%m%dT%H%M%S";
static CALENDAR_HEADER: &str = "BEGIN:VCALENDAR";

/// Pickup types are separated by commas, ampersands or the word "and".
static TYPE_SEPARATOR: &str = r"(?i)\s*(?:,|&|\band\b)\s*";

static FRIENDLY_NAMES: [(&str, &str); 9] = [
    ("garbage", "Trash"),
    ("trash", "Trash"),
    ("recycling", "Recycling"),
    ("compost", "Compost"),
    ("yard_waste", "Yard Waste"),
    ("bulky", "Bulky Items"),
    ("glass", "Glass"),
    ("paper", "Paper"),
    ("christmas_tree", "Christmas Tree"),
];

/// A category of material collected during a pickup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PickupType {
    /// The token used by the feed, e.g. `garbage`.
    pub name: String,
    /// A display name, if the token is known.
    pub friendly_name: Option<String>,
}

impl PickupType {
    pub fn new(name: impl Into<String>, friendly_name: Option<&str>) -> Self {
        Self {
            name: name.into(),
            friendly_name: friendly_name.map(String::from),
        }
    }

    /// The friendly name if there is one, otherwise the feed token.
    pub fn display_name(&self) -> &str {
        self.friendly_name.as_deref().unwrap_or(&self.name)
    }
}

/// One scheduled collection.
///
/// Events compare by value. Sort chronologically with `sort_by_key(|event| event.date)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PickupEvent {
    pub date: NaiveDate,
    /// Never empty.
    pub pickup_types: Vec<PickupType>,
    /// May be empty.
    pub area_name: String,
}

trait GetIcalProperty {
    fn get_ical_property_value(&self, name: &str) -> Option<&String>;
}

impl GetIcalProperty for IcalEvent {
    fn get_ical_property_value(&self, name: &str) -> Option<&String> {
        self.properties
            .iter()
            .find(|property| property.name.eq_ignore_ascii_case(name))
            .and_then(|property| property.value.as_ref())
    }
}

/// Decodes feed bodies.
///
/// Holds the compiled summary grammar and the table resolving feed tokens to friendly names.
#[derive(Debug, Clone)]
pub struct FeedParser {
    type_separator: Regex,
    friendly_names: HashMap<String, String>,
}

impl FeedParser {
    /// A parser with the built-in friendly-name table.
    pub fn new() -> Result<Self, regex::Error> {
        let friendly_names = FRIENDLY_NAMES
            .iter()
            .map(|(token, name)| (String::from(*token), String::from(*name)))
            .collect();
        Ok(Self {
            type_separator: Regex::new(TYPE_SEPARATOR)?,
            friendly_names,
        })
    }

    /// Adds or replaces the friendly name of a feed token.
    pub fn insert_friendly_name(&mut self, token: &str, friendly_name: &str) {
        self.friendly_names
            .insert(token.trim().to_lowercase(), String::from(friendly_name));
    }

    /// Looks up the friendly name of a feed token, ignoring case.
    pub fn friendly_name(&self, token: &str) -> Option<&str> {
        self.friendly_names
            .get(&token.trim().to_lowercase())
            .map(String::as_str)
    }

    /// Parse a feed body into pickup events, in feed order.
    ///
    /// A blank body is an empty feed. Any malformed event fails the whole parse.
    pub fn parse(&self, ics: &str) -> Result<Vec<PickupEvent>, ParseError> {
        let ics = ics.trim_start_matches('\u{feff}').trim_start();
        if ics.trim_end().is_empty() {
            return Ok(vec![]);
        }
        let is_calendar = ics
            .get(..CALENDAR_HEADER.len())
            .is_some_and(|header| header.eq_ignore_ascii_case(CALENDAR_HEADER));
        if !is_calendar {
            return Err(ParseError::NotACalendar);
        }
        let parser = IcalParser::new(BufReader::new(Cursor::new(ics)));
        let mut pickup_events = vec![];
        for ical_calendar_result in parser {
            let ical_calendar =
                ical_calendar_result.map_err(|err| ParseError::Calendar(err.to_string()))?;
            for ical_event in &ical_calendar.events {
                let position = pickup_events.len() + 1;
                pickup_events.push(self.parse_event(position, ical_event)?);
            }
        }
        Ok(pickup_events)
    }

    fn parse_event(
        &self,
        position: usize,
        ical_event: &IcalEvent,
    ) -> Result<PickupEvent, ParseError> {
        let event = describe(position, ical_event.get_ical_property_value("UID"));
        let dt_start = ical_event
            .get_ical_property_value("DTSTART")
            .ok_or_else(|| ParseError::MissingDate {
                event: event.clone(),
            })?;
        let date = parse_date(dt_start).ok_or_else(|| ParseError::InvalidDate {
            event: event.clone(),
            value: dt_start.clone(),
        })?;
        let summary = ical_event
            .get_ical_property_value("SUMMARY")
            .map(|summary| unescape(summary))
            .unwrap_or_default();
        let (area_name, types) = match summary.split_once(':') {
            Some((area_name, types)) => (Some(String::from(area_name.trim())), types),
            None => (None, summary.as_str()),
        };
        let area_name = area_name
            .or_else(|| {
                ical_event
                    .get_ical_property_value("LOCATION")
                    .map(|location| String::from(unescape(location).trim()))
            })
            .unwrap_or_default();
        let pickup_types: Vec<PickupType> = self
            .type_separator
            .split(types)
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| PickupType::new(token, self.friendly_name(token)))
            .collect();
        if pickup_types.is_empty() {
            return Err(ParseError::NoPickupTypes { event });
        }
        Ok(PickupEvent {
            date,
            pickup_types,
            area_name,
        })
    }
}

/// `DTSTART` is either a date or a local/UTC date-time; only the date is kept.
fn parse_date(dt_start: &str) -> Option<NaiveDate> {
    let dt_start = dt_start.trim();
    if dt_start.len() == 8 {
        return NaiveDate::parse_from_str(dt_start, FORMAT).ok();
    }
    let date_time = dt_start.strip_suffix('Z').unwrap_or(dt_start);
    NaiveDateTime::parse_from_str(date_time, DATE_TIME_FORMAT)
        .ok()
        .map(|date_time| date_time.date())
}

fn describe(position: usize, uid: Option<&String>) -> String {
    match uid {
        Some(uid) => format!("#{position} ({uid})"),
        None => format!("#{position}"),
    }
}

/// Undo iCalendar TEXT escaping.
fn unescape(text: &str) -> String {
    let mut unescaped = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            unescaped.push(c);
            continue;
        }
        match chars.next() {
            Some('n' | 'N') => unescaped.push('\n'),
            Some(escaped) => unescaped.push(escaped),
            None => unescaped.push('\\'),
        }
    }
    unescaped
}
