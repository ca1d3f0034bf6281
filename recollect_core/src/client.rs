//! This client fetches the pickup feed of a place and service and answers queries over it.

use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, instrument, trace, warn};
use url::Url;

use crate::{
    clock::{Clock, LocalClock},
    error::{Error, RequestError},
    feed::{FeedParser, PickupEvent},
    query,
};

static BASE_URL: &str = "https://api.recollect.net";
static FEED_FILE: &str = "events.en-US.ics";
/// ReCollect mixes reminder-only entries into the feed unless asked not to.
static HIDE_REMINDERS: (&str, &str) = ("hide", "reminder_only");

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// The HTTP session used for requests, tagged with who is responsible for closing it.
#[derive(Debug)]
pub(crate) enum Session {
    /// Created by the client and closed with it.
    Owned(reqwest::Client),
    /// Supplied by the caller; the client never closes it.
    Borrowed(reqwest::Client),
}

impl Session {
    fn http_client(&self) -> &reqwest::Client {
        match self {
            Session::Owned(http_client) | Session::Borrowed(http_client) => http_client,
        }
    }

    fn is_owned(&self) -> bool {
        matches!(self, Session::Owned(_))
    }
}

/// A client bound to one ReCollect place and service.
#[derive(Debug)]
pub struct Client {
    place_id: String,
    service_id: String,
    feed_url: Url,
    session: Session,
    parser: FeedParser,
    clock: Box<dyn Clock>,
}

/// Builder for [`Client`].
#[derive(Debug)]
pub struct ClientBuilder {
    place_id: String,
    service_id: String,
    base_url: Option<Url>,
    session: Option<reqwest::Client>,
    timeout: Option<Duration>,
    clock: Option<Box<dyn Clock>>,
    friendly_names: Vec<(String, String)>,
}

impl ClientBuilder {
    fn new(place_id: &str, service_id: &str) -> Self {
        Self {
            place_id: String::from(place_id),
            service_id: String::from(service_id),
            base_url: None,
            session: None,
            timeout: None,
            clock: None,
            friendly_names: vec![],
        }
    }

    /// Overrides `https://api.recollect.net`.
    pub fn base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Use an already open session instead of creating a private one.
    ///
    /// The session stays the caller's: the client will never close it.
    pub fn session(mut self, session: reqwest::Client) -> Self {
        self.session = Some(session);
        self
    }

    /// Total request timeout of the private session (default: 10s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Where "today" comes from for [`Client::get_next_pickup_event`] (default: local time).
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }

    /// Adds or replaces the friendly name shown for a feed token.
    pub fn friendly_name(mut self, token: &str, friendly_name: &str) -> Self {
        self.friendly_names
            .push((String::from(token), String::from(friendly_name)));
        self
    }

    pub fn build(self) -> Result<Client, Error> {
        let base_url = match self.base_url {
            Some(base_url) => base_url,
            None => Url::parse(BASE_URL)?,
        };
        let feed_url = feed_url(base_url, &self.place_id, &self.service_id)?;
        let session = match self.session {
            Some(http_client) => {
                if let Some(timeout) = self.timeout {
                    warn!(?timeout, "ignoring timeout, the borrowed session keeps its own");
                }
                Session::Borrowed(http_client)
            }
            None => {
                let http_client = reqwest::Client::builder()
                    .timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT))
                    .build()
                    .map_err(Error::Build)?;
                Session::Owned(http_client)
            }
        };
        let mut parser = FeedParser::new()?;
        for (token, friendly_name) in &self.friendly_names {
            parser.insert_friendly_name(token, friendly_name);
        }
        Ok(Client {
            place_id: self.place_id,
            service_id: self.service_id,
            feed_url,
            session,
            parser,
            clock: self.clock.unwrap_or_else(|| Box::new(LocalClock)),
        })
    }
}

/// `{base_url}/api/places/{place_id}/services/{service_id}/events.en-US.ics`, with the IDs escaped.
fn feed_url(base_url: Url, place_id: &str, service_id: &str) -> Result<Url, Error> {
    let base = base_url.to_string();
    let mut feed_url = base_url;
    feed_url
        .path_segments_mut()
        .map_err(|()| Error::BaseUrl(base))?
        .pop_if_empty()
        .extend(["api", "places", place_id, "services", service_id, FEED_FILE]);
    Ok(feed_url)
}

impl Client {
    /// A client with its own private session.
    pub fn new(place_id: &str, service_id: &str) -> Result<Self, Error> {
        Self::builder(place_id, service_id).build()
    }

    pub fn builder(place_id: &str, service_id: &str) -> ClientBuilder {
        ClientBuilder::new(place_id, service_id)
    }

    pub fn place_id(&self) -> &str {
        &self.place_id
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn feed_url(&self) -> &Url {
        &self.feed_url
    }

    /// Whether the client created its session and will close it.
    pub fn owns_session(&self) -> bool {
        self.session.is_owned()
    }

    /// Get the pickup events within `[start_date, end_date]`, in feed order.
    ///
    /// A missing bound is unbounded on that side.
    #[instrument(skip(self), fields(place_id = %self.place_id, service_id = %self.service_id))]
    pub async fn get_pickup_events(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<PickupEvent>, Error> {
        let pickup_events = self.get_all_pickup_events().await?;
        Ok(query::filter_by_date(pickup_events, start_date, end_date))
    }

    /// Get the earliest pickup event today or later.
    ///
    /// `Ok(None)` means there is no upcoming pickup in the feed.
    #[instrument(skip(self), fields(place_id = %self.place_id, service_id = %self.service_id))]
    pub async fn get_next_pickup_event(&self) -> Result<Option<PickupEvent>, Error> {
        let pickup_events = self.get_all_pickup_events().await?;
        let today = self.clock.today();
        let next_pickup_event = query::next_pickup_event(pickup_events, today);
        if next_pickup_event.is_none() {
            debug!(%today, "no pickup events left");
        }
        Ok(next_pickup_event)
    }

    /// Close the client. An owned session is closed with it, a borrowed one is left open.
    pub fn close(self) {
        match self.session {
            Session::Owned(_) => debug!("closing owned session"),
            Session::Borrowed(_) => debug!("releasing borrowed session"),
        }
    }

    async fn get_all_pickup_events(&self) -> Result<Vec<PickupEvent>, Error> {
        let ics = self.get_feed().await?;
        let pickup_events = self.parser.parse(&ics)?;
        debug!(count = pickup_events.len(), "parsed pickup events");
        Ok(pickup_events)
    }

    /// Get the iCalendar feed from the official server.
    async fn get_feed(&self) -> Result<String, RequestError> {
        let url = self.feed_url.as_str();
        debug!(%url, "requesting pickup feed");
        let response = self
            .session
            .http_client()
            .get(self.feed_url.clone())
            .query(&[HIDE_REMINDERS])
            .send()
            .await
            .map_err(|source| RequestError::Transport {
                url: String::from(url),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(RequestError::Status {
                url: String::from(url),
                status,
            });
        }
        let ics = response
            .text()
            .await
            .map_err(|source| RequestError::Transport {
                url: String::from(url),
                source,
            })?;
        trace!(body_len = ics.len(), "pickup feed received");
        Ok(ics)
    }
}

#[cfg(test)]
mod tests {
    use std::{net::TcpListener, str::FromStr, time::Duration};

    use chrono::NaiveDate;
    use url::Url;
    use wiremock::{
        matchers::{method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use crate::{
        client::Client,
        clock::FixedClock,
        error::{Error, RequestError},
        feed::PickupType,
    };

    static TEST_PLACE_ID: &str = "12345-abcde";
    static TEST_SERVICE_ID: &str = "123";
    static FEED_PATH: &str = "/api/places/12345-abcde/services/123/events.en-US.ics";

    fn date(date: &str) -> NaiveDate {
        NaiveDate::from_str(date).unwrap()
    }

    async fn serve(status: u16, body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(FEED_PATH))
            .and(query_param("hide", "reminder_only"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    async fn serve_fixture() -> MockServer {
        serve(200, include_str!("feed/tests/pickup_events.ics")).await
    }

    fn client(server: &MockServer, today: &str) -> Client {
        Client::builder(TEST_PLACE_ID, TEST_SERVICE_ID)
            .base_url(Url::parse(&server.uri()).unwrap())
            .session(reqwest::Client::new())
            .clock(FixedClock(date(today)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_create_client() {
        let client = Client::new(TEST_PLACE_ID, TEST_SERVICE_ID).unwrap();
        assert_eq!(client.place_id(), TEST_PLACE_ID);
        assert_eq!(client.service_id(), TEST_SERVICE_ID);
        assert!(client.owns_session());
        assert_eq!(
            client.feed_url().as_str(),
            "https://api.recollect.net/api/places/12345-abcde/services/123/events.en-US.ics"
        );
    }

    #[test]
    fn test_feed_url_escapes_ids() {
        let client = Client::new("a/b c", "248").unwrap();
        assert_eq!(
            client.feed_url().path(),
            "/api/places/a%2Fb%20c/services/248/events.en-US.ics"
        );
    }

    #[test]
    fn test_borrowed_session_is_not_owned() {
        let client = Client::builder(TEST_PLACE_ID, TEST_SERVICE_ID)
            .session(reqwest::Client::new())
            .timeout(Duration::from_secs(1))
            .build()
            .unwrap();
        assert!(!client.owns_session());
    }

    #[tokio::test]
    async fn test_get_next_pickup_event() {
        let server = serve_fixture().await;
        let client = client(&server, "2020-10-31");
        let next_pickup_event = client.get_next_pickup_event().await.unwrap().unwrap();
        assert_eq!(next_pickup_event.date, date("2020-11-02"));
        assert_eq!(
            next_pickup_event.pickup_types,
            vec![
                PickupType::new("garbage", Some("Trash")),
                PickupType::new("recycle", None),
                PickupType::new("organics", None),
            ]
        );
        assert_eq!(next_pickup_event.area_name, "Atlantis");
    }

    #[tokio::test]
    async fn test_get_next_pickup_event_same_day() {
        let server = serve_fixture().await;
        let client = client(&server, "2020-11-02");
        let next_pickup_event = client.get_next_pickup_event().await.unwrap().unwrap();
        assert_eq!(next_pickup_event.date, date("2020-11-02"));
    }

    #[tokio::test]
    async fn test_get_next_pickup_event_out_of_order_feed() {
        let server = serve_fixture().await;
        let client = client(&server, "2020-11-03");
        let next_pickup_event = client.get_next_pickup_event().await.unwrap().unwrap();
        assert_eq!(next_pickup_event.date, date("2020-11-09"));
    }

    #[tokio::test]
    async fn test_get_next_pickup_event_none_left() {
        let server = serve_fixture().await;
        let client = client(&server, "2020-12-01");
        assert_eq!(client.get_next_pickup_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_next_pickup_event_middle_of_month() {
        let ics = [
            "BEGIN:VCALENDAR",
            "VERSION:2.0",
            "BEGIN:VEVENT",
            "DTSTART;VALUE=DATE:20201001",
            "SUMMARY:Atlantis: garbage",
            "END:VEVENT",
            "BEGIN:VEVENT",
            "DTSTART;VALUE=DATE:20201015",
            "SUMMARY:Atlantis: recycling",
            "END:VEVENT",
            "BEGIN:VEVENT",
            "DTSTART;VALUE=DATE:20201030",
            "SUMMARY:Atlantis: garbage",
            "END:VEVENT",
            "END:VCALENDAR",
        ]
        .join("\r\n");
        let server = serve(200, &ics).await;
        let client = client(&server, "2020-10-10");
        let next_pickup_event = client.get_next_pickup_event().await.unwrap().unwrap();
        assert_eq!(next_pickup_event.date, date("2020-10-15"));
        assert_eq!(
            next_pickup_event.pickup_types,
            vec![PickupType::new("recycling", Some("Recycling"))]
        );
    }

    #[tokio::test]
    async fn test_get_next_pickup_event_oneshot() {
        let server = serve_fixture().await;
        let client = Client::builder(TEST_PLACE_ID, TEST_SERVICE_ID)
            .base_url(Url::parse(&server.uri()).unwrap())
            .clock(FixedClock(date("2020-10-31")))
            .build()
            .unwrap();
        assert!(client.owns_session());
        let next_pickup_event = client.get_next_pickup_event().await.unwrap().unwrap();
        assert_eq!(next_pickup_event.date, date("2020-11-02"));
        client.close();
    }

    #[tokio::test]
    async fn test_get_pickup_events() {
        let server = serve_fixture().await;
        let client = client(&server, "2020-10-31");
        let pickup_events = client.get_pickup_events(None, None).await.unwrap();
        assert_eq!(pickup_events.len(), 5);
    }

    #[tokio::test]
    async fn test_get_pickup_events_in_range() {
        let server = serve_fixture().await;
        let client = client(&server, "2020-10-31");
        let pickup_events = client
            .get_pickup_events(Some(date("2020-11-01")), Some(date("2020-11-10")))
            .await
            .unwrap();
        let dates: Vec<NaiveDate> = pickup_events.iter().map(|event| event.date).collect();
        assert_eq!(dates, vec![date("2020-11-02"), date("2020-11-09")]);
    }

    #[tokio::test]
    async fn test_get_pickup_events_custom_friendly_name() {
        let server = serve_fixture().await;
        let client = Client::builder(TEST_PLACE_ID, TEST_SERVICE_ID)
            .base_url(Url::parse(&server.uri()).unwrap())
            .friendly_name("organics", "Green Bin")
            .build()
            .unwrap();
        let pickup_events = client.get_pickup_events(None, None).await.unwrap();
        assert_eq!(
            pickup_events[0].pickup_types,
            vec![
                PickupType::new("garbage", Some("Trash")),
                PickupType::new("organics", Some("Green Bin")),
            ]
        );
    }

    #[tokio::test]
    async fn test_request_error() {
        let server = serve(404, "<html>not an ics</html>").await;
        let client = client(&server, "2020-10-31");
        let err = client.get_pickup_events(None, None).await.unwrap_err();
        assert!(err.is_request());
        assert!(matches!(
            err,
            Error::Request(RequestError::Status { status, .. }) if status.as_u16() == 404
        ));
        let err = client.get_next_pickup_event().await.unwrap_err();
        assert!(err.is_request());
    }

    #[tokio::test]
    async fn test_request_error_server_error() {
        let server = serve(502, "").await;
        let client = client(&server, "2020-10-31");
        let err = client.get_pickup_events(None, None).await.unwrap_err();
        assert!(err.is_request());
    }

    #[tokio::test]
    async fn test_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);
        let base_url = Url::parse(&format!("http://{address}")).unwrap();
        let client = Client::builder(TEST_PLACE_ID, TEST_SERVICE_ID)
            .base_url(base_url)
            .build()
            .unwrap();
        let err = client.get_pickup_events(None, None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Request(RequestError::Transport { .. })
        ));
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(FEED_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(include_str!("feed/tests/pickup_events.ics"))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;
        let client = Client::builder(TEST_PLACE_ID, TEST_SERVICE_ID)
            .base_url(Url::parse(&server.uri()).unwrap())
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let err = client.get_next_pickup_event().await.unwrap_err();
        assert!(err.is_request());
    }

    #[tokio::test]
    async fn test_parse_error() {
        let ics = [
            "BEGIN:VCALENDAR",
            "VERSION:2.0",
            "BEGIN:VEVENT",
            "SUMMARY:Atlantis: garbage",
            "END:VEVENT",
            "END:VCALENDAR",
        ]
        .join("\r\n");
        let server = serve(200, &ics).await;
        let client = client(&server, "2020-10-31");
        let err = client.get_pickup_events(None, None).await.unwrap_err();
        assert!(err.is_parse());
        let err = client.get_next_pickup_event().await.unwrap_err();
        assert!(err.is_parse());
    }

    #[tokio::test]
    async fn test_empty_feed() {
        let server = serve(200, "").await;
        let client = client(&server, "2020-10-31");
        assert!(client.get_pickup_events(None, None).await.unwrap().is_empty());
        assert_eq!(client.get_next_pickup_event().await.unwrap(), None);
    }

    /// The caller's session must still work after the client is gone.
    #[tokio::test]
    async fn test_borrowed_session_stays_open() {
        let server = serve_fixture().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let session = reqwest::Client::new();
        let client = Client::builder(TEST_PLACE_ID, TEST_SERVICE_ID)
            .base_url(Url::parse(&server.uri()).unwrap())
            .session(session.clone())
            .build()
            .unwrap();
        assert!(!client.owns_session());
        client.get_pickup_events(None, None).await.unwrap();
        client.close();
        let response = session
            .get(format!("{}/ping", server.uri()))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
    }
}
