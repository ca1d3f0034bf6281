use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use recollect_core::{Client, PickupEvent};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
pub struct Arguments {
    /// the ReCollect place ID
    pub place_id: String,
    /// the ReCollect service ID
    pub service_id: String,
    /// only show pickups on or after this date (YYYY-MM-DD)
    #[arg(long)]
    pub start: Option<NaiveDate>,
    /// only show pickups on or before this date (YYYY-MM-DD)
    #[arg(long)]
    pub end: Option<NaiveDate>,
    /// only show the next pickup
    #[arg(long, conflicts_with_all = ["start", "end"])]
    pub next: bool,
    /// request timeout in seconds
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,
}

impl Arguments {
    fn client(&self) -> Result<Client> {
        let client = Client::builder(&self.place_id, &self.service_id)
            .timeout(Duration::from_secs(self.timeout))
            .build()
            .context("failed to create the ReCollect client")?;
        Ok(client)
    }
}

async fn get_next_pickup_event(client: &Client) -> Result<Option<PickupEvent>> {
    client
        .get_next_pickup_event()
        .await
        .with_context(|| format!("failed to get the next pickup event for {}", client.place_id()))
}

async fn get_pickup_events(
    client: &Client,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<Vec<PickupEvent>> {
    client
        .get_pickup_events(start, end)
        .await
        .with_context(|| format!("failed to get pickup events for {}", client.place_id()))
}

fn format_event(pickup_event: &PickupEvent) -> String {
    let pickup_types: Vec<&str> = pickup_event
        .pickup_types
        .iter()
        .map(|pickup_type| pickup_type.display_name())
        .collect();
    format!(
        "{}  {}  {}",
        pickup_event.date,
        pickup_event.area_name,
        pickup_types.join(", ")
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Arguments::parse();
    let client = args.client()?;
    if args.next {
        match get_next_pickup_event(&client).await? {
            Some(pickup_event) => println!("{}", format_event(&pickup_event)),
            None => info!(place_id = %args.place_id, "no upcoming pickup"),
        }
    } else {
        let pickup_events = get_pickup_events(&client, args.start, args.end).await?;
        for pickup_event in &pickup_events {
            println!("{}", format_event(pickup_event));
        }
    }
    client.close();
    Ok(())
}
