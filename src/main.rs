use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use wayfarer_core::{Config, ConfigError};
use wayfarer_live::{
    LiveConfig, LiveEvent, LiveServices, LiveSnapshot, Orchestrator, SearchError, SubscriptionKind,
};
use wayfarer_weather::{ConfiguredPosition, GeocodingResolver, WeatherFetcher};

const SUMMARY_EVERY: Duration = Duration::from_secs(60);

/// Live weather for your location, a searched place and a simulated world table
#[derive(Parser, Debug)]
#[command(name = "wayfarer")]
#[command(version, about)]
struct Args {
    /// Place to look up and follow alongside the tracked location
    #[arg(long, short)]
    search: Option<String>,

    /// Do not track the device location
    #[arg(long)]
    no_track: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    wayfarer_core::init()?;
    let (config, _) = match Config::load_validated() {
        Ok(loaded) => loaded,
        Err(e) => {
            if let Some(config_err) = e.downcast_ref::<ConfigError>() {
                eprintln!("{}", config_err.user_message());
            }
            return Err(e.context("Failed to load configuration"));
        }
    };

    let services = LiveServices {
        weather: Arc::new(
            WeatherFetcher::new(&config.weather).context("Failed to build weather client")?,
        ),
        geocoder: Arc::new(
            GeocodingResolver::new(&config.geocoding).context("Failed to build geocoding client")?,
        ),
        position: Arc::new(ConfiguredPosition::from_config(&config.location)),
    };
    let live = Orchestrator::new(services, LiveConfig::from(&config));
    let mut events = live.events();

    tracing::info!("Wayfarer started");
    live.start_global();

    if !args.no_track {
        if let Err(e) = live.start_tracking().await {
            tracing::warn!("Tracking unavailable: {}", e);
            println!("{}", e.user_message());
        }
    }

    if let Some(query) = &args.search {
        match live.search(query).await {
            Ok(place) => println!("Following {} at {}", place.display_name, place.coordinate),
            Err(e) => println!("{}", e.user_message()),
        }
    }

    let mut summary = tokio::time::interval(SUMMARY_EVERY);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = summary.tick() => print_summary(&live.snapshot()),
            event = events.recv() => match event {
                Ok(event) => print_event(&live, &event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Skipped {} live events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    live.shutdown();
    tracing::info!("Wayfarer stopped");
    Ok(())
}

fn print_event(live: &Orchestrator, event: &LiveEvent) {
    match event {
        LiveEvent::SampleUpdated { kind, .. } => {
            let snapshot = live.snapshot();
            let sub = match kind {
                SubscriptionKind::TrackedLocation => snapshot.tracked,
                SubscriptionKind::SearchedLocation => snapshot.searched,
                SubscriptionKind::GlobalDataset => None,
            };
            if let Some(sample) = sub.as_ref().and_then(|s| s.last_sample.as_ref()) {
                let place = sub
                    .as_ref()
                    .and_then(|s| s.place_name.clone())
                    .unwrap_or_else(|| kind.to_string());
                println!(
                    "{}: {:.1}°C, {} ({}), humidity {}%, wind {:.1} m/s",
                    place,
                    sample.temperature,
                    sample.condition.description(),
                    sample.summary,
                    sample.humidity,
                    sample.wind_speed
                );
            }
        }
        LiveEvent::TrackingStopped { error: Some(e), .. } => println!("{}", e.user_message()),
        LiveEvent::TrackingStopped { error: None, .. } => {}
        LiveEvent::SearchResolved { place_name, .. } => println!("Found {}", place_name),
        LiveEvent::SearchNotFound { query } => {
            println!("{}", SearchError::NotFound(query.clone()).user_message())
        }
        LiveEvent::TableTicked { .. } => {}
    }
}

fn print_summary(snapshot: &LiveSnapshot) {
    let hottest = snapshot
        .table
        .iter()
        .max_by(|a, b| a.1.temperature.total_cmp(&b.1.temperature));
    let coldest = snapshot
        .table
        .iter()
        .min_by(|a, b| a.1.temperature.total_cmp(&b.1.temperature));

    if let (Some((hot, h)), Some((cold, c))) = (hottest, coldest) {
        println!(
            "World: {} places, hottest {} {:.1}°C, coldest {} {:.1}°C",
            snapshot.table.len(),
            hot,
            h.temperature,
            cold,
            c.temperature
        );
    }
}
