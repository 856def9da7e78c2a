use crate::infra::parse_point;
use crate::server::{load_catalog, open_saved_store};
use clap::{Args, Subcommand};
use estate_access::access::{
    distance_meters, AccessState, ConfirmingActuator, DenialReason, GeoPoint, GeofenceSession,
    GeofenceTarget, ReplayLocationSource, UnlockActuator,
};
use estate_access::config::AppConfig;
use estate_access::error::AppError;
use estate_access::saved::SavedStoreError;
use estate_access::telemetry::{self, LogTarget};
use std::time::Duration;

/// Latitude offset used when no start point is given, roughly 200 m.
const DEFAULT_START_OFFSET_DEGREES: f64 = 0.0018;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Listing to walk toward
    #[arg(long, default_value = "1")]
    pub(crate) estate: String,
    /// Starting position as 'lat,lon'. Defaults to ~200 m north of the listing.
    #[arg(long, value_parser = parse_point)]
    pub(crate) start: Option<GeoPoint>,
    /// Number of legs in the simulated walk
    #[arg(long, default_value_t = 12)]
    pub(crate) steps: usize,
    /// Delay between simulated fixes in milliseconds
    #[arg(long, default_value_t = 250)]
    pub(crate) interval_ms: u64,
    /// Reported horizontal accuracy of each fix in meters
    #[arg(long, default_value_t = 5.0)]
    pub(crate) accuracy: f64,
}

#[derive(Args, Debug)]
pub(crate) struct DistanceArgs {
    /// First coordinate as 'lat,lon'
    #[arg(value_parser = parse_point)]
    pub(crate) from: GeoPoint,
    /// Second coordinate as 'lat,lon'
    #[arg(value_parser = parse_point)]
    pub(crate) to: GeoPoint,
}

#[derive(Subcommand, Debug)]
pub(crate) enum SavedCommand {
    /// Print the saved listing ids
    List,
    /// Flip the saved flag for a listing
    Toggle { id: String },
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        estate,
        start,
        steps,
        interval_ms,
        accuracy,
    } = args;

    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry, LogTarget::Stderr)?;

    let catalog = load_catalog(&config)?;
    let estate = catalog
        .get(&estate)
        .ok_or_else(|| AppError::EstateNotFound(estate.clone()))?;
    let location = estate.location()?;
    let target = GeofenceTarget::new(location, config.geofence.radius_meters)?;
    let start = match start {
        Some(point) => point,
        None => default_start(location)?,
    };

    println!("Geofence unlock demo");
    println!("- Listing {}: {}", estate.id.as_str(), estate.title);
    println!(
        "- Target {:.6},{:.6} | unlock radius {:.0} m",
        location.latitude(),
        location.longitude(),
        target.radius_meters()
    );
    println!(
        "- Walking {:.0} m from {:.6},{:.6} in {} legs",
        distance_meters(&start, &location),
        start.latitude(),
        start.longitude(),
        steps.max(1)
    );

    let source = ReplayLocationSource::walk(
        start,
        location,
        steps,
        accuracy,
        Duration::from_millis(interval_ms),
    );
    let total = source.len() as u64;
    let session = GeofenceSession::start(&source, target, config.geofence.watch_options())?;
    report_unlock(&session, None, "before the first fix");

    let mut updates = session.watch();
    let mut last_state = AccessState::Unknown;
    while updates.changed().await.is_ok() {
        let snapshot = updates.borrow_and_update().clone();
        if let Some(distance) = snapshot.distance_meters {
            println!(
                "  fix {:>2}: {:.2} km away | {}",
                snapshot.updates,
                distance / 1000.0,
                snapshot.state
            );
        }
        if snapshot.state != last_state {
            println!("  access {} -> {}", last_state, snapshot.state);
            last_state = snapshot.state;
        }
        if snapshot.updates >= total {
            break;
        }
    }

    let owner = estate.owner_contact(config.geofence.fallback_owner_phone.as_deref());
    report_unlock(
        &session,
        owner.map(|contact| contact.dial_uri()),
        "after the walk",
    );
    if let Ok(grant) = session.request_unlock() {
        match ConfirmingActuator.unlock(estate.id.as_str(), grant) {
            Ok(message) => println!("  {message}"),
            Err(err) => println!("  Unlock failed: {err}"),
        }
    }

    let final_snapshot = session.close().await;
    println!(
        "Session closed after {} updates in state {}",
        final_snapshot.updates, final_snapshot.state
    );
    Ok(())
}

pub(crate) fn run_distance(args: DistanceArgs) {
    let meters = distance_meters(&args.from, &args.to);
    println!("{meters:.1} m ({:.2} km)", meters / 1000.0);
}

pub(crate) fn run_saved(command: SavedCommand) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry, LogTarget::Stderr)?;
    let catalog = load_catalog(&config)?;
    let store = open_saved_store(&config)?;

    match command {
        SavedCommand::List => {
            let ids = store.saved_ids();
            if ids.is_empty() {
                println!("No saved listings");
            }
            for id in ids {
                let title = catalog
                    .get(&id)
                    .map(|estate| estate.title.as_str())
                    .unwrap_or("(not in catalog)");
                println!("- {id}: {title}");
            }
        }
        SavedCommand::Toggle { id } => {
            if catalog.get(&id).is_none() {
                return Err(AppError::EstateNotFound(id));
            }
            match store.toggle(&id) {
                Ok(saved) => println!("{id} {}", if saved { "saved" } else { "unsaved" }),
                Err(err @ SavedStoreError::PersistenceFailure { .. }) => {
                    println!("{id} changed for this run only");
                    return Err(err.into());
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    Ok(())
}

fn report_unlock(session: &GeofenceSession, owner_dial_uri: Option<String>, when: &str) {
    match session.request_unlock() {
        Ok(_) => println!("Unlock {when}: permitted"),
        Err(denied) => {
            println!("Unlock {when}: {}", denied.reason.message());
            if let (Some(uri), DenialReason::TooFar) = (owner_dial_uri, denied.reason) {
                println!("  Contact the owner: {uri}");
            }
        }
    }
}

fn default_start(target: GeoPoint) -> Result<GeoPoint, AppError> {
    let north = target.latitude() + DEFAULT_START_OFFSET_DEGREES;
    let latitude = if north <= 90.0 {
        north
    } else {
        target.latitude() - DEFAULT_START_OFFSET_DEGREES
    };
    Ok(GeoPoint::new(latitude, target.longitude())?)
}
