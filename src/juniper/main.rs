// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use anyhow::Context;
use catenary::config::JuniperConfig;
use catenary::duration_since_unix_epoch;
use catenary::event_reader::csv_store::CsvHistoricalStore;
use catenary::event_reader::{EventReader, TimeRange};
use catenary::holding::controller::HoldingController;
use catenary::holding::predictions::PredictionBoard;
use catenary::kalman::history::SegmentHistory;
use catenary::kalman::predictor::RealTimePredictor;
use catenary::live_events::{LiveEventProcessor, LiveOutcome};
use catenary::models::{ArrivalDeparture, PositionMatch};
use catenary::persistence::{load_travel_times, save_travel_times};
use catenary::schedule::{ScheduleData, TripReference};
use catenary::sink::{JsonLinesSink, RecordSink, TracingSink};
use catenary::travel_times::aggregator::TravelTimesAggregator;
use catenary::travel_times::index::{SharedTravelTimeIndex, TravelTimeIndexSet};
use catenary::travel_times::lookup::TravelTimeLookup;
use chrono::NaiveDate;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

const PRUNE_INTERVAL_MS: i64 = 60 * 60 * 1000;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// RON config file, defaults are used when absent
    #[arg(long, env = "JUNIPER_CONFIG", global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Aggregate historical arrivals, departures and matches into travel times
    Aggregate {
        #[arg(long)]
        schedule: PathBuf,
        #[arg(long)]
        arrival_departures: PathBuf,
        #[arg(long)]
        position_matches: Option<PathBuf>,
        #[arg(long)]
        output: PathBuf,
        /// Inclusive start of the window, epoch milliseconds
        #[arg(long)]
        start_ms: Option<i64>,
        /// Exclusive end of the window, epoch milliseconds
        #[arg(long)]
        end_ms: Option<i64>,
    },
    /// Print the travel times a trip would use on one stop path
    Lookup {
        #[arg(long)]
        schedule: PathBuf,
        #[arg(long)]
        travel_times: PathBuf,
        #[arg(long)]
        trip_id: String,
        #[arg(long)]
        stop_path_index: u32,
        #[arg(long)]
        service_date: Option<NaiveDate>,
    },
    /// Feed recorded live events through prediction and holding
    Replay {
        #[arg(long)]
        schedule: PathBuf,
        #[arg(long)]
        arrival_departures: PathBuf,
        #[arg(long)]
        position_matches: Option<PathBuf>,
        #[arg(long)]
        travel_times: Option<PathBuf>,
        /// Earlier days' arrivals and departures to seed the Kalman history
        #[arg(long)]
        history: Option<PathBuf>,
        /// Append holding times and diagnostics here as JSON lines instead of logging them
        #[arg(long)]
        records: Option<PathBuf>,
    },
}

fn load_schedule(path: &Path) -> anyhow::Result<ScheduleData> {
    let schedule = ScheduleData::load_json(path)
        .with_context(|| format!("Failed to load schedule {}", path.display()))?;

    tracing::info!(trips = schedule.trip_count(), "Loaded schedule");

    Ok(schedule)
}

fn aggregate(
    config: &JuniperConfig,
    schedule: &Path,
    arrival_departures: &Path,
    position_matches: Option<&Path>,
    output: &Path,
    range: TimeRange,
) -> anyhow::Result<()> {
    let schedule = load_schedule(schedule)?;
    let store = CsvHistoricalStore::load(arrival_departures, position_matches)?;

    let reader = EventReader::new(&store, &config.reader, config.reader.tz()?);
    let (occurrences, read_summary) = reader.read_occurrences(range)?;

    tracing::info!(
        occurrences = read_summary.occurrences,
        arrival_departures = read_summary.arrival_departures,
        position_matches = read_summary.position_matches,
        orphaned_position_matches = read_summary.orphaned_position_matches,
        "Read historical events"
    );

    let mut aggregator = TravelTimesAggregator::new(&config.travel_times, &schedule);
    aggregator.add_occurrences(&occurrences);
    let aggregated = aggregator.finish();

    save_travel_times(
        output,
        &aggregated.travel_times,
        duration_since_unix_epoch().as_millis() as i64,
    )?;

    println!("{:#?}", aggregated.summary);

    Ok(())
}

fn lookup(
    schedule: &Path,
    travel_times: &Path,
    trip_id: &str,
    stop_path_index: u32,
    service_date: Option<NaiveDate>,
) -> anyhow::Result<()> {
    let schedule = load_schedule(schedule)?;
    let persisted = load_travel_times(travel_times)?;
    let index = TravelTimeIndexSet::build(persisted.travel_times);

    let trip = schedule
        .trip(trip_id)
        .with_context(|| format!("Trip {} is not in the schedule", trip_id))?;

    match index.best_match(trip, stop_path_index, service_date) {
        Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
        None => println!("No travel times for trip {} stop path {}", trip_id, stop_path_index),
    }

    Ok(())
}

enum LiveEvent<'a> {
    Stop(&'a ArrivalDeparture),
    Position(&'a PositionMatch),
}

impl LiveEvent<'_> {
    fn time_ms(&self) -> i64 {
        match self {
            LiveEvent::Stop(event) => event.time_ms,
            LiveEvent::Position(position_match) => position_match.time_ms,
        }
    }
}

fn print_outcome(outcome: &LiveOutcome) -> anyhow::Result<()> {
    if let Some(prediction) = &outcome.prediction {
        println!("{}", serde_json::to_string(prediction)?);
    }

    for holding_time in &outcome.holding_times {
        println!("{}", serde_json::to_string(holding_time)?);
    }

    Ok(())
}

fn replay(
    config: &JuniperConfig,
    schedule: &Path,
    arrival_departures: &Path,
    position_matches: Option<&Path>,
    travel_times: Option<&Path>,
    history_path: Option<&Path>,
    records: Option<&Path>,
) -> anyhow::Result<()> {
    let timezone = config.reader.tz()?;
    let reference: Arc<dyn TripReference> = Arc::new(load_schedule(schedule)?);
    let sink: Arc<dyn RecordSink> = match records {
        Some(path) => Arc::new(JsonLinesSink::open(path)?),
        None => Arc::new(TracingSink),
    };

    let index = match travel_times {
        Some(path) => TravelTimeIndexSet::build(load_travel_times(path)?.travel_times),
        None => TravelTimeIndexSet::default(),
    };

    let lookup = Arc::new(TravelTimeLookup::new(
        Arc::new(SharedTravelTimeIndex::new(index)),
        reference.clone(),
        config.travel_times.max_travel_time_segment_length_m,
    ));

    let history = Arc::new(SegmentHistory::new(config.kalman.max_kalman_days_to_search));

    if let Some(path) = history_path {
        let store = CsvHistoricalStore::load(path, None)?;
        let reader = EventReader::new(&store, &config.reader, timezone);
        let (occurrences, _) = reader.read_occurrences(TimeRange {
            start_ms: i64::MIN,
            end_ms: i64::MAX,
        })?;

        let traversals = history.record_occurrences(&occurrences, reference.as_ref());
        tracing::info!(traversals, "Seeded segment history");
    }

    if config.kalman.use_traffic_sensor {
        tracing::warn!("No traffic sensor feed is available to replay, ignoring use_traffic_sensor");
    }

    let predictor = Arc::new(RealTimePredictor::new(
        config.kalman.clone(),
        reference.clone(),
        lookup,
        history.clone(),
        history.clone(),
        sink.clone(),
    ));

    let board = Arc::new(PredictionBoard::new());
    let controller = Arc::new(HoldingController::new(
        config.holding.clone(),
        board.clone(),
        sink,
    ));

    let processor = LiveEventProcessor::new(
        reference,
        history,
        predictor,
        board,
        controller,
        timezone,
        config.reader.service_day_start_hour,
    );

    let store = CsvHistoricalStore::load(arrival_departures, position_matches)?;

    let mut events = store
        .all_arrival_departures()
        .iter()
        .map(LiveEvent::Stop)
        .chain(store.all_position_matches().iter().map(LiveEvent::Position))
        .collect::<Vec<_>>();
    events.sort_by_key(|event| event.time_ms());

    let mut last_prune_ms = events.first().map(|event| event.time_ms()).unwrap_or(0);

    for event in &events {
        let outcome = match event {
            LiveEvent::Stop(event) => processor.on_arrival_departure(event),
            LiveEvent::Position(position_match) => processor.on_position_match(position_match),
        };

        print_outcome(&outcome)?;

        if event.time_ms() - last_prune_ms >= PRUNE_INTERVAL_MS {
            processor.prune(event.time_ms());
            last_prune_ms = event.time_ms();
        }
    }

    tracing::info!(events = events.len(), "Replay finished");

    Ok(())
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = JuniperConfig::load(args.config.as_deref())?;

    match args.cmd {
        Command::Aggregate {
            schedule,
            arrival_departures,
            position_matches,
            output,
            start_ms,
            end_ms,
        } => aggregate(
            &config,
            &schedule,
            &arrival_departures,
            position_matches.as_deref(),
            &output,
            TimeRange {
                start_ms: start_ms.unwrap_or(i64::MIN),
                end_ms: end_ms.unwrap_or(i64::MAX),
            },
        ),
        Command::Lookup {
            schedule,
            travel_times,
            trip_id,
            stop_path_index,
            service_date,
        } => lookup(
            &schedule,
            &travel_times,
            &trip_id,
            stop_path_index,
            service_date,
        ),
        Command::Replay {
            schedule,
            arrival_departures,
            position_matches,
            travel_times,
            history,
            records,
        } => replay(
            &config,
            &schedule,
            &arrival_departures,
            position_matches.as_deref(),
            travel_times.as_deref(),
            history.as_deref(),
            records.as_deref(),
        ),
    }
}
