use bookrewind::{
    Side,
    config::ReplayConfig,
    dataset::Dataset,
    logging::init_logging,
    replay::ReplayStep,
    session::{Session, SessionHandle},
};
use std::{fs::File, io::BufReader};

const FILE_PATH_REPLAY_CONFIG: &str = "bookrewind/examples/config/replay_config.json";
const FILE_PATH_RECORDED_BOOK: &str = "bookrewind/examples/data/recorded_book.json";

// Closer to the current nonce than to any recorded snapshot, so the rewind undoes deltas
const REWIND_TARGET: u64 = 103;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise Tracing
    init_logging();

    // Load ReplayConfig
    let config = load_config()?;

    // Load, validate & journal the recorded order book dump
    let dataset = Dataset::from_reader(
        BufReader::new(File::open(FILE_PATH_RECORDED_BOOK)?),
        &config.validation,
    )?;
    for inconsistency in dataset.inconsistencies() {
        println!("dataset inconsistency: {inconsistency}");
    }

    // Start the replay Session on the earliest snapshot (or the configured start nonce)
    let mut session = Session::new(dataset, &config)?;
    let (min, max) = session.nonce_range().into_inner();
    println!("navigable nonces: [{min}, {max}]");

    // Step forwards through every recorded nonce, then jump back to the start
    for target in (min..=max).chain([min]) {
        let summary = session.replay_to(target)?;
        let state = session.state();
        println!(
            "nonce {:>3} ({} {} step(s), anchor {:?}): best bid {:?}, best ask {:?}, spread {:?}",
            state.current_nonce(),
            summary.direction,
            summary.steps,
            summary.anchor,
            state.best_bid().map(|level| level.price),
            state.best_ask().map(|level| level.price),
            state.spread(),
        );
    }

    // Render the cumulative depth at the latest nonce
    session.reconstruct_state(max)?;
    let depth = session.compute_depth();
    for point in depth.points() {
        println!(
            "{:<3} {:>8} {:>6}",
            match point.side {
                Side::Bid => "BID",
                Side::Ask => "ASK",
            },
            point.price,
            point.cumulative
        );
    }

    // Navigation requested while a replay is running is rejected, never interleaved
    let handle = SessionHandle::new(session);
    let mut observer = |step: &ReplayStep| {
        if let Err(error) = handle.navigate(max) {
            println!("undo {} rejected navigation: {error}", step.nonce);
        }
    };
    handle.navigate_with(REWIND_TARGET, &mut observer)?;

    Ok(())
}

fn load_config() -> Result<ReplayConfig, Box<dyn std::error::Error>> {
    let file = File::open(FILE_PATH_REPLAY_CONFIG)?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)?;
    Ok(config)
}
