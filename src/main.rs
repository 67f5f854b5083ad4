use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::{debug, info};
use rfvast::dispatcher::{Integrators, SimulatedIntegrator, SimulatedOutcome};
use rfvast::platform::{DeviceProfile, Player, SimulatedPlayer, StaticFetcher};
use rfvast::response::AdResponse;
use rfvast::{attach, AdTag, Collaborators, EventBus, EventKind, VastOptions};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Simulate ad breaks around a content timeline and print every event
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Plugin options as JSON (camelCase keys)
    #[arg(short = 'o', long = "options", value_name = "FILE")]
    options: Option<PathBuf>,

    /// Ad tag URL; repeat to build a fallback queue (overrides the options file)
    #[arg(short = 't', long = "ad-tag", value_name = "URL")]
    ad_tags: Vec<String>,

    /// Canned ad responses: JSON object mapping ad tag URL to a response or {"error": "..."}
    #[arg(short = 'r', long = "responses", value_name = "FILE")]
    responses: Option<PathBuf>,

    /// Content duration in seconds
    #[arg(short = 'd', long = "duration", default_value = "60")]
    duration: f64,

    /// Playback step per timeupdate in seconds
    #[arg(long = "step", default_value = "0.25")]
    step: f64,

    /// Device the player runs on (desktop, iphone, ipad)
    #[arg(long = "device", default_value = "desktop")]
    device: DeviceProfile,

    /// How the simulated integrator plays ads
    #[arg(long = "outcome", value_enum, default_value = "complete")]
    outcome: Outcome,

    /// Also print timeupdate events
    #[arg(long = "timeupdates")]
    timeupdates: bool,

    /// Log verbosity (-v, -vv, -vvv); RUST_LOG takes precedence
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Outcome {
    Complete,
    Fail,
    Stall,
}

impl From<Outcome> for SimulatedOutcome {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Complete => SimulatedOutcome::Complete,
            Outcome::Fail => SimulatedOutcome::Fail("simulated playback failure".to_string()),
            Outcome::Stall => SimulatedOutcome::Stall,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CannedResponse {
    Failure { error: String },
    Response(AdResponse),
}

/// Default length of an ad creative whose response carries no duration.
const DEFAULT_AD_SECONDS: f64 = 15.0;

/// Build the fetcher from canned responses, plus the media sources they
/// reference so the simulated player knows how long each ad lasts.
fn load_responses(path: Option<&PathBuf>) -> Result<(StaticFetcher, Vec<(String, f64)>)> {
    let mut fetcher = StaticFetcher::new();
    let mut media = Vec::new();
    let Some(path) = path else {
        return Ok((fetcher, media));
    };
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let table: HashMap<String, CannedResponse> =
        serde_json::from_reader(file).with_context(|| format!("parsing {}", path.display()))?;
    for (url, entry) in table {
        fetcher = match entry {
            CannedResponse::Failure { error } => fetcher.with_failure(&url, &error),
            CannedResponse::Response(response) => {
                let seconds = response.duration.unwrap_or(DEFAULT_AD_SECONDS);
                media.extend(response.media_files.iter().map(|m| (m.src.clone(), seconds)));
                fetcher.with_response(&url, response)
            }
        };
    }
    Ok((fetcher, media))
}

fn load_options(args: &Args) -> Result<VastOptions> {
    let mut options = match &args.options {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
            VastOptions::from_reader(file)?
        }
        None => VastOptions::default(),
    };
    match args.ad_tags.len() {
        0 => {}
        1 => options = options.with_ad_tag_url(args.ad_tags[0].clone()),
        _ => {
            options = options
                .with_ad_tag_queue(args.ad_tags.iter().cloned().map(AdTag::Url).collect())
        }
    }
    Ok(options)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();

    if args.duration.is_nan() || args.duration <= 0.0 || args.step.is_nan() || args.step <= 0.0 {
        bail!("duration and step must be positive");
    }
    debug!("simulator args: {:?}", args);

    let bus = EventBus::new();
    let player = Arc::new(
        SimulatedPlayer::new(bus.clone(), "content.mp4", args.duration).with_device(args.device),
    );

    let printer = Arc::clone(&player);
    let timeupdates = args.timeupdates;
    for kind in EventKind::ALL {
        if kind == EventKind::TimeUpdate && !timeupdates {
            continue;
        }
        let p = Arc::clone(&printer);
        bus.on(kind, move |event| match &event.error {
            Some(err) => println!("[{:>7.2}s] {} ({})", p.current_time(), kind, err),
            None => println!("[{:>7.2}s] {}", p.current_time(), kind),
        });
    }

    let (fetcher, media) = load_responses(args.responses.as_ref())?;
    for (src, seconds) in &media {
        player.register_source(src, *seconds);
    }
    let integrator = SimulatedIntegrator::new(args.outcome.into()).with_player(player.clone());
    let collaborators = Collaborators::new(Arc::new(fetcher), Integrators::uniform(Arc::new(integrator)));

    let plugin = attach(player.clone(), bus, load_options(&args)?, collaborators)?;
    if args.verbose > 0 || std::env::var_os("RUST_LOG").is_some() {
        log::set_max_level(log::LevelFilter::Trace);
    }
    info!("simulating {}s of content on {:?}", args.duration, args.device.kind);

    let max_steps = (args.duration / args.step).ceil() as usize * 4 + 1000;
    player.play();
    settle().await;
    for _ in 0..max_steps {
        // Breaks always resolve, at the latest when their cancel timeout fires
        while plugin.is_ad_playing() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        if player.current_time() >= player.duration() {
            break;
        }
        if player.paused() {
            player.play();
        }
        player.tick(args.step);
        settle().await;
    }

    println!(
        "remaining ads: {}, midrolls played: {}, ads canceled: {}",
        plugin.remaining_ads(),
        plugin.midrolls_played(),
        plugin.ads_canceled()
    );
    Ok(())
}
