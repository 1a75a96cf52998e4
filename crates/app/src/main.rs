use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use sonicflow_core::{Engine, EngineConfig, EngineError, GenreProfileStore, StereoFrame, Track};
use tracing_subscriber::EnvFilter;

fn main() -> sonicflow_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Render {
            tracks,
            output,
            seconds,
            volume,
            no_crossfade,
        } => run_render(config, &tracks, &output, seconds, volume, !no_crossfade),
        Commands::Profiles => run_profiles(),
    }
}

fn run_render(
    config: EngineConfig,
    tracks: &[String],
    output: &Path,
    seconds: f64,
    volume: f32,
    crossfade: bool,
) -> sonicflow_core::Result<()> {
    let tracks = tracks
        .iter()
        .enumerate()
        .map(|(index, spec)| parse_track(index, spec))
        .collect::<sonicflow_core::Result<Vec<_>>>()?;
    if tracks.is_empty() {
        return Err(EngineError::InvalidInput("at least one --track is required"));
    }
    tracing::info!(tracks = tracks.len(), ?output, seconds, "rendering queue");

    let sample_rate = config.audio.sample_rate;
    let block = config.audio.block_size.max(1);
    let tick_interval = config.display.tick_interval_secs.max(1e-3);

    let mut engine = Engine::new(config)?;
    engine.set_crossfade_enabled(crossfade);
    engine.set_volume(volume);
    for track in tracks {
        engine.add_to_queue(track);
    }
    engine.resume_context()?;
    engine.play();
    for degradation in engine.take_degradations() {
        tracing::warn!(error = %degradation, "engine degraded");
    }

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(output, spec)?;

    let total_frames = (seconds.max(0.0) * sample_rate as f64).round() as usize;
    let mut buffer = vec![StereoFrame::SILENCE; block];
    let mut rendered = 0;
    let mut next_tick = 0.0;
    let mut next_report = 0.0;

    while rendered < total_frames {
        let frames = block.min(total_frames - rendered);
        let out = &mut buffer[..frames];
        engine.render(out);
        for frame in out.iter() {
            writer.write_sample(frame.left)?;
            writer.write_sample(frame.right)?;
        }
        rendered += frames;

        let now = engine.context_time();
        while next_tick <= now {
            engine.display_tick();
            next_tick += tick_interval;
        }
        if now >= next_report {
            report(&engine, now);
            next_report += 1.0;
        }
    }

    writer.finalize()?;
    engine.destroy();
    tracing::info!(?output, frames = rendered, "render complete");
    Ok(())
}

fn report(engine: &Engine, now: f64) {
    let sample = engine.analysis();
    println!(
        "{now:7.2}s  {track:<16} {genre:<10} bass {bass:.2}  mids {mids:.2}  highs {highs:.2}  energy {energy:.2}  ~{tempo:.0} bpm  {state:?}",
        track = engine.current_track().map(|track| track.id.as_str()).unwrap_or("-"),
        genre = engine.current_genre().unwrap_or("-"),
        bass = sample.bass,
        mids = sample.mids,
        highs = sample.highs,
        energy = sample.energy,
        tempo = sample.tempo,
        state = engine.crossfade_state(),
    );
}

fn run_profiles() -> sonicflow_core::Result<()> {
    let profiles: Vec<_> = GenreProfileStore::builtin().iter().collect();
    println!("{}", serde_json::to_string_pretty(&profiles)?);
    Ok(())
}

/// Parses `GENRE=LOCATOR`.
fn parse_track(index: usize, spec: &str) -> sonicflow_core::Result<Track> {
    let (genre, locator) = spec
        .split_once('=')
        .ok_or_else(|| EngineError::msg(format!("track `{spec}` must look like GENRE=LOCATOR")))?;
    Ok(Track::new(format!("track-{}", index + 1), locator.trim(), genre.trim()))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Genre-adaptive playback engine", long_about = None)]
struct Cli {
    /// JSON engine configuration. Missing fields use defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a queue through the engine and write the output to a WAV file.
    Render {
        /// Queue entry as GENRE=LOCATOR, e.g. `afro=tone:220:8` or `jazz=take.wav`.
        #[arg(short, long = "track", required = true)]
        tracks: Vec<String>,
        /// Destination WAV file.
        #[arg(short, long, default_value = "sonicflow.wav")]
        output: PathBuf,
        /// Length of the render in seconds.
        #[arg(short, long, default_value_t = 20.0)]
        seconds: f64,
        /// Playback volume in [0, 1].
        #[arg(long, default_value_t = 1.0)]
        volume: f32,
        /// Switch tracks without crossfading.
        #[arg(long)]
        no_crossfade: bool,
    },
    /// Print the built-in genre profiles as JSON.
    Profiles,
}
