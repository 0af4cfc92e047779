use animcache::cli::Args;
use animcache::config::{self, PathConfig, Settings};
use animcache::core::cache_man::SystemMemory;
use animcache::core::lifecycle::MemoryWarning;
use animcache::core::workers::Workers;
use animcache::core::{AnimatedImage, CacheOptions, EventBus, Player};
use animcache::entities::{DecoderRegistry, SyntheticDecoder};

use anyhow::{Context, Result, ensure};
use clap::Parser;
use log::{debug, info};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() -> Result<()> {
    let args = Args::parse();

    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    init_logging(&args, &path_config)?;

    info!("animcache {} starting...", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);

    let settings_path = config::config_file(config::SETTINGS_FILE, &path_config);
    info!("Config path: {}", settings_path.display());
    let settings = Settings::load(&settings_path)?;

    run(&args, &settings)
}

/// Logger setup: 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = match log_path_opt {
            Some(path) => path.clone(),
            None => {
                config::ensure_dirs(path_config)?;
                config::data_file(config::LOG_FILE, path_config)
            }
        };
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn run(args: &Args, settings: &Settings) -> Result<()> {
    let fps = args.fps.unwrap_or(settings.default_fps);
    ensure!(fps.is_finite() && fps > 0.0, "fps must be positive, got {}", fps);
    let dt = Duration::from_secs_f64(1.0 / fps);

    let threads = args
        .workers
        .or(settings.worker_threads)
        .unwrap_or_else(Workers::default_thread_count);
    let workers = Arc::new(Workers::new(threads));
    let options = CacheOptions {
        workers,
        memory: Arc::new(SystemMemory::new()),
        policy: settings.policy(),
        refresh_delay: settings.refresh_delay(),
    };

    let image = match &args.file_path {
        Some(path) => {
            info!("Input file: {}", path.display());
            let data = std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            AnimatedImage::from_data(data, &DecoderRegistry::default(), options)
                .with_context(|| format!("Failed to open {}", path.display()))?
        }
        None => {
            info!(
                "No input file, playing {} synthetic {}px frames",
                args.synthetic_frames, args.synthetic_size
            );
            let decoder = SyntheticDecoder::new(
                args.synthetic_frames,
                args.synthetic_size,
                args.synthetic_size,
            );
            debug!("Synthetic frame size: {} bytes", decoder.frame_bytes());
            AnimatedImage::new(Box::new(decoder), options).context("Failed to build synthetic animation")?
        }
    };

    let budget = match (args.budget_mb, args.auto_budget) {
        (Some(mb), _) => (mb.saturating_mul(1024 * 1024)).min(i64::MAX as u64) as i64,
        (None, true) => -1,
        (None, false) => settings.budget_bytes(),
    };
    image.set_budget(budget);

    if let Some(spec) = args.editor {
        image.set_editor(Some(spec.build()));
    }

    let image = Arc::new(image);
    let bus = EventBus::new();
    image.observe_lifecycle(&bus);

    if args.preload_all {
        let started = Instant::now();
        image.preload_all();
        info!("Preloaded all frames in {:?}", started.elapsed());
    }

    let started = Instant::now();
    let mut player = Player::new(Arc::clone(&image));
    debug!("Playing as view {}", player.view_id());
    for tick in 0..args.ticks {
        if args.memory_warning_at == Some(tick) {
            info!("Tick {}: emitting memory warning", tick);
            bus.emit(MemoryWarning);
        }
        player.tick(dt);
        if tick % 60 == 0 {
            debug!("Tick {}: frame {}, {}", tick, player.current_index(), image.stats());
        }
        if player.is_finished() {
            break;
        }
        if !args.fast {
            std::thread::sleep(dt);
        }
    }

    println!("Frames:    {} (loop count {})", image.frame_count(), image.loop_count());
    if let Some(size) = image.frame_size(0) {
        println!("Size:      {}", size);
    }
    println!("Cache:     {}", image.stats());
    println!("Playback:  {}", player.stats());
    println!("Elapsed:   {:?}", started.elapsed());

    drop(player);
    Ok(())
}
