use clap::Parser;
use std::path::PathBuf;

use crate::entities::editors::EditorSpec;

// Build version with codec info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Codecs: GIF, APNG (image 0.25)\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Headless animated image player with a budgeted frame cache
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Animated GIF or APNG to play (omit for a synthetic animation)
    #[arg(value_name = "FILE")]
    pub file_path: Option<PathBuf>,

    /// Pin the cache budget (megabytes)
    #[arg(short = 'b', long = "budget-mb", value_name = "MB", conflicts_with = "auto_budget")]
    pub budget_mb: Option<u64>,

    /// Derive the cache budget from system memory (default unless the settings file pins one)
    #[arg(long = "auto-budget")]
    pub auto_budget: bool,

    /// Number of display ticks to run
    #[arg(short = 't', long = "ticks", value_name = "N", default_value_t = 300)]
    pub ticks: usize,

    /// Display rate (ticks per second)
    #[arg(long = "fps", value_name = "FPS")]
    pub fps: Option<f64>,

    /// Post-process frames: grayscale, invert or brightness:N
    #[arg(short = 'e', long = "editor", value_name = "EDITOR")]
    pub editor: Option<EditorSpec>,

    /// Decode every frame before playback (small animations only)
    #[arg(long = "preload-all")]
    pub preload_all: bool,

    /// Frame count of the synthetic animation (when no FILE is given)
    #[arg(long = "synthetic-frames", value_name = "N", default_value_t = 48)]
    pub synthetic_frames: usize,

    /// Edge length in pixels of synthetic frames
    #[arg(long = "synthetic-size", value_name = "PX", default_value_t = 512)]
    pub synthetic_size: u32,

    /// Emit a memory warning at this tick
    #[arg(long = "memory-warning-at", value_name = "TICK")]
    pub memory_warning_at: Option<usize>,

    /// Don't sleep between ticks (simulated clock)
    #[arg(long = "fast")]
    pub fast: bool,

    /// Worker threads for preloading (default: 3/4 of the CPUs)
    #[arg(short = 'w', long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Enable debug logging to file (default: animcache.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_command_line() {
        let args = Args::try_parse_from([
            "animcache", "anim.gif", "--budget-mb", "32", "--editor", "brightness:-10",
            "--ticks", "20", "--fps", "30", "--memory-warning-at", "5", "-vv", "--fast",
        ])
        .unwrap();
        assert_eq!(args.file_path, Some(PathBuf::from("anim.gif")));
        assert_eq!(args.budget_mb, Some(32));
        assert_eq!(args.editor, Some(EditorSpec::Brightness(-10)));
        assert_eq!(args.ticks, 20);
        assert_eq!(args.memory_warning_at, Some(5));
        assert_eq!(args.verbosity, 2);
        assert!(args.fast);
    }

    #[test]
    fn test_budget_flags_conflict() {
        assert!(Args::try_parse_from(["animcache", "--budget-mb", "1", "--auto-budget"]).is_err());
    }

    #[test]
    fn test_log_flag_optional_value() {
        let args = Args::try_parse_from(["animcache", "--log"]).unwrap();
        assert_eq!(args.log_file, Some(None));
        let args = Args::try_parse_from(["animcache"]).unwrap();
        assert_eq!(args.log_file, None);
        assert_eq!(args.synthetic_frames, 48);
    }

    #[test]
    fn test_bad_editor_rejected() {
        assert!(Args::try_parse_from(["animcache", "--editor", "sepia"]).is_err());
    }
}
