use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use framechunk::{
    ChunkPlanner, ExtractOptions, FfmpegDecoder, FrameExtractor, GapPolicy, JobReport, MediaProbe,
    ProgressCallback, ProgressInfo, TimeRange,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

const CLI_AFTER_HELP: &str = "Examples:\n  framechunk plan --duration 25 --chunk-span 10\n  framechunk extract input.mp4 --out frames --workers 4 --fps 0.5 --progress\n  framechunk extract input.mp4 --out frames --gap-policy skip_failed --json\n  framechunk completions zsh > _framechunk";

#[derive(Debug, Parser)]
#[command(
    name = "framechunk",
    version,
    about = "Extract video frames in parallel chunks and merge them in timeline order",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show debug logging output.
    #[arg(long, global = true)]
    verbose: bool,

    /// Path to the ffprobe executable.
    #[arg(long, global = true)]
    ffprobe: Option<PathBuf>,
}

#[derive(Debug, Parser, Clone)]
struct PlanOptions {
    /// Length of each chunk in seconds.
    #[arg(long, default_value_t = 10.0)]
    chunk_span: f64,

    /// Sampling rate in frames per second.
    #[arg(long, default_value_t = 1.0)]
    fps: f64,

    /// Media duration (seconds, MM:SS or HH:MM:SS). Probed with ffprobe when omitted.
    #[arg(long)]
    duration: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the chunk plan for a media file or a duration.
    #[command(
        about = "Print the chunk plan",
        after_help = "Examples:\n  framechunk plan input.mp4\n  framechunk plan --duration 00:02:30 --chunk-span 20 --json"
    )]
    Plan {
        /// Input media path. Required unless --duration is given.
        input: Option<PathBuf>,

        #[command(flatten)]
        plan: PlanOptions,

        /// Output the plan as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Extract frames into one contiguously numbered directory.
    #[command(
        about = "Extract and merge frames",
        after_help = "Examples:\n  framechunk extract input.mp4 --out frames\n  framechunk extract input.mp4 --out frames --workers 1 --width 320 --height 180 --ext png"
    )]
    Extract {
        /// Input media path.
        input: PathBuf,

        /// Output directory for merged frames.
        #[arg(long)]
        out: PathBuf,

        #[command(flatten)]
        plan: PlanOptions,

        /// Maximum number of chunks extracted at the same time.
        #[arg(long)]
        workers: Option<usize>,

        /// Output frame width in pixels.
        #[arg(long, default_value_t = 512)]
        width: u32,

        /// Output frame height in pixels.
        #[arg(long, default_value_t = 288)]
        height: u32,

        /// What to do with failed chunks: strict | skip_failed.
        #[arg(long, default_value = "strict")]
        gap_policy: String,

        /// Stop at the first failed chunk.
        #[arg(long)]
        fail_fast: bool,

        /// Per-chunk time limit in seconds.
        #[arg(long)]
        timeout: Option<f64>,

        /// Maximum chunks dispatched ahead of the merge cursor.
        #[arg(long)]
        max_buffered: Option<usize>,

        /// Output image extension.
        #[arg(long, default_value = "jpg")]
        ext: String,

        /// Minimum digits in output file names.
        #[arg(long, default_value_t = 4)]
        pad_width: usize,

        /// Number of the first output file.
        #[arg(long, default_value_t = 1)]
        first_number: u64,

        /// Directory for intermediate chunk output.
        #[arg(long)]
        temp_dir: Option<PathBuf>,

        /// Path to the ffmpeg executable.
        #[arg(long)]
        ffmpeg: Option<PathBuf>,

        /// Show a progress bar.
        #[arg(long)]
        progress: bool,

        /// Allow writing into a non-empty output directory.
        #[arg(long)]
        overwrite: bool,

        /// Print the job report as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_timecode(value: &str) -> Result<Duration, Box<dyn std::error::Error>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("time value cannot be empty".into());
    }

    if let Ok(seconds) = trimmed.parse::<f64>() {
        return Ok(Duration::try_from_secs_f64(seconds)?);
    }

    let parts: Vec<&str> = trimmed.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(format!("invalid time format: {trimmed}").into());
    }

    let (hours, minutes, seconds_str) = if parts.len() == 3 {
        (parts[0].parse::<u64>()?, parts[1].parse::<u64>()?, parts[2])
    } else {
        (0_u64, parts[0].parse::<u64>()?, parts[1])
    };

    let seconds = seconds_str.parse::<f64>()?;
    let total_seconds = (hours as f64 * 3600.0) + (minutes as f64 * 60.0) + seconds;
    Ok(Duration::try_from_secs_f64(total_seconds)?)
}

fn init_logging(global: &GlobalOptions) {
    let level = if global.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn resolve_duration(
    global: &GlobalOptions,
    input: Option<&Path>,
    duration: Option<&str>,
) -> Result<Duration, Box<dyn std::error::Error>> {
    if let Some(value) = duration {
        return parse_timecode(value);
    }
    let input = input.ok_or("either an input file or --duration is required")?;
    let mut probe = MediaProbe::new();
    if let Some(program) = &global.ffprobe {
        probe = probe.with_program(program);
    }
    Ok(probe.probe_duration(input)?)
}

fn ensure_output_directory(path: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.is_dir() && path.read_dir()?.next().is_some() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("writing into non-empty {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output directory is not empty: {} (use --overwrite)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

fn format_range(range: &TimeRange) -> String {
    format!(
        "{:.3}-{:.3}",
        range.start.as_secs_f64(),
        range.end.as_secs_f64()
    )
}

fn range_json(range: &TimeRange) -> serde_json::Value {
    json!({
        "index": range.index,
        "start_seconds": range.start.as_secs_f64(),
        "end_seconds": range.end.as_secs_f64(),
    })
}

struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.green} {bar:40.cyan/blue} {pos}/{len} chunks {msg}",
        )?;
        bar.set_style(style.progress_chars("##-"));
        Ok(Self { bar })
    }
}

impl ProgressCallback for BarProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.bar.set_length(info.total_chunks as u64);
        self.bar.set_position(info.completed_chunks as u64);
        if !info.succeeded {
            self.bar
                .set_message(format!("chunk {} failed", info.chunk_index).red().to_string());
        }
    }
}

fn print_report(report: &JobReport, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        let payload = json!({
            "state": format!("{:?}", report.state),
            "frame_count": report.frame_count,
            "total_chunks": report.total_chunks,
            "failed_chunks": report.job.failed_chunks.iter().collect::<Vec<_>>(),
            "missing_ranges": report.missing_ranges.iter().map(range_json).collect::<Vec<_>>(),
            "output_dir": report.output_dir.display().to_string(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    if report.is_complete() {
        println!(
            "{} {}",
            "success:".green().bold(),
            format!(
                "Extracted {} frame(s) from {} chunk(s) to {}",
                report.frame_count,
                report.total_chunks,
                report.output_dir.display()
            )
            .green()
        );
    } else {
        println!(
            "{} {}",
            "partial:".yellow().bold(),
            format!(
                "Extracted {} frame(s) to {}; {} chunk(s) missing",
                report.frame_count,
                report.output_dir.display(),
                report.missing_ranges.len()
            )
            .yellow()
        );
        for range in &report.missing_ranges {
            println!("  missing chunk {} [{}]", range.index, format_range(range));
        }
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli.global);

    match cli.command {
        Commands::Plan { input, plan, json } => {
            let duration = resolve_duration(&cli.global, input.as_deref(), plan.duration.as_deref())?;
            let planner = ChunkPlanner::new(plan.chunk_span, plan.fps)?;
            let ranges = planner.plan(duration.as_secs_f64())?;

            if json {
                let payload = json!({
                    "duration_seconds": duration.as_secs_f64(),
                    "chunk_span_seconds": plan.chunk_span,
                    "fps": plan.fps,
                    "chunks": ranges.iter().map(|range| {
                        let mut entry = range_json(range);
                        entry["expected_frames"] = json!(range.expected_frames(plan.fps));
                        entry
                    }).collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!(
                    "{} chunk(s) for {:.3} s",
                    ranges.len().to_string().bold(),
                    duration.as_secs_f64()
                );
                for range in &ranges {
                    println!(
                        "  #{:<4} {:>20}  ~{} frame(s)",
                        range.index,
                        format_range(range),
                        range.expected_frames(plan.fps)
                    );
                }
            }
        }
        Commands::Extract {
            input,
            out,
            plan,
            workers,
            width,
            height,
            gap_policy,
            fail_fast,
            timeout,
            max_buffered,
            ext,
            pad_width,
            first_number,
            temp_dir,
            ffmpeg,
            progress,
            overwrite,
            json,
        } => {
            ensure_output_directory(&out, overwrite)?;
            let duration = resolve_duration(&cli.global, Some(&input), plan.duration.as_deref())?;

            let mut options = ExtractOptions::new()
                .with_chunk_span_seconds(plan.chunk_span)
                .with_sampling_rate(plan.fps)
                .with_resolution(width, height)
                .with_gap_policy(gap_policy.parse::<GapPolicy>()?)
                .with_fail_fast(fail_fast)
                .with_file_extension(ext.trim_start_matches('.').to_ascii_lowercase())
                .with_pad_width(pad_width)
                .with_first_number(first_number);
            if let Some(workers) = workers {
                options = options.with_max_workers(workers);
            }
            if let Some(seconds) = timeout {
                options = options.with_chunk_timeout(Duration::try_from_secs_f64(seconds)?);
            }
            if let Some(chunks) = max_buffered {
                options = options.with_max_buffered_chunks(chunks);
            }
            if let Some(directory) = &temp_dir {
                options = options.with_temp_dir(directory);
            }
            let bar = if progress {
                let progress = Arc::new(BarProgress::new()?);
                options = options.with_progress(progress.clone());
                Some(progress)
            } else {
                None
            };

            let mut decoder = FfmpegDecoder::new(&input);
            if let Some(program) = &ffmpeg {
                decoder = decoder.with_program(program);
            }

            let extractor = FrameExtractor::new(decoder, options)?;
            let outcome = extractor.extract_to_directory(duration, &out);

            if let Some(progress) = bar {
                progress.bar.finish_and_clear();
            }
            print_report(&outcome?, json)?;
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "framechunk", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
