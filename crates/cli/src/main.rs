mod session;

use adcstream_config::{BoardDescriptor, SessionScript, StopReason};
use adcstream_core::peripherals::adc::SimConversion;
use adcstream_core::{HeapLayout, SbrkHeap};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use session::{
    check_assertions, check_sample_range, run_session, AssertionResult, ConversionSource,
    LayoutSummary, SessionConfig, SessionOutcome,
};

const EXIT_PASS: i32 = 0;
const EXIT_ASSERT_FAIL: i32 = 1;
const EXIT_CONFIG_ERROR: i32 = 2;
const EXIT_HALTED: i32 = 3;

/// Upper bound on scripted steps.
const MAX_ALLOWED_STEPS: u64 = 50_000_000;

#[derive(Parser, Debug)]
#[command(author, version, about = "AdcStream host harness", long_about = None)]
struct Cli {
    /// Enable per-sample debug tracing
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the acquisition loop against simulated peripherals
    Run {
        /// Path to the board descriptor (YAML)
        #[arg(short, long)]
        board: Option<PathBuf>,

        /// Firmware ELF to read the heap layout from
        #[arg(short, long)]
        elf: Option<PathBuf>,

        /// Comma-separated conversion results; `fail` marks a failed wait.
        /// Defaults to a full-scale triangle sweep.
        #[arg(short, long, value_delimiter = ',')]
        samples: Vec<String>,

        /// Maximum number of loop iterations (default: 20)
        #[arg(long, default_value = "20")]
        max_steps: u64,

        /// Pace output with real delays
        #[arg(long)]
        realtime: bool,
    },
    /// Run a session script and check its assertions
    Test {
        /// Path to the session script (YAML)
        #[arg(long)]
        script: PathBuf,

        /// Directory for result.json
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Do not mirror the serial stream to stdout
        #[arg(long)]
        no_serial_stdout: bool,
    },
    /// Print the heap layout and optionally replay sbrk requests against it
    Layout {
        #[arg(short, long, conflicts_with = "elf", required_unless_present = "elf")]
        board: Option<PathBuf>,

        #[arg(short, long)]
        elf: Option<PathBuf>,

        /// Increment to request, in order (decimal or 0x hex, may be negative)
        #[arg(short, long = "request", allow_hyphen_values = true)]
        requests: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.trace {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let code = match cli.command {
        Command::Run {
            board,
            elf,
            samples,
            max_steps,
            realtime,
        } => report(run_command(
            board.as_deref(),
            elf.as_deref(),
            &samples,
            max_steps,
            realtime,
        )),
        Command::Test {
            script,
            output_dir,
            no_serial_stdout,
        } => report(test_command(&script, output_dir.as_deref(), !no_serial_stdout)),
        Command::Layout {
            board,
            elf,
            requests,
        } => report(layout_command(board.as_deref(), elf.as_deref(), &requests)),
    };
    std::process::exit(code);
}

fn report(result: Result<i32>) -> i32 {
    result.unwrap_or_else(|e| {
        eprintln!("Error: {:#}", e);
        EXIT_CONFIG_ERROR
    })
}

fn load_board(path: Option<&Path>) -> Result<BoardDescriptor> {
    match path {
        Some(path) => {
            info!("Loading board descriptor: {:?}", path);
            BoardDescriptor::from_file(path)
        }
        None => {
            info!("Using default board configuration");
            Ok(BoardDescriptor {
                name: "default".to_string(),
                layout: None,
                adc: Default::default(),
                serial: Default::default(),
                throttle_ms: adcstream_core::acquisition::THROTTLE_MS,
            })
        }
    }
}

/// ELF symbols win over the board's layout block.
fn resolve_layout(board: &BoardDescriptor, elf: Option<&Path>) -> Result<Option<HeapLayout>> {
    if let Some(elf) = elf {
        info!("Reading linker symbols from {:?}", elf);
        return adcstream_loader::load_layout(elf).map(Some);
    }
    board.layout.as_ref().map(|l| l.resolve()).transpose()
}

fn parse_samples(raw: &[String]) -> Result<Vec<SimConversion>> {
    raw.iter()
        .map(|s| {
            let s = s.trim();
            if s.eq_ignore_ascii_case("fail") {
                Ok(SimConversion::Fail)
            } else {
                s.parse()
                    .map(SimConversion::Sample)
                    .with_context(|| format!("Invalid sample '{}'", s))
            }
        })
        .collect()
}

fn check_step_limit(max_steps: u64) -> Result<()> {
    if max_steps > MAX_ALLOWED_STEPS {
        anyhow::bail!(
            "Limit 'max_steps' {} exceeds the allowed maximum of {}",
            max_steps,
            MAX_ALLOWED_STEPS
        );
    }
    Ok(())
}

fn run_command(
    board_path: Option<&Path>,
    elf: Option<&Path>,
    samples: &[String],
    max_steps: u64,
    realtime: bool,
) -> Result<i32> {
    check_step_limit(max_steps)?;
    let board = load_board(board_path)?;
    if let Some(layout) = resolve_layout(&board, elf)? {
        info!(
            "Heap {:#x}..{:#x} ({} bytes)",
            layout.heap_start,
            layout.limit().unwrap_or(0),
            layout.capacity()
        );
    }

    let settings = board.settings();
    let max_value = settings.adc.max_value();
    let source = if samples.is_empty() {
        ConversionSource::Ramp { max_value }
    } else {
        let conversions = parse_samples(samples)?;
        check_sample_range(&conversions, max_value)?;
        ConversionSource::Scripted(conversions)
    };

    info!("Starting board '{}'", board.name);
    let outcome = run_session(SessionConfig {
        settings,
        source,
        max_steps,
        wall_time: None,
        echo: true,
        realtime,
    });

    info!(
        "Sent {} lines ({} bytes), skipped {} conversions",
        outcome.metrics.samples, outcome.metrics.bytes_sent, outcome.metrics.skipped
    );
    if outcome.stop_reason == StopReason::Halt {
        return Ok(EXIT_HALTED);
    }
    Ok(EXIT_PASS)
}

#[derive(Debug, Serialize)]
struct TestResult<'a> {
    status: &'static str,
    board: String,
    #[serde(flatten)]
    outcome: &'a SessionOutcome,
    assertions: Vec<AssertionResult>,
    layout: Option<LayoutSummary>,
}

fn test_command(script_path: &Path, output_dir: Option<&Path>, echo: bool) -> Result<i32> {
    let script = SessionScript::from_file(script_path)?;
    check_step_limit(script.limits.max_steps)?;

    // Inputs are relative to the script.
    let base = script_path.parent().unwrap_or_else(|| Path::new("."));
    let board_path = base.join(&script.inputs.board);
    let board = BoardDescriptor::from_file(&board_path)?;
    let elf_path = script.inputs.elf.as_ref().map(|elf| base.join(elf));
    let layout = resolve_layout(&board, elf_path.as_deref())?;

    let settings = board.settings();
    let conversions = session::to_conversions(&script.inputs.samples, settings.adc.max_value())?;

    let outcome = run_session(SessionConfig {
        settings,
        source: ConversionSource::Scripted(conversions),
        max_steps: script.limits.max_steps,
        wall_time: script.limits.wall_time_ms.map(Duration::from_millis),
        echo,
        realtime: false,
    });

    let assertions = check_assertions(&script.assertions, &outcome);
    let passed = assertions.iter().all(|a| a.passed);
    for failed in assertions.iter().filter(|a| !a.passed) {
        warn!("Assertion failed: {}", failed.assertion);
    }

    let result = TestResult {
        status: if passed { "pass" } else { "fail" },
        board: board.name.clone(),
        outcome: &outcome,
        assertions,
        layout: layout.as_ref().map(LayoutSummary::from),
    };

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {:?}", dir))?;
        let path = dir.join("result.json");
        let json = serde_json::to_string_pretty(&result)?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write {:?}", path))?;
        info!("Wrote {:?}", path);
    }

    info!("Test {}", result.status);
    Ok(if passed { EXIT_PASS } else { EXIT_ASSERT_FAIL })
}

fn parse_increment(raw: &str) -> Result<isize> {
    let (negative, digits) = match raw.trim().strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw.trim()),
    };
    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => isize::from_str_radix(hex, 16),
        None => digits.parse(),
    }
    .with_context(|| format!("Invalid increment '{}'", raw))?;
    Ok(if negative { -magnitude } else { magnitude })
}

fn layout_command(board: Option<&Path>, elf: Option<&Path>, requests: &[String]) -> Result<i32> {
    let layout = match (board, elf) {
        (_, Some(elf)) => adcstream_loader::load_layout(elf)?,
        (Some(board), None) => load_board(Some(board))?
            .layout
            .context("Board descriptor has no layout block")?
            .resolve()?,
        (None, None) => anyhow::bail!("Either --board or --elf is required"),
    };

    println!("heap start : {:#010x}", layout.heap_start);
    println!("heap limit : {:#010x}", layout.limit().unwrap_or(0));
    println!("stack top  : {:#010x}", layout.stack_top);
    println!("reserved   : {} bytes", layout.min_stack_size);
    println!("capacity   : {} bytes", layout.capacity());

    let mut heap = SbrkHeap::new(layout);
    for raw in requests {
        let increment = parse_increment(raw)?;
        match heap.sbrk(increment) {
            Ok(prev) => println!(
                "sbrk({}) = {:#010x}, break {:#010x}",
                increment,
                prev,
                heap.heap_end()
            ),
            Err(e) => println!("sbrk({}) = -1, errno {} ({})", increment, heap.errno(), e),
        }
    }
    Ok(EXIT_PASS)
}
