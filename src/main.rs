use std::env;
use std::fs;
use std::process;

use etude::{EngineConfig, PlaybackStyle, PlayerEvent};

const USAGE: &str = "Usage: etude [options] <tier1.musicxml> [tier2.musicxml ...]

Options:
  --config <file>          Engine configuration (YAML)
  --bpm <n>                Base tempo
  --style <style>          score | metronome | accompaniment
  --accompaniment <file>   Accompaniment MusicXML
  --difficulty <tier>      0 = adaptive (default), 1.. = fixed tier
  --no-record              Do not capture the performance
  --proficiency <p>        Report a proficiency when playback starts
  --output <file>          Write the final adaptive score as MusicXML";

struct Options {
    config: Option<String>,
    bpm: Option<f64>,
    style: PlaybackStyle,
    accompaniment: Option<String>,
    difficulty: u8,
    record: bool,
    proficiency: Option<f64>,
    output: Option<String>,
    tiers: Vec<String>,
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{}", message);
    process::exit(1);
}

fn parse_args(args: &[String]) -> Options {
    let mut options = Options {
        config: None,
        bpm: None,
        style: PlaybackStyle::Score,
        accompaniment: None,
        difficulty: 0,
        record: true,
        proficiency: None,
        output: None,
        tiers: Vec::new(),
    };

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| -> String {
            iter.next()
                .cloned()
                .unwrap_or_else(|| fail(format!("{} needs a value\n\n{}", flag, USAGE)))
        };
        match arg.as_str() {
            "--config" => options.config = Some(value("--config")),
            "--bpm" => {
                let raw = value("--bpm");
                options.bpm = Some(raw.parse().unwrap_or_else(|_| fail(format!("Invalid tempo '{}'", raw))));
            }
            "--style" => {
                options.style = value("--style").parse().unwrap_or_else(|e| fail(e));
            }
            "--accompaniment" => options.accompaniment = Some(value("--accompaniment")),
            "--difficulty" => {
                let raw = value("--difficulty");
                options.difficulty = raw
                    .parse()
                    .unwrap_or_else(|_| fail(format!("Invalid difficulty '{}'", raw)));
            }
            "--no-record" => options.record = false,
            "--proficiency" => {
                let raw = value("--proficiency");
                options.proficiency = Some(
                    raw.parse()
                        .unwrap_or_else(|_| fail(format!("Invalid proficiency '{}'", raw))),
                );
            }
            "--output" => options.output = Some(value("--output")),
            "-h" | "--help" => {
                println!("{}", USAGE);
                process::exit(0);
            }
            flag if flag.starts_with("--") => fail(format!("Unknown option '{}'\n\n{}", flag, USAGE)),
            path => options.tiers.push(path.to_string()),
        }
    }

    if options.tiers.is_empty() {
        fail(USAGE);
    }
    options
}

fn read(path: &str) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| fail(format!("Error reading file '{}': {}", path, e)))
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = env::args().collect();
    let mut options = parse_args(&args);
    let output = options.output.take();

    let mut config = match &options.config {
        Some(path) => EngineConfig::load(path).unwrap_or_else(|e| fail(e)),
        None => EngineConfig::default(),
    };
    if let Some(bpm) = options.bpm {
        config.tempo.base_bpm = bpm;
    }

    let documents: Vec<String> = options.tiers.iter().map(|p| read(p)).collect();
    let accompaniment = options.accompaniment.as_deref().map(read);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap_or_else(|e| fail(format!("Failed to start runtime: {}", e)));

    let final_score = runtime.block_on(async move {
        let (player, handle, mut events) =
            etude::open_player(config, &documents).unwrap_or_else(|e| fail(e));
        let task = tokio::spawn(player.run());

        let setup = (|| -> Result<(), etude::EtudeError> {
            if let Some(doc) = accompaniment {
                handle.load_accompaniment(doc)?;
            }
            handle.set_style(options.style)?;
            handle.set_difficulty(options.difficulty)?;
            handle.set_recording_enabled(options.record)?;
            handle.play()?;
            if let Some(p) = options.proficiency {
                handle.report_proficiency(p)?;
            }
            Ok(())
        })();
        if let Err(e) = setup {
            fail(e);
        }

        let mut final_score = None;
        while let Some(event) = events.recv().await {
            match event {
                PlayerEvent::PlaybackStarted { style, tier, bpm } => {
                    println!("Playing ({}, tier {}, {:.0} BPM)", style, tier, bpm)
                }
                PlayerEvent::ScrollToMeasure { label, .. } => println!("Measure {}", label),
                PlayerEvent::SegmentSealed {
                    label,
                    expected_notes,
                    samples,
                } => println!(
                    "  sealed '{}': {} notes, {} samples",
                    label, expected_notes, samples
                ),
                PlayerEvent::ProficiencyUpdated(p) => println!("Proficiency {:.2}", p),
                PlayerEvent::ScoreChanged {
                    score,
                    patched_from: Some(from),
                    difficulty_map,
                    ..
                } => {
                    let tiers: Vec<String> =
                        difficulty_map.iter().map(|s| s.difficulty.to_string()).collect();
                    println!("Adaptive score patched from '{}': [{}]", from, tiers.join(" "));
                    final_score = Some(score);
                }
                PlayerEvent::ScoreChanged { tier, .. } => println!("Difficulty: tier {}", tier),
                PlayerEvent::Notice(message) => eprintln!("Notice: {}", message),
                PlayerEvent::Error(message) => eprintln!("Error: {}", message),
                PlayerEvent::PlaybackStopped => break,
                PlayerEvent::TempoChanged(_) | PlayerEvent::StyleChanged(_) => {}
            }
        }

        let _ = handle.shutdown();
        let _ = task.await;
        final_score
    });

    if let Some(path) = output {
        match final_score {
            Some(score) => {
                if let Err(e) = fs::write(&path, etude::to_musicxml(&score)) {
                    fail(format!("Error writing to '{}': {}", path, e));
                }
                eprintln!("Wrote MusicXML to {}", path);
            }
            None => eprintln!("Adaptive score unchanged, nothing written"),
        }
    }
}
