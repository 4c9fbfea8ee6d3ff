use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use std::{path::PathBuf, process, sync::Arc, thread};
use stem_mixer_core::{
    load_stem_files, write_audio, ClipPolicy, Command, Event, GainVector, SpleeterEngine,
    StemCount, StemFile, StemMixer, Studio, StudioConfig, WavFileSink,
};

#[derive(Parser)]
#[command(name = "stem-mixer")]
#[command(about = "Split a song into stems and remix them with per-stem gains", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at info level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Separate a file with spleeter, then render a mix of its stems
    Split {
        #[arg(short, long)]
        input: PathBuf,

        /// 2, 4 or 5
        #[arg(short, long, default_value_t = 2)]
        stems: u8,

        /// Stem directory (defaults to the input's directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Linear gain per stem, in stem order
        #[arg(short, long, allow_negative_numbers = true)]
        gain: Vec<f32>,

        /// Write the mix to this WAV file
        #[arg(long)]
        mix_out: Option<PathBuf>,

        /// JSON config file
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(short, long)]
        quiet: bool,
    },

    /// Mix existing stem files
    Mix {
        #[arg(short, long = "stem", required = true)]
        stems: Vec<PathBuf>,

        /// Linear gain per stem, in stem order (default: unity)
        #[arg(short, long, allow_negative_numbers = true)]
        gain: Vec<f32>,

        #[arg(short, long)]
        output: PathBuf,

        /// Scale the mix down to full scale instead of hard clipping
        #[arg(long)]
        normalize: bool,
    },

    /// List stem layouts
    Layouts,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();

    let result = match cli.command {
        Commands::Split {
            input,
            stems,
            output,
            gain,
            mix_out,
            config,
            quiet,
        } => handle_split(input, stems, output, gain, mix_out, config, quiet),
        Commands::Mix {
            stems,
            gain,
            output,
            normalize,
        } => handle_mix(stems, gain, output, normalize),
        Commands::Layouts => handle_layouts(),
    };

    match result {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn handle_split(
    input: PathBuf,
    stems: u8,
    output: Option<PathBuf>,
    gains: Vec<f32>,
    mix_out: Option<PathBuf>,
    config: Option<PathBuf>,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !input.exists() {
        return Err(format!("Input file not found: {}", input.display()).into());
    }

    let mut config = match config {
        Some(path) => StudioConfig::load(path)?,
        None => StudioConfig::default(),
    }
    .with_env_overrides();
    if output.is_some() {
        config.output_dir = output;
    }
    // The mix is requested explicitly once the gains are in.
    config.mix.background = false;

    if !quiet {
        eprintln!("🎵 Stem Mixer");
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!("Input:  {}", input.display());
        eprintln!("Stems:  {}", stems);
        eprintln!("Engine: {}", config.engine.program);
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!();
    }

    let engine = Arc::new(SpleeterEngine::new(config.engine.clone()));
    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();

    let mut studio = Studio::new(config, engine, event_tx);
    if let Some(path) = &mix_out {
        studio = studio.with_sink(WavFileSink::new(path));
    }
    let worker = thread::spawn(move || studio.run(cmd_rx));

    cmd_tx.send(Command::RequestSeparation {
        path: input,
        stem_count: stems,
    })?;
    let outcome = wait_for_separation(&event_rx, quiet).and_then(|()| {
        for (index, gain) in gains.into_iter().enumerate() {
            cmd_tx.send(Command::SetGain { index, gain })?;
        }
        cmd_tx.send(Command::RequestCurrentMix)?;
        wait_for_mix(&event_rx, quiet)
    });

    let _ = cmd_tx.send(Command::Shutdown);
    let _ = worker.join();
    outcome?;

    if let Some(path) = mix_out {
        if quiet {
            println!("{}", path.display());
        } else {
            eprintln!("🎚️  Mix written to {}", path.display());
        }
    }

    Ok(())
}

fn wait_for_separation(
    events: &Receiver<Event>,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        match events.recv()? {
            Event::SeparationStarted { job, .. } => {
                if !quiet {
                    eprintln!("⏳ Separating (job {})", job);
                }
            }
            Event::SeparationProgress { percent, .. } => {
                if !quiet {
                    eprint!("\r🔄 Separating: {:>3}%", percent);
                }
            }
            Event::SeparationSucceeded {
                stems, metadata, ..
            } => {
                if quiet {
                    println!("{}", serde_json::to_string(&metadata)?);
                } else {
                    eprintln!();
                    eprintln!("✅ Separation complete!");
                    eprintln!("   {}", metadata);
                    for (i, stem) in stems.iter().enumerate() {
                        eprintln!("  {}. {} ({:.2}s)", i, stem.name, stem.buffer.duration().as_secs_f64());
                    }
                }
                return Ok(());
            }
            Event::SeparationFailed { reason, .. } => {
                return Err(format!("Separation failed: {}", reason).into());
            }
            Event::CommandRejected { reason } => return Err(reason.into()),
            Event::MixReady { .. } => {}
        }
    }
}

fn wait_for_mix(events: &Receiver<Event>, quiet: bool) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        match events.recv()? {
            Event::MixReady { mix } => {
                if !quiet {
                    eprintln!(
                        "🎛️  Mix ready: {:.2}s, gains {:?}, peak {:.3}",
                        mix.buffer.duration().as_secs_f64(),
                        mix.gains.as_slice(),
                        mix.buffer.peak()
                    );
                }
                return Ok(());
            }
            Event::CommandRejected { reason } => return Err(reason.into()),
            _ => {}
        }
    }
}

fn handle_mix(
    stems: Vec<PathBuf>,
    gains: Vec<f32>,
    output: PathBuf,
    normalize: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let files: Vec<StemFile> = stems
        .into_iter()
        .map(|path| StemFile {
            name: path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("stem")
                .to_string(),
            path,
        })
        .collect();

    let set = load_stem_files(&files)?;
    let gains = if gains.is_empty() {
        GainVector::unity(set.len())
    } else {
        GainVector::from_vec(gains)?
    };
    let clip = if normalize {
        ClipPolicy::NormalizePeak
    } else {
        ClipPolicy::HardClip
    };

    let mixed = StemMixer::new(clip).mix(set.as_slice(), gains.as_slice())?;
    write_audio(&output, &mixed)?;

    eprintln!(
        "✅ Mixed {} stems ({}) into {}",
        set.len(),
        set.format(),
        output.display()
    );
    Ok(())
}

fn handle_layouts() -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📋 Stem Layouts");
    eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for count in StemCount::ALL {
        let marker = if count == StemCount::default() { " (default)" } else { "" };
        eprintln!(
            "  • {}{}: {}",
            count,
            marker,
            count.display_names().join(", ")
        );
    }

    eprintln!();
    eprintln!("Use --stems <n> to pick a layout");

    Ok(())
}
