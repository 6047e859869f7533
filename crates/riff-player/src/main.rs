//! Riff Player - command-line practice player
//!
//! Loads a file, opens the audio device and reads commands from stdin:
//! tempo and pitch changes, A/B looping, loop recording, EQ, and live beat
//! detection readouts. Type `help` for the command list.
//!
//! ## Command line
//!
//! `riff-player [--config <path>] [file]`

mod commands;

use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use commands::{Command, HELP};
use riff_core::audio::output_devices;
use riff_core::config::{default_config_path, load_config, save_config, PlayerConfig};
use riff_core::Player;

struct Args {
    config_path: PathBuf,
    file: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut config_path = None;
    let mut file = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().context("--config needs a path")?;
                config_path = Some(PathBuf::from(path));
            }
            "--help" | "-h" => {
                println!("usage: riff-player [--config <path>] [file]\n\n{}", HELP);
                std::process::exit(0);
            }
            _ => file = Some(PathBuf::from(arg)),
        }
    }
    Ok(Args {
        config_path: config_path.unwrap_or_else(default_config_path),
        file,
    })
}

fn print_status(player: &Player) {
    let region = player.loop_region();
    let analysis = player.latest_results();
    println!(
        "{} {:.2}/{:.2}s  tempo {:.2}x  pitch {:+.1}st",
        if player.is_playing() { "▶" } else { "■" },
        player.position(),
        player.duration(),
        player.tempo_ratio(),
        player.pitch_semitones()
    );
    println!(
        "loop {:.2}-{:.2}s {}  record {:?}  grid {:.1} BPM{}",
        region.start,
        region.end,
        if region.is_active() { "on" } else { "off" },
        player.loop_record_state(),
        player.grid_bpm(),
        if player.is_snap_to_grid() { " (snap)" } else { "" }
    );
    if analysis.is_valid {
        println!(
            "analysis {:.1} BPM  confidence {:.2}  {} beats  {} onsets",
            analysis.bpm,
            analysis.confidence,
            analysis.beats.len(),
            analysis.onsets.len()
        );
    } else if player.is_analysis_enabled() {
        println!("analysis listening ({} beats)", analysis.beats.len());
    } else {
        println!("analysis off");
    }
}

/// Copy live player settings back into the config before saving
fn sync_config(player: &Player, config: &mut PlayerConfig) {
    config.analysis_enabled = player.is_analysis_enabled();
    config.loop_overlap_ms = player.loop_overlap_ms();
    config.edge_bleed_ms = player.edge_bleed_ms();
    config.snap_to_grid = player.is_snap_to_grid();
    config.grid_bpm = player.grid_bpm();
    config.eq = player.eq_settings();
}

fn list_devices() -> Result<()> {
    let devices = output_devices().context("Failed to list output devices")?;
    if devices.is_empty() {
        println!("no output devices");
    }
    for (index, device) in devices.iter().enumerate() {
        println!("{:>2}  {}  {}ch", index, device, device.max_channels);
    }
    Ok(())
}

/// Reopen audio output on device `index` of the device list
fn switch_device(player: &mut Player, config: &mut PlayerConfig, index: usize) -> Result<()> {
    let devices = output_devices().context("Failed to list output devices")?;
    let device = devices
        .get(index)
        .with_context(|| format!("no device {} (see 'devices')", index))?;

    config.audio.device = Some(device.id.clone());
    player.stop_audio();
    player
        .start_audio(&config.audio)
        .with_context(|| format!("Failed to start {}", device))?;
    println!(
        "audio running on {} at {}Hz",
        device,
        player.audio_sample_rate().unwrap_or_default()
    );
    Ok(())
}

fn report(changed: bool) {
    if !changed {
        println!("(no change)");
    }
}

/// Run one command; `Ok(false)` means quit
fn apply(player: &mut Player, config: &mut PlayerConfig, config_path: &Path, command: Command) -> Result<bool> {
    match command {
        Command::Open(path) => {
            player
                .load_file(Path::new(&path))
                .with_context(|| format!("Failed to open {}", path))?;
            println!("loaded {} ({:.2}s)", path, player.duration());
        }
        Command::Close => player.close_file()?,
        Command::Play => player.play()?,
        Command::Pause => player.pause(),
        Command::Stop => player.stop()?,
        Command::Seek(seconds) => player.seek(seconds)?,
        Command::Tempo(ratio) => player.set_tempo_ratio(ratio),
        Command::Pitch(semitones) => player.set_pitch_semitones(semitones),
        Command::LoopA => player.set_loop_a(),
        Command::LoopB => player.set_loop_b(),
        Command::LoopClear => player.clear_loop(),
        Command::LoopJogStart(delta) => report(player.jog_loop_start(delta)),
        Command::LoopJogEnd(delta) => report(player.jog_loop_end(delta)),
        Command::LoopDouble => report(player.double_loop()),
        Command::LoopHalve => report(player.halve_loop()),
        Command::LoopForward => report(player.move_loop_forward()),
        Command::LoopBackward => report(player.move_loop_backward()),
        Command::LoopExtend => report(player.extend_loop_by_bar()),
        Command::LoopShorten => report(player.shorten_loop_by_bar()),
        Command::LoopSnap => report(player.snap_loop_to_beats()),
        Command::LoopHere(bars) => report(player.loop_here(bars)),
        Command::Record => {
            let state = player.toggle_loop_record()?;
            println!("loop record: {:?}", state);
        }
        Command::Overlap(ms) => player.set_loop_overlap_ms(ms),
        Command::Bleed(ms) => player.set_edge_bleed_ms(ms),
        Command::Grid(bpm) => player.set_grid_bpm(bpm),
        Command::Snap(enabled) => player.set_snap_to_grid(enabled),
        Command::EqLow(freq, gain) => player.set_eq_low_shelf(freq, gain),
        Command::EqPeak(freq, gain, q) => player.set_eq_peak(freq, gain, q),
        Command::EqHigh(freq, gain) => player.set_eq_high_shelf(freq, gain),
        Command::EqBypass(bypass) => player.set_eq_bypass(bypass),
        Command::Analysis(enabled) => player.set_analysis_enabled(enabled),
        Command::Devices => list_devices()?,
        Command::Device(index) => switch_device(player, config, index)?,
        Command::Status => print_status(player),
        Command::Save => {
            sync_config(player, config);
            save_config(config, config_path)?;
            println!("saved {}", config_path.display());
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => return Ok(false),
    }
    Ok(true)
}

fn main() -> Result<()> {
    // RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    let mut config: PlayerConfig = load_config(&args.config_path);
    log::info!("riff-player starting up (config {:?})", args.config_path);

    let mut player = Player::new(&config).context("Failed to create player")?;

    if let Some(file) = args.file.as_deref() {
        player
            .load_file(file)
            .with_context(|| format!("Failed to open {}", file.display()))?;
        println!("loaded {} ({:.2}s)", file.display(), player.duration());
    }

    match player.start_audio(&config.audio) {
        Ok(()) => println!(
            "audio running at {}Hz (~{:.1}ms)",
            player.audio_sample_rate().unwrap_or_default(),
            player.audio_latency_ms().unwrap_or_default()
        ),
        Err(e) => {
            log::error!("Audio output unavailable: {}", e);
            eprintln!("Warning: no audio output ({}), commands still work", e);
        }
    }

    println!("type 'help' for commands");
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        match commands::parse(&line) {
            Ok(Some(command)) => match apply(&mut player, &mut config, &args.config_path, command) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => eprintln!("error: {:#}", e),
            },
            Ok(None) => {}
            Err(e) => eprintln!("error: {}", e),
        }
    }

    player.stop_audio();
    log::info!("riff-player shut down");
    Ok(())
}
