//! Line commands read from stdin

use anyhow::{anyhow, bail, Result};

/// One parsed input line
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Open(String),
    Close,
    Play,
    Pause,
    Stop,
    Seek(f64),
    Tempo(f32),
    Pitch(f32),
    LoopA,
    LoopB,
    LoopClear,
    LoopJogStart(f64),
    LoopJogEnd(f64),
    LoopDouble,
    LoopHalve,
    LoopForward,
    LoopBackward,
    LoopExtend,
    LoopShorten,
    LoopSnap,
    LoopHere(u32),
    Record,
    Overlap(u32),
    Bleed(f32),
    Grid(f64),
    Snap(bool),
    EqLow(f32, f32),
    EqPeak(f32, f32, f32),
    EqHigh(f32, f32),
    EqBypass(bool),
    Analysis(bool),
    Devices,
    Device(usize),
    Status,
    Save,
    Help,
    Quit,
}

pub const HELP: &str = "\
open <path>            load a file           close               unload
play | pause | stop    transport             seek <sec>          move playhead
tempo <ratio>          0.25-4.0              pitch <semitones>   -24..24
a | b                  set loop points       clear               stop looping
jog-start <sec>        nudge A               jog-end <sec>       nudge B
double | halve         resize loop           fwd | back          move loop
extend | shorten       by one bar            snap                loop to beats
here <bars>            loop from playhead    record              loop record toggle
overlap <ms>           record tail           bleed <ms>          loop edge fade
grid <bpm>             grid tempo            grid-snap on|off    snap A/B to grid
eq-low <hz> <db>       low shelf             eq-high <hz> <db>   high shelf
eq-peak <hz> <db> <q>  peak band             eq-bypass on|off
analysis on|off        beat detection        status              print state
devices                list outputs          device <n>          switch output
save                   write config          quit";

fn arg<T: std::str::FromStr>(args: &[&str], index: usize, name: &str) -> Result<T> {
    let raw = args
        .get(index)
        .ok_or_else(|| anyhow!("missing argument <{}>", name))?;
    raw.parse()
        .map_err(|_| anyhow!("invalid <{}>: {}", name, raw))
}

fn switch(args: &[&str]) -> Result<bool> {
    match args.first().copied() {
        Some("on") | Some("1") | Some("true") => Ok(true),
        Some("off") | Some("0") | Some("false") => Ok(false),
        Some(other) => bail!("expected on|off, got {}", other),
        None => bail!("missing argument <on|off>"),
    }
}

/// Parse a line; blank lines give `None`
pub fn parse(line: &str) -> Result<Option<Command>> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match name {
        "open" | "load" => {
            if args.is_empty() {
                bail!("missing argument <path>");
            }
            Command::Open(args.join(" "))
        }
        "close" => Command::Close,
        "play" => Command::Play,
        "pause" => Command::Pause,
        "stop" => Command::Stop,
        "seek" => Command::Seek(arg(&args, 0, "sec")?),
        "tempo" => Command::Tempo(arg(&args, 0, "ratio")?),
        "pitch" => Command::Pitch(arg(&args, 0, "semitones")?),
        "a" => Command::LoopA,
        "b" => Command::LoopB,
        "clear" => Command::LoopClear,
        "jog-start" => Command::LoopJogStart(arg(&args, 0, "sec")?),
        "jog-end" => Command::LoopJogEnd(arg(&args, 0, "sec")?),
        "double" => Command::LoopDouble,
        "halve" => Command::LoopHalve,
        "fwd" => Command::LoopForward,
        "back" => Command::LoopBackward,
        "extend" => Command::LoopExtend,
        "shorten" => Command::LoopShorten,
        "snap" => Command::LoopSnap,
        "here" => Command::LoopHere(if args.is_empty() { 1 } else { arg(&args, 0, "bars")? }),
        "record" | "rec" => Command::Record,
        "overlap" => Command::Overlap(arg(&args, 0, "ms")?),
        "bleed" => Command::Bleed(arg(&args, 0, "ms")?),
        "grid" => Command::Grid(arg(&args, 0, "bpm")?),
        "grid-snap" => Command::Snap(switch(&args)?),
        "eq-low" => Command::EqLow(arg(&args, 0, "hz")?, arg(&args, 1, "db")?),
        "eq-peak" => Command::EqPeak(
            arg(&args, 0, "hz")?,
            arg(&args, 1, "db")?,
            arg(&args, 2, "q")?,
        ),
        "eq-high" => Command::EqHigh(arg(&args, 0, "hz")?, arg(&args, 1, "db")?),
        "eq-bypass" => Command::EqBypass(switch(&args)?),
        "analysis" => Command::Analysis(switch(&args)?),
        "devices" => Command::Devices,
        "device" => Command::Device(arg(&args, 0, "n")?),
        "status" | "s" => Command::Status,
        "save" => Command::Save,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => bail!("unknown command: {} (type 'help')", other),
    };
    Ok(Some(command))
}
