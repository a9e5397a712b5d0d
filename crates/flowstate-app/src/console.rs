//! Interactive command console.
//!
//! Lines typed on stdin are parsed into [`ConsoleCommand`]s. Transport commands
//! become [`PlaybackAction`]s routed through the host; the rest inspect or edit
//! the effects chain.

use std::io::BufRead;
use std::thread;

use crossbeam_channel::{unbounded, Receiver};
use flowstate_audio::effects::{create_effect, Effect, EFFECT_KINDS};
use flowstate_audio::{EffectId, EffectsChain, Host, PlaybackAction};
use flowstate_core::RepeatMode;
use tracing::{debug, warn};

pub const HELP: &str = "\
commands:
  play | pause | resume | stop | next | prev
  seek <secs>          volume <0..1>        mute
  repeat [off|all|one] shuffle [on|off]     goto <index>
  status               list
  fx list | fx add <kind> | fx rm <fx> | fx bypass <fx> | fx set <fx> <param> <value>
  help | quit";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Action(PlaybackAction),
    /// `repeat` without an argument.
    CycleRepeat,
    /// `shuffle` without an argument.
    ToggleShuffle,
    Status,
    List,
    FxList,
    FxAdd(String),
    FxRemove(String),
    FxBypass(String),
    FxSet {
        target: String,
        param: String,
        value: f32,
    },
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parse a line. Blank lines give `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();
        let arg = |i: usize, what: &str| {
            args.get(i)
                .copied()
                .ok_or_else(|| format!("{head}: missing {what}"))
        };
        let number = |i: usize, what: &str| -> Result<f64, String> {
            let text = arg(i, what)?;
            text.parse::<f64>()
                .map_err(|_| format!("{head}: '{text}' is not a number"))
        };

        let command = match head.to_ascii_lowercase().as_str() {
            "play" | "p" => Self::Action(PlaybackAction::Play { offset: None }),
            "pause" => Self::Action(PlaybackAction::Pause),
            "resume" => Self::Action(PlaybackAction::Resume),
            "stop" => Self::Action(PlaybackAction::Stop),
            "next" | "n" => Self::Action(PlaybackAction::Next),
            "prev" | "previous" => Self::Action(PlaybackAction::Previous),
            "seek" => Self::Action(PlaybackAction::Seek {
                position: number(0, "position")?,
            }),
            "volume" | "vol" => Self::Action(PlaybackAction::SetVolume {
                level: number(0, "level")? as f32,
            }),
            "mute" => Self::Action(PlaybackAction::ToggleMute),
            "goto" => {
                let index = number(0, "index")?;
                if index < 0.0 || index.fract() > 0.0 {
                    return Err(format!("goto: '{index}' is not an index"));
                }
                Self::Action(PlaybackAction::PlayIndex {
                    index: index as usize,
                })
            }
            "repeat" => match args.first() {
                None => Self::CycleRepeat,
                Some(mode) => Self::Action(PlaybackAction::SetRepeatMode {
                    mode: mode.parse::<RepeatMode>().map_err(|e| e.to_string())?,
                }),
            },
            "shuffle" => match args.first().map(|s| s.to_ascii_lowercase()) {
                None => Self::ToggleShuffle,
                Some(state) => Self::Action(PlaybackAction::SetShuffleMode {
                    enabled: match state.as_str() {
                        "on" | "true" | "1" => true,
                        "off" | "false" | "0" => false,
                        other => return Err(format!("shuffle: expected on/off, got '{other}'")),
                    },
                }),
            },
            "status" | "s" => Self::Status,
            "list" | "ls" => Self::List,
            "fx" => match arg(0, "subcommand")? {
                "list" | "ls" => Self::FxList,
                "add" => Self::FxAdd(arg(1, "effect kind")?.to_string()),
                "rm" | "remove" => Self::FxRemove(arg(1, "effect")?.to_string()),
                "bypass" => Self::FxBypass(arg(1, "effect")?.to_string()),
                "set" => Self::FxSet {
                    target: arg(1, "effect")?.to_string(),
                    param: arg(2, "parameter")?.to_string(),
                    value: number(3, "value")? as f32,
                },
                other => return Err(format!("fx: unknown subcommand '{other}'")),
            },
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => return Err(format!("unknown command '{other}' (try 'help')")),
        };
        Ok(Some(command))
    }
}

/// Whether the console should keep running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Run a parsed command against the host, printing results.
pub fn execute(host: &mut Host, command: ConsoleCommand) -> Flow {
    match command {
        ConsoleCommand::Action(action) => {
            let outcome = host.request_playback_action(action);
            if let Some(error) = outcome.error {
                println!("error: {error}");
            }
        }
        ConsoleCommand::CycleRepeat => {
            let mode = host.controller_mut().cycle_repeat();
            println!("repeat {}", mode.as_str());
        }
        ConsoleCommand::ToggleShuffle => {
            let on = host.controller_mut().toggle_shuffle();
            println!("shuffle {}", if on { "on" } else { "off" });
        }
        ConsoleCommand::Status => print_status(host),
        ConsoleCommand::List => {
            let playlist = host.controller().playlist();
            let current = playlist.current_index();
            for (i, entry) in playlist.entries().iter().enumerate() {
                let marker = if Some(i) == current { '>' } else { ' ' };
                println!("{marker} {i:>3}  {}", entry.track.title);
            }
        }
        ConsoleCommand::FxList => {
            let chain = host.controller().chain();
            let chain = chain.lock();
            for summary in chain.summaries() {
                let flags = match (summary.enabled, summary.bypassed) {
                    (false, _) => " [disabled]",
                    (true, true) => " [bypassed]",
                    (true, false) => "",
                };
                let params: Vec<String> = summary
                    .parameters
                    .iter()
                    .map(|(k, v)| format!("{k}={v:.2}"))
                    .collect();
                println!("{} {}{flags}  {}", summary.id, summary.name, params.join(" "));
            }
        }
        ConsoleCommand::FxAdd(kind) => match create_effect(&kind) {
            Some(effect) => {
                let id = host.controller().chain().lock().add(effect);
                println!("added {kind} as {id}");
            }
            None => println!("unknown effect '{kind}' (one of: {})", EFFECT_KINDS.join(", ")),
        },
        ConsoleCommand::FxRemove(target) => {
            let chain = host.controller().chain();
            let mut chain = chain.lock();
            match resolve_effect(&chain, &target) {
                Some(id) if chain.remove(id).is_some() => println!("removed {id}"),
                _ => println!("no effect '{target}'"),
            }
        }
        ConsoleCommand::FxBypass(target) => {
            let chain = host.controller().chain();
            let mut chain = chain.lock();
            let Some(id) = resolve_effect(&chain, &target) else {
                println!("no effect '{target}'");
                return Flow::Continue;
            };
            let bypassed = chain.get(id).is_some_and(|e| e.is_bypassed());
            chain.set_bypass(id, !bypassed);
            println!("{id} {}", if bypassed { "active" } else { "bypassed" });
        }
        ConsoleCommand::FxSet {
            target,
            param,
            value,
        } => {
            let chain = host.controller().chain();
            let mut chain = chain.lock();
            match resolve_effect(&chain, &target) {
                Some(id) if chain.set_parameter(id, &param, value) => {
                    let current = chain.get(id).and_then(|e| e.get_parameters().get(&param).copied());
                    println!("{id}.{param} = {:.3}", current.unwrap_or(value));
                }
                Some(id) => println!("{id} has no parameter '{param}'"),
                None => println!("no effect '{target}'"),
            }
        }
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Quit => return Flow::Quit,
    }
    Flow::Continue
}

/// Find an effect by id (`fx3` or `3`) or by name.
fn resolve_effect(chain: &EffectsChain, target: &str) -> Option<EffectId> {
    let digits = target.strip_prefix("fx").unwrap_or(target);
    if let Ok(n) = digits.parse::<u64>() {
        return chain.ids().into_iter().find(|id| id.get() == n);
    }
    chain.find(target)
}

fn print_status(host: &Host) {
    let c = host.controller();
    let props = host.get_audio_properties();
    let track = c
        .current_path()
        .and_then(|p| p.file_name())
        .map_or_else(|| "-".to_string(), |n| n.to_string_lossy().into_owned());
    let duration = c
        .duration()
        .map_or_else(|| "--:--".to_string(), format_time);
    let metrics = c.metrics();
    println!(
        "[{}] {track}  {} / {duration}  ({props})",
        c.state().as_str(),
        format_time(c.position()),
    );
    println!(
        "volume {:.2}{}  repeat {}  shuffle {}  output {}{}",
        c.volume(),
        if c.is_muted() { " (muted)" } else { "" },
        c.playlist().repeat_mode().as_str(),
        if c.playlist().is_shuffle() { "on" } else { "off" },
        c.output_name(),
        if c.is_output_open() { "" } else { " (closed)" },
    );
    println!(
        "underruns {}  blocks {}  stale {}  tap dropped {}",
        metrics.underruns, metrics.blocks_produced, metrics.stale_discarded, metrics.tap_dropped
    );
}

pub fn format_time(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// Read stdin lines on a background thread. The channel closes at EOF.
pub fn spawn_stdin_reader() -> std::io::Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("flowstate-console".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("stdin read failed: {e}");
                        break;
                    }
                }
            }
            debug!("Console input closed");
        })?;
    Ok(rx)
}
