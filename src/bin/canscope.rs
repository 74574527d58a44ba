//! Terminal front end for canscope
//!
//! Prints the aggregation table and statistics once per statistics tick (or
//! the raw scroll log with `--raw`) and reads operator commands from stdin.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use canscope::input::{parse_length, parse_period};
use canscope::table::TABLE_HEADER;
use canscope::scroll_log::LOG_HEADER;
use canscope::types::{Frame, FrameFormat};
use canscope::{
    CanScope, Command, LinkState, LogEvent, LoopbackPeer, Monitor, MonitorChannels, MonitorConfig,
    StatSnapshot, TxForm,
};
use clap::Parser;
use futures::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CONSOLE_HELP: &str = "\
commands:
  filter <start|-> <end|-> on|off   set the receive range (hex, '-' keeps a bound)
  clear                             empty table and log, reset statistics
  id <hex> | ext on|off | rtr on|off | len <0-8> | data <hex bytes...>
                                    edit the transmit form
  form                              show the transmit form
  send                              send the form once
  rep <ms>                          send the form every <ms>
  rand <ms>                         send random frames every <ms>
  stop                              stop repeating transmissions
  params                            show bus parameters
  quit";

/// Monitor a CAN interface and generate traffic
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Monitor a CAN interface and generate traffic",
    after_help = "Virtual interface setup:\n  sudo modprobe vcan\n  sudo ip link add dev vcan0 type vcan\n  sudo ip link set up vcan0"
)]
struct Args {
    /// CAN interface; overrides the config file
    interface: Option<String>,

    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write diagnostics to this file instead of stderr
    #[arg(short = 'l', long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Print the scroll log instead of the table
    #[arg(long)]
    raw: bool,

    /// Run against an in-process bus fed with generated traffic
    #[arg(long)]
    demo: bool,

    /// Generated frames per second in demo mode
    #[arg(long, default_value_t = 200)]
    demo_rate: u32,
}

fn init_tracing(log_file: Option<&PathBuf>) -> Result<()> {
    let default = if log_file.is_some() { "canscope=debug" } else { "canscope=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    match log_file {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
            tracing_subscriber::fmt().with_env_filter(filter).with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_file.as_ref())?;

    let mut config = match &args.config {
        Some(path) => MonitorConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => MonitorConfig::default(),
    };
    if let Some(interface) = &args.interface {
        config.interface = interface.clone();
    }

    if args.demo {
        let (monitor, channels, peer) = CanScope::loopback(&config)?;
        let traffic = tokio::spawn(generate_traffic(peer, args.demo_rate));
        println!("Demo bus {} (type 'help' for commands)", config.interface);
        let result = run_console(&monitor, channels, None, args.raw).await;
        traffic.abort();
        return result;
    }

    let session = match CanScope::connect(&config).await {
        Ok(session) => session,
        Err(e) => {
            for suggestion in e.recovery_suggestions() {
                eprintln!("  - {suggestion}");
            }
            bail!("cannot monitor {}: {e}", config.interface);
        }
    };
    info!(interface = %config.interface, "Connected");
    println!("Interface {}\n{}", config.interface, session.parameters);
    let parameters = session.parameters.to_string();
    run_console(&session.monitor, session.channels, Some(parameters), args.raw).await
}

async fn run_console(
    monitor: &Monitor,
    mut channels: MonitorChannels,
    parameters: Option<String>,
    raw: bool,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stats = channels.stat_updates();
    let mut stdin_open = true;

    if raw {
        println!("{LOG_HEADER}");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line.context("reading stdin")? else {
                    stdin_open = false;
                    continue;
                };
                match parse_console_line(&line, &monitor.form()) {
                    Ok(Console::Quit) => break,
                    Ok(Console::Help) => println!("{CONSOLE_HELP}"),
                    Ok(Console::ShowForm) => println!("{:?}", monitor.form()),
                    Ok(Console::Params) => match &parameters {
                        Some(text) => println!("{text}"),
                        None => println!("virtual bus, no parameters"),
                    },
                    Ok(Console::Nothing) => {}
                    Ok(Console::Run(command)) => {
                        if let Err(e) = monitor.execute(command).await {
                            println!("rejected: {e}");
                        }
                    }
                    Err(message) => println!("{message}"),
                }
            }
            Some(event) = channels.log.recv() => {
                if raw {
                    match event {
                        LogEvent::Chunk(text) => print!("{text}"),
                        LogEvent::Cleared => println!("\n--- cleared ---"),
                    }
                }
            }
            Some(snapshot) = stats.next() => {
                if !raw {
                    print_screen(&channels, &snapshot);
                }
            }
            Ok(()) = channels.link.changed() => {
                match *channels.link.borrow_and_update() {
                    LinkState::Connected => println!("link restored"),
                    LinkState::Reconnecting { attempt } => println!("link lost, reconnecting (attempt {attempt})"),
                    LinkState::Lost => {
                        warn!("Link lost for good");
                        println!("link lost");
                    }
                }
            }
        }
    }

    monitor.execute(Command::Stop).await.ok();
    monitor.shutdown();
    Ok(())
}

fn print_screen(channels: &MonitorChannels, snapshot: &StatSnapshot) {
    let table = channels.table.borrow().clone();
    let tx = if *channels.tx_active.borrow() { "TX *" } else { "TX" };
    println!("\n{TABLE_HEADER}");
    for line in table.lines() {
        println!("{line}");
    }
    println!("\n{snapshot}\n{tx}");
}

#[derive(Debug, PartialEq)]
enum Console {
    Run(Command),
    ShowForm,
    Params,
    Help,
    Quit,
    Nothing,
}

fn on_off(word: Option<&str>) -> Result<bool, String> {
    match word {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        _ => Err("expected on|off".to_string()),
    }
}

fn period_arg(word: Option<&str>) -> Result<Duration, String> {
    parse_period(word.unwrap_or("")).map_err(|e| e.to_string())
}

fn edit(form: &TxForm, change: impl FnOnce(&mut TxForm)) -> Console {
    let mut next = form.clone();
    change(&mut next);
    Console::Run(Command::EditForm(next))
}

fn parse_console_line(line: &str, form: &TxForm) -> Result<Console, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(Console::Nothing);
    };
    let console = match verb {
        "quit" | "exit" => Console::Quit,
        "help" => Console::Help,
        "form" => Console::ShowForm,
        "params" => Console::Params,
        "clear" => Console::Run(Command::Clear),
        "send" => Console::Run(Command::SendOnce),
        "stop" => Console::Run(Command::Stop),
        "rep" => Console::Run(Command::StartPeriodic { period: period_arg(words.next())? }),
        "rand" => Console::Run(Command::StartRandomized { period: period_arg(words.next())? }),
        "filter" => {
            let bound = |word: Option<&str>| match word {
                Some("-") | None => String::new(),
                Some(text) => text.to_string(),
            };
            let start = bound(words.next());
            let end = bound(words.next());
            let enabled = on_off(words.next())?;
            Console::Run(Command::SetFilter { start, end, enabled })
        }
        "id" => {
            let id = words.next().unwrap_or("").to_string();
            edit(form, |form| form.id = id)
        }
        "ext" => {
            let format = if on_off(words.next())? { FrameFormat::Extended } else { FrameFormat::Standard };
            edit(form, |form| form.format = format)
        }
        "rtr" => {
            let remote = on_off(words.next())?;
            edit(form, |form| form.remote = remote)
        }
        "len" => {
            let text = words.next().unwrap_or("");
            parse_length(text).map_err(|e| e.to_string())?;
            edit(form, |form| form.length = text.to_string())
        }
        "data" => {
            let bytes: Vec<&str> = words.collect();
            if bytes.len() > 8 {
                return Err("at most 8 data bytes".to_string());
            }
            edit(form, |form| {
                for (slot, text) in form.data.iter_mut().zip(bytes.iter().chain(std::iter::repeat(&""))) {
                    *slot = text.to_string();
                }
            })
        }
        other => return Err(format!("unknown command '{other}', try 'help'")),
    };
    Ok(console)
}

/// Feed the demo bus with recurring identifiers and the odd error frame.
async fn generate_traffic(peer: LoopbackPeer, rate: u32) {
    let mut rng = StdRng::from_entropy();
    let ids: Vec<(FrameFormat, u32)> = (0..16)
        .map(|i| {
            if i % 4 == 0 {
                (FrameFormat::Extended, rng.gen_range(0..0x2000_0000))
            } else {
                (FrameFormat::Standard, rng.gen_range(0..0x800))
            }
        })
        .collect();

    let sink = peer.clone();
    tokio::spawn(async move { while sink.next_sent().await.is_some() {} });

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(rate.max(1))));
    loop {
        ticker.tick().await;
        let (format, id) = ids[rng.gen_range(0..ids.len())];
        let frame = match rng.gen_range(0..100) {
            0 => Ok(Frame::error(0x04)),
            1..=4 => Frame::remote(format, id, rng.gen_range(0..=8)),
            _ => {
                let len = rng.gen_range(0..=8usize);
                let mut payload = [0u8; 8];
                rng.fill(&mut payload[..len]);
                Frame::data(format, id, &payload[..len])
            }
        };
        if let Ok(frame) = frame {
            peer.inject(frame);
        }
    }
}
