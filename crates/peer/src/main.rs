mod config;
mod events;
mod peer;
mod simulation;
mod tui;

use std::io;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use netplay::{
    DEFAULT_NETWORK_DELAY, DEFAULT_PORT, Episodes, HaltReason, NetConfig, NetError,
    PacketLossSimulation,
};

use config::PeerConfig;
use events::PeerEvent;
use peer::{LockstepPeer, PeerTransport};
use tui::EventLog;

#[derive(Parser)]
#[command(name = "netplay-peer")]
#[command(about = "One side of a two-player lockstep session")]
struct Args {
    #[arg(short, long, default_value_t = DEFAULT_PORT, help = "Local UDP port")]
    local_port: u16,

    #[arg(short = 'H', long, default_value = "localhost", help = "Opponent host")]
    host: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT, help = "Opponent UDP port")]
    port: u16,

    #[arg(short, long, default_value = "")]
    name: String,

    #[arg(long, default_value_t = 1, help = "Player number, must differ from the opponent's")]
    player: u16,

    #[arg(short, long, default_value_t = DEFAULT_NETWORK_DELAY, help = "Network delay in ticks")]
    delay: u16,

    #[arg(long, default_value_t = Episodes::all().bits(), help = "Bit mask of playable episodes")]
    episodes: u16,

    #[arg(short, long, default_value_t = 35)]
    tick_rate: u32,

    #[arg(long, help = "Quit after this many ticks")]
    ticks: Option<u32>,

    #[arg(long)]
    headless: bool,

    #[arg(long, default_value_t = 0.0, help = "Outbound packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, help = "Seed for the packet loss simulation")]
    loss_seed: Option<u64>,
}

impl Args {
    fn into_config(self) -> PeerConfig {
        PeerConfig {
            net: NetConfig {
                local_port: self.local_port,
                opponent_host: self.host,
                opponent_port: self.port,
                player_name: self.name,
                player_number: self.player,
                network_delay: self.delay,
                episodes: Episodes::from_bits_truncate(self.episodes),
            },
            tick_rate: self.tick_rate,
            max_ticks: self.ticks,
            packet_loss: PacketLossSimulation {
                seed: self.loss_seed,
                ..PacketLossSimulation::with_loss(self.loss_percent)
            },
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let headless = args.headless;
    let config = args.into_config();

    if headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let mut peer = LockstepPeer::open(&config)?;

    if headless {
        log::info!("Peer listening on port {}", peer.local_port());
        if let Some(reason) = run_headless(&mut peer, &config) {
            log::info!("Halt {}: {}", reason.code(), reason);
            if reason.is_abnormal() {
                std::process::exit(i32::from(reason.code()));
            }
        }
    } else {
        run_with_tui(&mut peer, &config)?;
    }

    Ok(())
}

fn log_events(peer: &mut LockstepPeer<PeerTransport>) {
    for event in peer.drain_events() {
        match event {
            PeerEvent::Connected { opponent, episodes } => {
                log::info!("Connected to {} (episodes {:?})", opponent, episodes);
            }
            PeerEvent::Details { tick } => log::info!("Opponent details at tick {}", tick),
            PeerEvent::Desync { tick, reason } => log::warn!("Desync at tick {}: {}", tick, reason),
            PeerEvent::Halted { reason } => log::info!("Halted: {}", reason),
            PeerEvent::Error { message } => log::error!("{}", message),
        }
    }
}

fn halt_reason(err: &NetError) -> HaltReason {
    err.halt_reason().unwrap_or(HaltReason::ConnectionFailed)
}

fn reached_limit(peer: &LockstepPeer<PeerTransport>, config: &PeerConfig) -> bool {
    config.max_ticks.is_some_and(|limit| peer.tick() >= limit)
}

fn run_headless(peer: &mut LockstepPeer<PeerTransport>, config: &PeerConfig) -> Option<HaltReason> {
    let connected = peer.connect(|| false);
    log_events(peer);
    if let Err(e) = connected {
        return Some(halt_reason(&e));
    }

    let tick_duration = config.tick_duration();
    loop {
        let started = Instant::now();

        if reached_limit(peer, config) {
            let reason = halt_reason(&peer.quit());
            log_events(peer);
            return Some(reason);
        }

        let result = peer.tick_once();
        log_events(peer);
        if let Err(e) = result {
            if e.is_fatal() {
                return Some(halt_reason(&e));
            }
        }

        std::thread::sleep(tick_duration.saturating_sub(started.elapsed()));
    }
}

fn record_events(peer: &mut LockstepPeer<PeerTransport>, log: &mut EventLog) {
    for event in peer.drain_events() {
        match event {
            PeerEvent::Connected { opponent, episodes } => {
                log.info(format!("Connected to {} (episodes {:?})", opponent, episodes));
            }
            PeerEvent::Details { tick } => log.info(format!("Opponent details at tick {}", tick)),
            PeerEvent::Desync { tick, reason } => {
                log.warn(format!("Desync at tick {}: {}", tick, reason));
            }
            PeerEvent::Halted { reason } => log.error(format!("Halted: {}", reason)),
            PeerEvent::Error { message } => log.error(message),
        }
    }
}

fn key_pressed(timeout: Duration) -> io::Result<Option<KeyCode>> {
    if event::poll(timeout)? {
        if let Event::Key(key) = event::read()? {
            if key.kind == KeyEventKind::Press {
                return Ok(Some(key.code));
            }
        }
    }
    Ok(None)
}

fn run_with_tui(peer: &mut LockstepPeer<PeerTransport>, config: &PeerConfig) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut log = EventLog::default();
    log.info(format!("Listening on port {}", peer.local_port()));

    let target = format!("{}:{}", config.net.opponent_host, config.net.opponent_port);
    let halt = run_session(peer, config, &mut terminal, &mut log, &target);

    if let Some(reason) = halt {
        if reason.is_abnormal() {
            terminal.draw(|frame| tui::render_halt(frame, reason))?;
            while key_pressed(Duration::from_millis(100))?.is_none() {}
        }
    }

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}

fn run_session(
    peer: &mut LockstepPeer<PeerTransport>,
    config: &PeerConfig,
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    log: &mut EventLog,
    target: &str,
) -> Option<HaltReason> {
    let connected = peer.connect(|| {
        let _ = terminal.draw(|frame| tui::render_waiting(frame, target, log));
        matches!(key_pressed(Duration::ZERO), Ok(Some(KeyCode::Esc)))
    });
    record_events(peer, log);
    if let Err(e) = connected {
        return Some(halt_reason(&e));
    }

    let tick_duration = config.tick_duration();
    loop {
        let started = Instant::now();

        if reached_limit(peer, config) {
            return Some(halt_reason(&peer.quit()));
        }

        let result = peer.tick_once();
        record_events(peer, log);
        if let Err(e) = result {
            if e.is_fatal() {
                return Some(halt_reason(&e));
            }
        }

        let stats = peer.stats();
        let _ = terminal.draw(|frame| tui::render(frame, &stats, log));

        let remaining = tick_duration.saturating_sub(started.elapsed());
        match key_pressed(remaining) {
            Ok(Some(KeyCode::Char('q') | KeyCode::Esc)) => {
                return Some(halt_reason(&peer.quit()));
            }
            Ok(Some(KeyCode::Char('d'))) => {
                if let Err(e) = peer.send_details() {
                    log.warn(format!("Details not sent: {}", e));
                }
            }
            Ok(_) => {}
            Err(e) => log.error(format!("Input error: {}", e)),
        }
    }
}
