use clap::Parser;
use log::{error, info, warn};
use mpdsession::config::SessionConfig;
use mpdsession::logging::LoggingConfig;
use mpdsession::{ChangeEvent, PlaybackMode, PlaybackState, Session, SessionListener};
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

/// Watch and control an MPD server from the terminal
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// MPD host, overrides the config file
    #[clap(long)]
    host: Option<String>,

    /// MPD port, overrides the config file
    #[clap(short, long)]
    port: Option<u16>,

    /// Connect and command timeout in milliseconds
    #[clap(short, long)]
    timeout: Option<u64>,

    /// JSON configuration file with an "mpd" section
    #[clap(short, long, value_parser)]
    config: Option<PathBuf>,

    /// JSON logging configuration file
    #[clap(long, value_parser)]
    log_config: Option<PathBuf>,

    /// Wait for changes with MPD's idle command instead of polling
    #[clap(long)]
    idle: bool,

    /// Append these URIs to the queue after connecting
    #[clap(short, long)]
    add: Vec<String>,

    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,
}

/// Logs every event the session reports
struct EventLogger {
    name: String,
}

impl EventLogger {
    fn new(name: &str) -> Self {
        Self { name: name.to_string() }
    }
}

impl SessionListener for EventLogger {
    fn on_event(&self, event: &ChangeEvent) {
        match event {
            ChangeEvent::SongChanged(Some(track)) => info!(
                "[{}] Song changed: {} by {}",
                self.name,
                track.display_name(),
                track.artist.as_deref().unwrap_or("Unknown")
            ),
            ChangeEvent::ElapsedChanged(_) => {}
            other => info!("[{}] {}", self.name, other),
        }
    }

    fn on_connection_lost(&self) {
        warn!("[{}] Connection to MPD lost", self.name);
    }
}

fn load_config(args: &Args) -> SessionConfig {
    let mut config = match &args.config {
        Some(path) => SessionConfig::from_file(path).unwrap_or_else(|e| {
            eprintln!("{}", e);
            process::exit(1);
        }),
        None => SessionConfig::default(),
    };

    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_ms = timeout;
    }
    if args.idle {
        config.wait_strategy = "idle".to_string();
    }
    config
}

fn next_mode(mode: PlaybackMode) -> PlaybackMode {
    match mode {
        PlaybackMode::Normal => PlaybackMode::Repeat,
        PlaybackMode::Repeat => PlaybackMode::Random,
        PlaybackMode::Random => PlaybackMode::RandomRepeat,
        PlaybackMode::RandomRepeat => PlaybackMode::Normal,
    }
}

fn handle_key(session: &Session, key: u8, running: &AtomicBool) {
    match key {
        b' ' => match session.status().map(|s| s.state) {
            Some(PlaybackState::Playing) => {
                session.pause();
            }
            _ => {
                session.play(None);
            }
        },
        b'n' | b'N' => {
            session.next();
        }
        b'p' | b'P' => {
            session.previous();
        }
        b's' | b'S' => {
            session.stop();
        }
        b'r' | b'R' => {
            if let Some(status) = session.status() {
                let mode = next_mode(status.mode);
                info!("Switching mode to {}", mode);
                session.set_mode(mode);
            }
        }
        b'+' | b'-' => {
            if let Some(volume) = session.status().and_then(|s| s.volume) {
                let volume = if key == b'+' { volume.saturating_add(5) } else { volume.saturating_sub(5) };
                session.set_volume(volume);
            }
        }
        b'q' | b'Q' => running.store(false, Ordering::SeqCst),
        _ => {}
    }
}

fn main() {
    let args = Args::parse();

    let mut log_config = match &args.log_config {
        Some(path) => LoggingConfig::from_file(path).unwrap_or_else(|e| {
            eprintln!("{}", e);
            LoggingConfig::default()
        }),
        None => LoggingConfig::default(),
    };
    if args.debug {
        log_config.level = "debug".to_string();
    }
    if let Err(e) = log_config.initialize_logger() {
        eprintln!("{}", e);
    }

    let config = load_config(&args);
    let session = Arc::new(Session::from_config(&config));

    let event_logger = Arc::new(EventLogger::new("mpd"));
    let weak_logger = Arc::downgrade(&event_logger) as Weak<dyn SessionListener>;
    session.register_listener(weak_logger);

    if let Err(e) = session.connect_with(&config.connection_params()) {
        error!("Could not connect to MPD at {}:{}: {}", config.host, config.port, e);
        process::exit(1);
    }

    for uri in &args.add {
        match session.append_or_insert(uri, None) {
            Some(added) => info!("Queued {} as {} at position {}", uri, added.id, added.position),
            None => warn!("Could not queue {}", uri),
        }
    }

    if let Some(song) = session.current_song() {
        info!("Current song: {}", song);
    }
    info!("Queue has {} entries", session.queue().len());

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, shutting down...");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Could not install Ctrl+C handler: {}", e);
    }

    println!("Keyboard controls (press Enter after each key):");
    println!("  Space: Play/Pause   n: Next   p: Previous   s: Stop");
    println!("  r: Cycle mode   +/-: Volume   q: Quit");

    let keyboard_session = session.clone();
    let keyboard_running = running.clone();
    thread::spawn(move || {
        let mut stdin = io::stdin();
        let mut buffer = [0; 1];
        while keyboard_running.load(Ordering::SeqCst) {
            match stdin.read(&mut buffer) {
                Ok(1) => handle_key(&keyboard_session, buffer[0], &keyboard_running),
                // EOF on stdin, keep running until Ctrl+C
                Ok(_) => break,
                Err(_) => thread::sleep(Duration::from_millis(10)),
            }
        }
    });

    while running.load(Ordering::SeqCst) {
        session.dispatch_events();
        if !session.is_connected() {
            error!("Session ended, exiting");
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }

    session.disconnect();
    info!("Exiting application");
}
