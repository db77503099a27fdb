use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use remixbot::audio::codec::{Codec, WavCodec};
use remixbot::audio::{EffectParameters, Reverb};
use remixbot::bot::{AudioMetadata, Bot, BotSettings, Event, RankedEntry, Transport, TransportError};
use remixbot::db::models::VoteOutcome;
use remixbot::session::registry::{SessionRegistry, SystemClock};
use remixbot::{TrackId, UserId};

#[derive(Parser)]
#[command(name = "remixbot", version, about = "Slowed + reverb remix bot with a likes leaderboard")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Talk to the bot on the console (/start, /upload <path>, /process, /cancel, /top, /like <id>)
    Chat {
        /// User id to chat as
        #[arg(short, long, default_value = "1")]
        user: UserId,
    },

    /// Run the effects chain on a single file
    Process {
        /// Input audio (WAV or FLAC)
        input: PathBuf,

        /// Output WAV file
        output: PathBuf,

        /// Playback speed (0.1-2.0)
        #[arg(long, default_value = "0.8")]
        speed: f64,

        /// Echo delay in milliseconds (10-1000)
        #[arg(long, default_value = "150")]
        delay: f64,

        /// Echo level (0-1)
        #[arg(long, default_value = "0.4")]
        decay: f64,

        /// Bass gain in dB (-20 to 20)
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        bass: f64,
    },

    /// Show the most liked tracks
    Top {
        /// Number of results (defaults to config top_limit)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Like a track on behalf of a user
    Vote {
        /// Voting user id
        #[arg(short, long)]
        user: UserId,

        /// Track id
        track: TrackId,
    },

    /// Show leaderboard statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = remixbot::config::AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .clone()
        .or(config.db_path.clone())
        .unwrap_or_else(remixbot::config::default_db_path);
    let open_db = || {
        log::info!("Database: {}", db_path.display());
        remixbot::db::Database::open(&db_path).context("Failed to open database")
    };

    match cli.command {
        Commands::Chat { user } => {
            let output_dir = config.resolve_output_dir();
            std::fs::create_dir_all(&output_dir)
                .with_context(|| format!("Failed to create {}", output_dir.display()))?;
            let sessions = SessionRegistry::new(Arc::new(SystemClock), config.idle_timeout());
            let mut bot = Bot::new(
                ConsoleTransport::new(output_dir),
                WavCodec,
                open_db()?,
                sessions,
                BotSettings::from_config(&config),
            )
            .context("Failed to start render pool")?;
            chat(&mut bot, user)?;
        }

        Commands::Process {
            input,
            output,
            speed,
            delay,
            decay,
            bass,
        } => process_file(&input, &output, speed, delay, decay, bass)?,

        Commands::Top { limit } => {
            let limit = limit.unwrap_or(config.leaderboard.top_limit);
            let ranked = open_db()?.top_tracks(limit).context("Leaderboard query failed")?;
            if ranked.is_empty() {
                println!("No tracks yet.");
                return Ok(());
            }
            println!(
                "{:>4}  {:>6}  {:>6}  {:<24}  {}",
                "Rank", "Track", "Likes", "Title", "Media"
            );
            for r in &ranked {
                println!(
                    "{:>4}  {:>6}  {:>6}  {:<24}  {}",
                    r.rank,
                    r.track.id,
                    r.track.like_count,
                    truncate(r.track.title.as_deref().unwrap_or("-"), 24),
                    r.track.audio_ref
                );
            }
        }

        Commands::Vote { user, track } => {
            let db = open_db()?;
            match db.vote(user, track).context("Vote failed")? {
                VoteOutcome::Accepted => {
                    let likes = db.vote_count(track).context("Failed to count votes")?;
                    println!("Liked track #{track} ({likes} likes)");
                }
                VoteOutcome::AlreadyVoted => println!("User {user} already liked track #{track}"),
            }
        }

        Commands::Stats => {
            let stats = open_db()?.stats().context("Failed to get stats")?;
            println!("Leaderboard Statistics");
            println!("======================");
            println!("Published tracks: {}", stats.total_tracks);
            println!("Total likes:      {}", stats.total_votes);
            println!("Distinct authors: {}", stats.distinct_owners);
        }
    }

    Ok(())
}

fn process_file(
    input: &Path,
    output: &Path,
    speed: f64,
    delay: f64,
    decay: f64,
    bass: f64,
) -> Result<()> {
    let reverb = Reverb::new(delay, decay)
        .with_context(|| format!("Echo out of range: delay {delay} ms, level {decay}"))?;
    let params = EffectParameters::new(speed, reverb, bass)
        .with_context(|| format!("Parameters out of range: speed {speed}, bass {bass} dB"))?;

    let bytes =
        std::fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let source = WavCodec
        .decode(&bytes)
        .with_context(|| format!("Failed to decode {}", input.display()))?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed}]")?);
    pb.set_message(format!("Rendering {}", input.display()));
    pb.enable_steady_tick(Duration::from_millis(100));

    let rendered = remixbot::bot::worker::render(&source, &params, &WavCodec);
    pb.finish_and_clear();
    let rendered = rendered.context("Render failed")?;

    std::fs::write(output, &rendered.bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!(
        "Wrote {} ({} ms -> {} ms)",
        output.display(),
        source.duration_ms(),
        rendered.duration_ms
    );
    Ok(())
}

/// Read commands from stdin until EOF, waiting out each render before the next prompt.
fn chat(bot: &mut Bot<ConsoleTransport, WavCodec>, user: UserId) -> Result<()> {
    println!("Chatting as user {user}. Try /start, then /upload <path>.");
    for line in std::io::stdin().lock().lines() {
        let line = line.context("Failed to read stdin")?;
        let Some(event) = parse_line(user, &line) else {
            continue;
        };
        bot.handle(event)?;
        wait_for_render(bot, user)?;
        bot.poll_completions()?;
    }
    Ok(())
}

fn wait_for_render(bot: &mut Bot<ConsoleTransport, WavCodec>, user: UserId) -> Result<()> {
    let rendering = |bot: &Bot<ConsoleTransport, WavCodec>| {
        bot.sessions()
            .lookup(user)
            .is_some_and(|s| s.processing_ticket().is_some())
    };
    if !rendering(bot) {
        return Ok(());
    }

    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(Duration::from_millis(100));
    while rendering(bot) {
        if !bot.wait_for_completion(Duration::from_secs(600))? {
            log::warn!("Render for user {} is taking too long", user);
            break;
        }
    }
    pb.finish_and_clear();
    Ok(())
}

/// Map one console line to a bot event.
fn parse_line(user_id: UserId, line: &str) -> Option<Event> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (command, arg) = match line.split_once(char::is_whitespace) {
        Some((c, a)) => (c, a.trim()),
        None => (line, ""),
    };
    let event = match command {
        "/start" => Event::Start { user_id },
        "/process" => Event::Confirm { user_id },
        "/cancel" => Event::Cancel { user_id },
        "/top" => Event::TopRequest { user_id },
        "/like" => match arg.parse() {
            Ok(track_id) => Event::Vote { user_id, track_id },
            Err(_) => {
                println!("usage: /like <track id>");
                return None;
            }
        },
        "/upload" if !arg.is_empty() => {
            let path = Path::new(arg);
            Event::Upload {
                user_id,
                audio_ref: arg.to_string(),
                declared_size_bytes: std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
                file_name: path.file_name().map(|n| n.to_string_lossy().to_string()),
            }
        }
        "/upload" => {
            println!("usage: /upload <path>");
            return None;
        }
        _ => Event::Text {
            user_id,
            text: line.to_string(),
        },
    };
    Some(event)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}~")
    }
}

/// Local files in, rendered clips written to a directory, messages on stdout.
struct ConsoleTransport {
    output_dir: PathBuf,
    written: usize,
}

impl ConsoleTransport {
    fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            written: 0,
        }
    }
}

impl Transport for ConsoleTransport {
    fn fetch_media(&mut self, audio_ref: &str) -> Result<Vec<u8>, TransportError> {
        std::fs::read(audio_ref).map_err(|e| TransportError(format!("{audio_ref}: {e}")))
    }

    fn send_text(&mut self, _user_id: UserId, text: &str) -> Result<(), TransportError> {
        println!("bot> {}", text.replace('\n', "\n     "));
        Ok(())
    }

    fn send_audio(
        &mut self,
        user_id: UserId,
        audio: &[u8],
        metadata: &AudioMetadata,
    ) -> Result<String, TransportError> {
        self.written += 1;
        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        let path = self.output_dir.join(format!(
            "remix-{user_id}-{stamp}-{}.{}",
            self.written,
            WavCodec.extension()
        ));
        std::fs::write(&path, audio)
            .map_err(|e| TransportError(format!("{}: {e}", path.display())))?;
        println!(
            "bot> [audio] \"{}\" by {} ({} s) -> {}",
            metadata.title,
            metadata.performer,
            metadata.duration_secs,
            path.display()
        );
        Ok(path.to_string_lossy().to_string())
    }

    fn send_ranked_list(
        &mut self,
        _user_id: UserId,
        entries: &[RankedEntry],
    ) -> Result<(), TransportError> {
        println!("bot> Top tracks:");
        for e in entries {
            println!(
                "     {}. #{} ({} likes) {}   /like {}",
                e.rank, e.track_id, e.like_count, e.audio_ref, e.track_id
            );
        }
        Ok(())
    }
}
