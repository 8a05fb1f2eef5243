use std::sync::Arc;

use chrono::DateTime;
use tokio::io::{AsyncBufReadExt, BufReader};

use paloma::channels::{BridgeChannel, ConsoleChannel, MessageChannel};
use paloma::config::{ChannelKind, Settings};
use paloma::error::ScheduleError;
use paloma::generator::{ContentGenerator, OpenAiGenerator};
use paloma::orchestrator::{CycleOutcome, Orchestrator, SkipReason};
use paloma::scheduler::JobScheduler;
use paloma::speech::{ElevenLabsSynthesizer, SpeechSynthesizer};
use paloma::store::{ConversationStore, Direction, ExportFormat, MessageKind};

const TEXT_JOB: &str = "text-message";
const VOICE_JOB: &str = "voice-message";
const DAILY_JOB: &str = "daily-greeting";

enum LoopFlow {
    Continue,
    Quit,
}

#[tokio::main]
async fn main() -> paloma::error::Result<()> {
    // Initialize tracing; PALOMA_LOG_DIR switches output to a rolling file
    let _log_guard = init_tracing();

    let settings = Settings::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export PALOMA_CONTACT=<contact key on the messaging platform>");
        eprintln!("  export OPENAI_API_KEY=sk-...");
        std::process::exit(1);
    });

    eprintln!("🕊️ Paloma v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Contact: {}",
        settings
            .contact
            .display_name
            .as_deref()
            .unwrap_or(&settings.contact.key)
    );
    eprintln!("   Model: {}", settings.generation.model);
    eprintln!("   Store: {}", settings.store.path.display());

    // ── Store ────────────────────────────────────────────────────────────
    let store = Arc::new(
        ConversationStore::open(settings.store.path.clone(), settings.store.max_retained)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: failed to open store at {}: {}",
                    settings.store.path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );
    if let Some(name) = &settings.contact.display_name
        && let Err(e) = store.set_display_name(&settings.contact.key, name).await
    {
        eprintln!("   Warning: could not record display name: {e}");
    }

    // ── Channel ──────────────────────────────────────────────────────────
    let channel: Arc<dyn MessageChannel> = match settings.channel.kind {
        ChannelKind::Console => {
            eprintln!("   Channel: console (messages print locally)");
            Arc::new(ConsoleChannel::new())
        }
        ChannelKind::Bridge => {
            eprintln!("   Channel: bridge at {}", settings.channel.bridge_url);
            Arc::new(BridgeChannel::new(
                settings.channel.bridge_url.clone(),
                settings.channel.bridge_token.clone(),
            ))
        }
    };

    // ── Generation ───────────────────────────────────────────────────────
    let generator: Arc<dyn ContentGenerator> = Arc::new(OpenAiGenerator::new(&settings.generation));

    let synthesizer: Option<Arc<dyn SpeechSynthesizer>> = if settings.schedule.voice_enabled {
        match ElevenLabsSynthesizer::from_config(&settings.audio) {
            Some(synth) => {
                eprintln!("   Voice: enabled (voice {})", settings.audio.voice_id);
                Some(Arc::new(synth))
            }
            None => {
                eprintln!("   Voice: requested but ELEVENLABS_API_KEY not set, disabled");
                None
            }
        }
    } else {
        eprintln!("   Voice: disabled");
        None
    };
    let voice_ready = synthesizer.is_some();

    let contact = settings.contact.key.clone();
    let schedule = settings.schedule.clone();
    let orchestrator = Arc::new(Orchestrator::new(
        settings,
        Arc::clone(&store),
        channel,
        generator,
        synthesizer,
    ));

    // ── Jobs ─────────────────────────────────────────────────────────────
    let scheduler = Arc::new(JobScheduler::new());
    scheduler
        .schedule_recurring(
            TEXT_JOB,
            schedule.text_interval.as_secs(),
            orchestrator.scheduled(MessageKind::Text),
        )
        .await?;
    if voice_ready {
        scheduler
            .schedule_recurring(
                VOICE_JOB,
                schedule.voice_interval.as_secs(),
                orchestrator.scheduled(MessageKind::Voice),
            )
            .await?;
    }
    if let Some(hour) = schedule.daily_hour {
        scheduler
            .schedule_daily(DAILY_JOB, hour, orchestrator.scheduled(MessageKind::Text))
            .await?;
    }
    scheduler.start_all().await;
    for status in scheduler.all_statuses().await {
        eprintln!("   Job: {} ({})", status.name, status.spec);
    }

    eprintln!(
        "\n   Commands: send | voice | history [n] | status | export [json|text] | \
         every <secs> | pause | resume | clear | quit\n"
    );

    // ── Command loop ─────────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let flow = handle_command(
                            line.trim(),
                            &contact,
                            &orchestrator,
                            &scheduler,
                            &store,
                        )
                        .await;
                        if matches!(flow, LoopFlow::Quit) {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        eprintln!("   stdin error: {e}");
                        break;
                    }
                }
            }
        }
    }

    scheduler.shutdown().await;
    eprintln!("   Jobs stopped. Hasta pronto.");
    Ok(())
}

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    match std::env::var("PALOMA_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir.trim(), "paloma.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_target(false)
                .init();
            None
        }
    }
}

async fn handle_command(
    line: &str,
    contact: &str,
    orchestrator: &Arc<Orchestrator>,
    scheduler: &Arc<JobScheduler>,
    store: &Arc<ConversationStore>,
) -> LoopFlow {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return LoopFlow::Continue;
    };

    match command.trim_start_matches('/') {
        "send" => report_cycle(orchestrator.trigger_send(MessageKind::Text).await),
        "voice" => report_cycle(orchestrator.trigger_send(MessageKind::Voice).await),
        "history" => {
            let limit = parts.next().and_then(|raw| raw.parse().ok()).unwrap_or(10);
            let entries = store.recent_messages(contact, limit).await;
            if entries.is_empty() {
                println!("(no messages)");
            }
            for entry in entries {
                let stamp = DateTime::from_timestamp_millis(entry.timestamp)
                    .map(|ts| ts.format("%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                let arrow = match entry.direction {
                    Direction::Incoming => "←",
                    Direction::Outgoing => "→",
                };
                println!("{stamp} {arrow} {}", entry.body);
            }
        }
        "status" => {
            let stats = orchestrator.stats();
            println!(
                "sent: {} ({} voice), cycle errors: {}",
                stats.messages_sent, stats.voice_messages_sent, stats.cycle_errors
            );
            if let Some(at) = stats.last_sent {
                println!("last sent: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            for status in scheduler.all_statuses().await {
                let state = if status.running { "running" } else { "paused" };
                println!("job {}: {state} [{}]", status.name, status.spec);
            }
        }
        "export" => {
            let format = parts
                .next()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(ExportFormat::Json);
            match store.export(Some(contact), format).await {
                Ok(dump) => println!("{dump}"),
                Err(e) => eprintln!("   export failed: {e}"),
            }
        }
        "every" => match parts.next().and_then(|raw| raw.parse::<u64>().ok()) {
            Some(seconds) => match reschedule_text(scheduler, orchestrator, seconds).await {
                Ok(()) => println!("text job now fires every {seconds}s"),
                Err(e) => eprintln!("   reschedule failed: {e}"),
            },
            None => eprintln!("   usage: every <seconds>"),
        },
        "pause" => {
            scheduler.stop_all().await;
            println!("all jobs paused");
        }
        "resume" => {
            scheduler.start_all().await;
            println!("all jobs running");
        }
        "clear" => match store.clear(Some(contact)).await {
            Ok(()) => println!("conversation cleared"),
            Err(e) => eprintln!("   clear failed: {e}"),
        },
        "quit" | "exit" => return LoopFlow::Quit,
        other => eprintln!("   unknown command: {other}"),
    }
    LoopFlow::Continue
}

async fn reschedule_text(
    scheduler: &JobScheduler,
    orchestrator: &Arc<Orchestrator>,
    seconds: u64,
) -> Result<(), ScheduleError> {
    let _ = scheduler.remove(TEXT_JOB).await;
    scheduler
        .schedule_recurring(TEXT_JOB, seconds, orchestrator.scheduled(MessageKind::Text))
        .await?;
    scheduler.start(TEXT_JOB).await
}

fn report_cycle(result: Result<CycleOutcome, paloma::error::CycleError>) {
    match result {
        Ok(CycleOutcome::Sent { text, kind }) => match kind {
            MessageKind::Text => println!("✅ sent: {text}"),
            MessageKind::Voice => println!("✅ voice note sent: {text}"),
        },
        Ok(CycleOutcome::Skipped(SkipReason::ChannelNotReady)) => {
            println!("⏭️ channel not ready, nothing sent");
        }
        Err(e) => eprintln!("❌ {e}"),
    }
}
