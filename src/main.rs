use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use study_voice::db::{self, GreetingRepo};
use study_voice::greeting::{GreetingGate, LocalClock};
use study_voice::shell::Shell;
use study_voice::voice::{MicInput, MicrophoneRecognizer, Pcm, SpeakerSink, SpeechToText};
use study_voice::{
    Config, CourseContext, HttpBackend, PerformanceSnapshot, Trend, VoiceController,
    select_emotion,
};

/// Study Voice - talk through your course material with an AI tutor
#[derive(Parser)]
#[command(name = "study-voice", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a voice session for a course
    Talk {
        /// Backend course identifier
        #[arg(short, long)]
        course: String,

        /// Course name used in the greeting
        #[arg(long)]
        course_name: Option<String>,

        /// Uploaded material to focus on
        #[arg(long)]
        upload: Option<String>,

        #[command(flatten)]
        performance: PerformanceArgs,
    },
    /// Print the emotion the tutor would use for a performance profile
    Emotion {
        #[command(flatten)]
        performance: PerformanceArgs,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

/// Performance override; when absent the backend's analytics are used
#[derive(Args, Default)]
struct PerformanceArgs {
    /// Overall quiz average (0-100)
    #[arg(long)]
    average: Option<f64>,

    /// Number of quizzes taken
    #[arg(long)]
    quizzes: Option<u32>,

    /// Recent trend: improving, declining or stable
    #[arg(long)]
    trend: Option<Trend>,

    /// Most recent quiz score
    #[arg(long)]
    last_score: Option<f64>,
}

impl PerformanceArgs {
    fn snapshot(&self) -> Option<PerformanceSnapshot> {
        if self.average.is_none()
            && self.quizzes.is_none()
            && self.trend.is_none()
            && self.last_score.is_none()
        {
            return None;
        }

        Some(PerformanceSnapshot {
            overall_average: self.average.unwrap_or_default(),
            total_quizzes_taken: self.quizzes.unwrap_or(1),
            recent_trend: self.trend.unwrap_or_default(),
            last_score: self.last_score,
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; RUST_LOG wins when set
    let filter = match cli.verbose {
        0 => "info,study_voice=info",
        1 => "info,study_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Talk {
            course,
            course_name,
            upload,
            performance,
        } => {
            let mut ctx = CourseContext::new(course);
            if let Some(name) = course_name {
                ctx = ctx.with_name(name);
            }
            if let Some(upload) = upload {
                ctx = ctx.with_upload(upload);
            }
            talk(ctx, &performance).await
        }
        Command::Emotion { performance } => {
            let snapshot = performance.snapshot();
            println!("{}", select_emotion(snapshot.as_ref()));
            Ok(())
        }
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Run an interactive voice session
async fn talk(course: CourseContext, performance: &PerformanceArgs) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    let pool = db::init(config.db_path())?;
    let gate = GreetingGate::new(
        Arc::new(GreetingRepo::new(pool)),
        Arc::new(LocalClock),
        config.user_id.clone(),
    );

    let backend = Arc::new(HttpBackend::from_config(&config.backend));

    let snapshot = match performance.snapshot() {
        Some(snapshot) => Some(snapshot),
        None => match backend.performance().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(error = %e, "performance unavailable, using default emotion");
                None
            }
        },
    };

    let stt = match config.api_keys.openai.take() {
        Some(key) => Some(SpeechToText::new_whisper(
            key,
            config.voice.stt_model.clone(),
            config.voice.language.clone(),
        )?),
        None => {
            tracing::warn!("OPENAI_API_KEY not set, speech capture unavailable");
            None
        }
    };

    let recognizer = MicrophoneRecognizer::new(stt, config.voice.max_utterance);
    let speaker = SpeakerSink::new()?;

    let controller = VoiceController::builder(Arc::new(recognizer), Arc::new(speaker), backend)
        .greeting_gate(gate)
        .performance(snapshot)
        .capture_timeout(config.voice.capture_timeout)
        .reply_timeout(config.voice.reply_timeout)
        .spawn();

    tracing::info!(course = %course.course_id, api = %config.backend.base_url, "starting voice session");
    Shell::new(controller, course).run().await?;
    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mic = MicInput::open()?;

    println!("Sample rate: {} Hz", mic.sample_rate());
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples: Vec<f32> = mic.frames().try_iter().flatten().collect();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
    }

    drop(mic);

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");

    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    SpeakerSink::new()?;

    let sample_rate = 24_000_u32;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {sample_rate} Hz...", samples.len());

    let pcm = Pcm {
        samples,
        sample_rate,
    };
    tokio::task::spawn_blocking(move || SpeakerSink::play_blocking(&pcm, &AtomicBool::new(false)))
        .await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");

    Ok(())
}
