use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use skylark_voice::audio::{self, AudioCapture, AudioPlayback, PLAYBACK_SAMPLE_RATE};
use skylark_voice::capture::calibrate;
use skylark_voice::{
    Capabilities, CaptureManager, Config, CpalSink, DialogueClient, DialogueService,
    EspeakFallback, Language, Phase, SessionEvent, Speaker, SpeechSynthesizer, SynthesisService,
    TranscriptionService, TurnController, WhisperTranscriber,
};

/// Skylark - hands-free voice turn-taking controller
#[derive(Parser)]
#[command(name = "skylark", version, about)]
struct Cli {
    /// Path to a config file (default: ~/.config/skylark/config.toml)
    #[arg(short, long, env = "SKYLARK_CONFIG")]
    config: Option<PathBuf>,

    /// Speaker name for this session
    #[arg(long)]
    name: Option<String>,

    /// Speaker age, so replies stay age-appropriate
    #[arg(long)]
    age: Option<u8>,

    /// Conversation mode hint, e.g. "chat" or "study"
    #[arg(long)]
    mode: Option<String>,

    /// What the speaker wants out of the session
    #[arg(long)]
    objective: Option<String>,

    /// Session language tag (en-US or vi-VN)
    #[arg(short, long)]
    language: Option<String>,

    /// Skip streaming recognition even when a key is configured
    #[arg(long)]
    endpointing: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test speech synthesis end to end
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Measure ambient noise and print the derived voice threshold
    Calibrate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,skylark_voice=info",
        1 => "info,skylark_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
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
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(cli.config.as_deref(), &text).await,
            Command::Calibrate => calibrate_mic(cli.config.as_deref()).await,
        };
    }

    let mut config = Config::load(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli)?;

    let capabilities = Capabilities::detect(&config.api_keys);
    if !capabilities.microphone {
        anyhow::bail!("no microphone detected; check your input devices");
    }
    let Some(openai_key) = config.api_keys.openai.clone() else {
        anyhow::bail!("OPENAI_API_KEY is required for synthesis and transcription");
    };

    tracing::info!(
        language = %config.language,
        streaming = capabilities.streaming_recognition,
        "starting voice session"
    );

    let dialogue: Arc<dyn DialogueService> =
        Arc::new(DialogueClient::new(config.dialogue.base_url.clone()));
    let synthesis: Arc<dyn SynthesisService> =
        Arc::new(SpeechSynthesizer::new(openai_key.clone(), config.speech.clone())?);
    let fallback =
        EspeakFallback::locate().map(|engine| Arc::new(engine) as Arc<dyn SynthesisService>);
    if fallback.is_none() {
        tracing::warn!("espeak-ng not found; no local synthesis fallback");
    }
    let transcriber: Arc<dyn TranscriptionService> = Arc::new(WhisperTranscriber::new(
        openai_key,
        config.transcription.model.clone(),
        config.transcription.base_url.clone(),
    )?);

    let speaker = Speaker::new(
        synthesis,
        fallback,
        Box::new(CpalSink::new()?),
        config.speech.chunk_chars,
    );

    let (capture_tx, capture_rx) = tokio::sync::mpsc::unbounded_channel();
    let capture = CaptureManager::new(
        config.tuning,
        config.realtime.clone(),
        config.api_keys.deepgram.clone(),
        transcriber,
        capture_tx,
    );

    let (mut controller, mut events) = TurnController::new(
        config.profile.clone(),
        config.tuning,
        config.language,
        dialogue,
        speaker,
        Box::new(capture),
        capture_rx,
    );

    let cancel = controller.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            cancel.cancel();
        }
    });

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::UserUtterance(text) => println!("you     > {text}"),
                SessionEvent::SystemUtterance(text) => println!("skylark > {text}"),
                SessionEvent::StatusChange(Phase::Listening) => println!("[listening]"),
                SessionEvent::StatusChange(_) => {}
            }
        }
    });

    println!("Skylark voice session. Press Ctrl-C to stop.\n");
    controller.run().await?;
    println!("\nSession ended.");

    Ok(())
}

fn apply_overrides(config: &mut Config, cli: &Cli) -> anyhow::Result<()> {
    if let Some(name) = &cli.name {
        config.profile.name = Some(name.clone());
    }
    if let Some(age) = cli.age {
        config.profile.age = Some(age);
    }
    if let Some(mode) = &cli.mode {
        config.profile.mode = Some(mode.clone());
    }
    if let Some(objective) = &cli.objective {
        config.profile.objective = Some(objective.clone());
    }
    if let Some(tag) = &cli.language {
        config.language = Language::from_tag(tag).ok_or_else(|| {
            anyhow::anyhow!("unknown language tag {tag:?} (expected en-US or vi-VN)")
        })?;
    }
    if cli.endpointing {
        config.realtime.force_endpointing = true;
    }
    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;
    let handle = capture.handle();

    let sample_rate = capture.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = handle.take();
        let energy = audio::rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working.");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new()?;

    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (PLAYBACK_SAMPLE_RATE as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {PLAYBACK_SAMPLE_RATE} Hz...", samples.len());
    playback.play(samples, &CancellationToken::new()).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working.");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Test speech synthesis through the playback sequencer
#[allow(clippy::future_not_send)]
async fn test_tts(config_path: Option<&Path>, text: &str) -> anyhow::Result<()> {
    println!("Testing synthesis with: \"{text}\"\n");

    let config = Config::load(config_path)?;
    let Some(api_key) = config.api_keys.openai.clone() else {
        anyhow::bail!("OPENAI_API_KEY is required for synthesis");
    };

    let synthesis: Arc<dyn SynthesisService> =
        Arc::new(SpeechSynthesizer::new(api_key, config.speech.clone())?);
    let fallback =
        EspeakFallback::locate().map(|engine| Arc::new(engine) as Arc<dyn SynthesisService>);

    let speaker = Speaker::new(
        synthesis,
        fallback,
        Box::new(CpalSink::new()?),
        config.speech.chunk_chars,
    );

    println!("Synthesizing and playing...");
    speaker
        .speak(text, config.language, &CancellationToken::new())
        .await?;

    println!("\nIf you heard the speech, synthesis is working.");
    Ok(())
}

/// Measure ambient noise and print the derived voice threshold
#[allow(clippy::future_not_send)]
async fn calibrate_mic(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let tuning = config.tuning;

    println!(
        "Sampling ambient noise for {}ms. Stay quiet...",
        tuning.calibration_ms
    );

    let mut capture = AudioCapture::new()?;
    capture.start()?;
    let handle = capture.handle();
    let calibration = calibrate(&handle, capture.sample_rate(), &tuning).await;
    capture.stop();

    println!("\nnoise floor:     {:.5}", calibration.noise_floor);
    println!("voice threshold: {:.5}", calibration.voice_threshold);
    println!("\nSpeech should land well above the threshold when you talk at a");
    println!("normal volume; if it does not, lower tuning.threshold_multiplier");
    println!("in your config file.");

    Ok(())
}
