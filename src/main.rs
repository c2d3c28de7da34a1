use anyhow::Result;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voxchat::backend::BackendClient;
use voxchat::config::Config;
use voxchat::messages::MessageStorage;
use voxchat::voice::{VoiceEvent, VoiceMode, VoiceState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voxchat=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let backend_url = std::env::var("VOXCHAT_BACKEND_URL")
        .unwrap_or_else(|_| "http://localhost:5000".to_string());
    let config = Config::new(backend_url);
    config.validate().map_err(anyhow::Error::msg)?;

    info!("Starting voxchat against {}", config.backend_url);

    let backend = BackendClient::new(config.backend_url.clone());
    let messages = MessageStorage::new();
    let (mut mode, events) = VoiceMode::new(backend, messages.clone(), config);

    println!("voxchat: type a message, /voice to toggle voice input,");
    println!("/mute to toggle the microphone, /quit to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_millis(50));
    let mut printed = 0;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let input = line.trim();

                match input {
                    "" => {}
                    "/quit" => break,
                    "/voice" => {
                        let result = if mode.state() == VoiceState::Listening {
                            mode.stop().await
                        } else {
                            mode.start().await
                        };
                        if let Err(e) = result {
                            eprintln!("{}", e.user_message());
                        }
                    }
                    "/mute" => match mode.toggle_mute() {
                        Some(true) => println!("(microphone muted)"),
                        Some(false) => println!("(microphone unmuted)"),
                        None => println!("(not listening)"),
                    },
                    text => {
                        if let Err(e) = mode.send_text(text).await {
                            eprintln!("{}", e.user_message());
                        }
                    }
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = mode.pump().await {
                    eprintln!("{}", e.user_message());
                }
            }
        }

        for event in events.try_iter() {
            match event {
                VoiceEvent::ListeningStarted => {
                    println!("Voice input activated. Speak to interact.")
                }
                VoiceEvent::ListeningStopped => println!("Voice input deactivated."),
                VoiceEvent::PendingTranscript(text) if !text.is_empty() => {
                    println!("[listening] {}", text)
                }
                VoiceEvent::Error(message) => eprintln!("{}", message),
                _ => {}
            }
        }

        let all = messages.get_all();
        for message in &all[printed.min(all.len())..] {
            let who = if message.is_user { "You" } else { "AI" };
            println!("{}: {}", who, message.text);
        }
        printed = all.len();
    }

    mode.stop().await.ok();
    info!("Shutting down");
    Ok(())
}
