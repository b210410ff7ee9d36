use clap::ArgMatches;
use std::sync::Arc;

use pillar_bot_core::{BotConfig, Lifecycle, RunExit, ShutdownHandle, StartupError};
use pillar_channel_adapter::{DirectoryClient, MattermostApiClient, MattermostEventStream};

pub async fn run(matches: &ArgMatches) {
    // Initialize tracing for structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config_path = matches
        .get_one::<String>("config")
        .expect("config has default value");

    let config = match BotConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ {}", e);
            eprintln!("  Expected a YAML file at {}", config_path);
            std::process::exit(1);
        }
    };
    println!("✓ Loaded configuration from {}", config_path);

    let client: Arc<dyn DirectoryClient> = match MattermostApiClient::new(&config.mattermost()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("✗ Failed to create the server client: {}", e);
            std::process::exit(1);
        }
    };

    let lifecycle = match Lifecycle::start(&config, client).await {
        Ok(lifecycle) => lifecycle,
        Err(e) => exit_with_diagnostics(&e),
    };
    let session = lifecycle.session();
    println!(
        "✓ Logged in as {} on team {}",
        session.identity.username, session.home_team.name
    );
    match session.monitored_channel.as_ref() {
        Some(channel) => println!("✓ Monitoring channel {}", channel.name),
        None => println!("⚠️  Monitored channel not found, events will be ignored"),
    }
    if session.debug_channel.is_none() {
        println!("⚠️  Debug channel unavailable, status goes to the log only");
    }

    let token = lifecycle.auth_token().unwrap_or_default();
    let url = match config.mattermost().websocket_url() {
        Ok(url) => url,
        Err(e) => exit_with_diagnostics(&StartupError::EventStream(e)),
    };
    let mut source = match MattermostEventStream::connect(&url, &token).await {
        Ok(source) => source,
        Err(e) => exit_with_diagnostics(&StartupError::EventStream(e)),
    };
    println!("✓ Listening for events");
    println!("\nPress Ctrl+C to stop the bot");

    let shutdown = ShutdownHandle::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for interrupt: {}", e);
                return;
            }
            if signal.trigger() {
                tracing::info!("Interrupt received, shutting down");
            } else {
                tracing::debug!("Shutdown already in progress");
            }
        }
    });

    let outcome = lifecycle.run(&mut source, &shutdown).await;
    lifecycle.stop(&mut source).await;

    match outcome.exit {
        RunExit::Shutdown => {
            println!(
                "\n✓ Bot stopped after {} event(s), {} join(s) handled",
                outcome.counts.events, outcome.counts.enrolled
            );
        }
        RunExit::StreamEnded => {
            eprintln!("\n✗ Event stream closed by the server");
            std::process::exit(1);
        }
    }
}

fn exit_with_diagnostics(error: &StartupError) -> ! {
    let diagnostics = error.diagnostics();
    eprintln!("✗ {}", diagnostics.message);
    eprintln!("  id: {}", diagnostics.error_id);
    eprintln!("  detail: {}", diagnostics.detail);
    std::process::exit(1);
}
