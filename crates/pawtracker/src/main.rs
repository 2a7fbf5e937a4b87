//! `pawtrack` - CLI for pawtracker
//!
//! This binary is the user-facing front end: it signs in, starts and stops
//! tracking, and shows what the tracker is doing.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

use pawtracker::cli::{Cli, Command, ConfigCommand, SendCommand, StatusCommand, TrackCommand};
use pawtracker::platform::{ReplayPlatform, ReplayPlatformConfig};
use pawtracker::sink::{HttpTransport, ReqwestTransport};
use pawtracker::{
    build_sink, init_logging, Config, Coordinate, DeliveryRecord, IdentityProvider, LocalIdentity,
    LocationPlatform, PasswordSignIn, Session, TrackingController, TrackingOptions, TrackingState,
    UserIdentity,
};
use pawtracker_replay::{ReplayConfig, Track, TrackReplayer};

/// Where the replay device sits when no track file is configured.
const HOME_POSITION: (f64, f64) = (4.6097, -74.0817);

/// How often `track` prints the last known position.
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    let load = || Config::load_from(cli.config.clone());

    // Execute the command
    match cli.command {
        Command::Track(track_cmd) => handle_track(load()?, track_cmd).await,
        Command::Status(status_cmd) => handle_status(&load()?, &status_cmd),
        Command::Stop => handle_stop(&load()?).await,
        Command::Send(send_cmd) => handle_send(load()?, &send_cmd).await,
        Command::Login => handle_login(&load()?).await,
        // loads on its own so that validation errors are reported, not raised
        Command::Config(config_cmd) => handle_config(cli.config.clone(), config_cmd),
    }
}

/// The identity provider selected by configuration.
///
/// Kept alive for as long as anything observes it.
#[derive(Debug)]
enum Identity {
    Password(PasswordSignIn),
    Local(LocalIdentity),
}

impl Identity {
    fn provider(&self) -> &dyn IdentityProvider {
        match self {
            Self::Password(provider) => provider,
            Self::Local(provider) => provider,
        }
    }
}

/// Sign in with configured credentials, or fall back to a fixed user id.
async fn sign_in(config: &Config, transport: Arc<dyn HttpTransport>) -> anyhow::Result<Identity> {
    let auth = &config.auth;
    if let (Some(api_key), Some(email), Some(password)) =
        (&auth.api_key, &auth.email, &auth.password)
    {
        let provider = PasswordSignIn::new(&auth.auth_url, api_key, transport);
        provider.sign_in(email, password).await?;
        return Ok(Identity::Password(provider));
    }

    let local = LocalIdentity::new();
    match &auth.user_id {
        Some(id) => local.sign_in(id.as_str(), None),
        None => debug!("No credentials configured, continuing signed out"),
    }
    Ok(Identity::Local(local))
}

fn transport(config: &Config) -> anyhow::Result<Arc<dyn HttpTransport>> {
    let transport = ReqwestTransport::new(config.request_timeout())
        .context("failed to build HTTP client")?;
    Ok(Arc::new(transport))
}

fn replay_platform(config: &Config) -> anyhow::Result<ReplayPlatform> {
    let track = match &config.platform.track_path {
        Some(path) => Track::load(path)?,
        None => Track::from_points(vec![HOME_POSITION])?,
    };
    info!(points = track.len(), "Loaded track");

    let replayer = TrackReplayer::with_config(
        track,
        ReplayConfig {
            step: config.replay_step(),
            loop_track: config.platform.loop_track,
        },
    );

    Ok(ReplayPlatform::new(
        replayer,
        ReplayPlatformConfig {
            grant_foreground: config.platform.grant_foreground,
            grant_background: config.platform.grant_background,
            registration_path: config.registration_path(),
        },
    ))
}

async fn handle_track(mut config: Config, cmd: TrackCommand) -> anyhow::Result<()> {
    if let Some(path) = cmd.track {
        config.platform.track_path = Some(path);
    }
    if let Some(sink) = cmd.sink {
        config.sink.kind = sink.into();
    }
    if cmd.foreground_only {
        config.tracking.background = false;
    }
    config.validate()?;

    let transport = transport(&config)?;
    let identity = sign_in(&config, transport.clone()).await?;
    let sink = build_sink(&config.sink, transport)?;
    let platform = Arc::new(replay_platform(&config)?);

    let controller = TrackingController::new(
        platform,
        sink.clone(),
        Session::observe(identity.provider()),
        TrackingOptions::from(&config.tracking),
    );

    let mut state = controller.subscribe_state();

    if controller.restore().await? == TrackingState::Idle {
        controller.start().await?;
    }
    println!("Tracking {} via the {} sink. Press Ctrl-C to stop.", controller.state(), sink.name());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(REPORT_INTERVAL);
    let mut last_printed: Option<Coordinate> = None;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("State: {}", *state.borrow_and_update());
            }
            _ = ticker.tick() => {
                let status = controller.status();
                if status.last_known != last_printed {
                    if let Some(position) = status.last_known {
                        println!(
                            "Last known: {position} (delivered {}, failed {})",
                            status.delivered, status.failed
                        );
                    }
                    last_printed = status.last_known;
                }
            }
        }
    }

    if cmd.detach {
        controller.shutdown().await;
        println!("Detached; run `pawtrack stop` to end background tracking.");
    } else {
        controller.stop().await;
        println!("Tracking stopped.");
    }
    Ok(())
}

fn handle_status(config: &Config, cmd: &StatusCommand) -> anyhow::Result<()> {
    let registration = config.registration_path();
    let registered = registration.exists();

    let identity = if config.auth.has_credentials() {
        "password"
    } else if config.auth.user_id.is_some() {
        "user_id"
    } else {
        "none"
    };

    if cmd.json {
        let status = serde_json::json!({
            "registered": registered,
            "registration_path": registration,
            "sink": config.sink.kind,
            "background": config.tracking.background,
            "identity": identity,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("pawtrack status");
        println!("---------------");
        println!(
            "Tracking:      {}",
            if registered { "registered" } else { "not registered" }
        );
        println!("Registration:  {}", registration.display());
        println!("Sink:          {}", config.sink.kind);
        println!("Background:    {}", config.tracking.background);
        println!("Identity:      {identity}");
    }
    Ok(())
}

async fn handle_stop(config: &Config) -> anyhow::Result<()> {
    let platform = Arc::new(replay_platform(config)?);
    if !platform.has_active_subscription() {
        println!("Tracking is not registered.");
        return Ok(());
    }

    let transport = transport(config)?;
    let identity = LocalIdentity::new();
    let controller = TrackingController::new(
        platform,
        build_sink(&config.sink, transport)?,
        Session::observe(&identity),
        TrackingOptions::from(&config.tracking),
    );

    controller.restore().await?;
    controller.stop().await;
    println!("Tracking stopped.");
    Ok(())
}

async fn handle_send(mut config: Config, cmd: &SendCommand) -> anyhow::Result<()> {
    if let Some(sink) = cmd.sink {
        config.sink.kind = sink.into();
        config.validate()?;
    }

    let transport = transport(&config)?;
    let sink = build_sink(&config.sink, transport.clone())?;

    let who = if sink.requires_identity() {
        let identity = sign_in(&config, transport).await?;
        Session::observe(identity.provider())
            .require_identity(config.identity_timeout())
            .await?
    } else {
        UserIdentity::anonymous()
    };

    let record = DeliveryRecord::from(&Coordinate::now(cmd.lat, cmd.lon));
    let delivered = sink
        .deliver(&record, &who)
        .await
        .map_err(pawtracker::Error::from)?;

    println!("Delivered to {} ({}).", sink.name(), delivered.status);
    if !delivered.body.is_null() {
        println!("{}", serde_json::to_string_pretty(&delivered.body)?);
    }
    Ok(())
}

async fn handle_login(config: &Config) -> anyhow::Result<()> {
    if !config.auth.has_credentials() {
        anyhow::bail!("auth.api_key, auth.email and auth.password must be configured to sign in");
    }

    let identity = sign_in(config, transport(config)?).await?;
    let user = match &identity {
        Identity::Password(provider) => Session::observe(provider).identity().await,
        Identity::Local(provider) => provider.current(),
    };
    println!("Signed in as {}", user.id().unwrap_or("nobody"));
    Ok(())
}

fn handle_config(path: Option<std::path::PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_from(path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Tracking]");
                println!("  Accuracy:           {}", config.tracking.accuracy);
                println!("  Min interval (ms):  {}", config.tracking.min_interval_ms);
                println!("  Min distance (m):   {}", config.tracking.min_distance_m);
                println!("  Background:         {}", config.tracking.background);
                println!();
                println!("[Sink]");
                println!("  Kind:               {}", config.sink.kind);
                println!("  HTTP base URL:      {}", config.sink.http.base_url);
                println!(
                    "  Realtime store:     {}",
                    config.sink.realtime.database_url.as_deref().unwrap_or("-")
                );
                println!();
                println!("[Platform]");
                println!("  Registration:       {}", config.registration_path().display());
                println!(
                    "  Track:              {}",
                    config
                        .platform
                        .track_path
                        .as_ref()
                        .map_or_else(|| "-".to_string(), |p| p.display().to_string())
                );
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.or(path).unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
