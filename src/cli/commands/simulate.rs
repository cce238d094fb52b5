//! Scripted player session on simulated media.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{info, warn};

use crate::config::{self, Config};
use crate::error::ResultExt;
use crate::media::{LoadScript, MediaCatalog, MediaKind, SimulatedMedia, SimulatedShadows};
use crate::model::Track;
use crate::player::Session;
use crate::xr::Collaborators;

/// Options of the `simulate` command
#[derive(Debug, Clone, Default)]
pub struct SimulateOptions {
    pub track: Option<PathBuf>,
    pub query: Option<String>,
    pub fail_video: bool,
    pub fail_shadow: bool,
    pub silent_video: bool,
    pub block_autoplay: bool,
    pub config: Option<PathBuf>,
}

/// Track used when none is given.
fn demo_track() -> Track {
    Track::audio("Demo", "demo/audio.mp3")
        .with_video("demo/video-360.mp4")
        .chapter("Simulation")
        .order(1)
}

fn load_track(options: &SimulateOptions) -> anyhow::Result<Track> {
    if let Some(path) = &options.track {
        let json = std::fs::read_to_string(path)
            .with_context(format!("reading track file {}", path.display()))?;
        return Ok(Track::from_cms_json(&json)?);
    }
    if let Some(query) = &options.query {
        return Ok(Track::from_query(query)?);
    }
    Ok(demo_track())
}

/// Load scripts for the track's video according to the flags.
fn script_video(catalog: &MediaCatalog, track: &Track, options: &SimulateOptions) {
    let Some(video) = track.video_locator.as_deref() else {
        return;
    };
    if options.silent_video {
        catalog.script(video, [LoadScript::Silent]);
    } else if options.fail_video && options.fail_shadow {
        catalog.script(video, [LoadScript::fail()]);
    } else if options.fail_video {
        // Session load fails, the gate's load fails, the shadow succeeds
        catalog.script(video, [LoadScript::fail(), LoadScript::fail(), LoadScript::ready()]);
    }
}

/// Run a session: load, play, enter XR, mute, skip, exit. Prints the final
/// state snapshot as JSON.
pub fn cmd_simulate(rt: &Runtime, options: &SimulateOptions) -> anyhow::Result<()> {
    let config: Config = match &options.config {
        Some(path) => config::load_from(path)?,
        None => config::load(),
    };
    let track = load_track(options)?;
    let tick = config.sync.interval();

    rt.block_on(async {
        let catalog = Arc::new(MediaCatalog::default());
        script_video(&catalog, &track, options);

        let audio = SimulatedMedia::new(MediaKind::Audio, Arc::clone(&catalog));
        let video = SimulatedMedia::new(MediaKind::Video, Arc::clone(&catalog));
        video.set_autoplay_allowed(!options.block_autoplay);

        let session = Session::new(
            audio.handle(),
            video.handle(),
            Arc::new(SimulatedShadows::new(Arc::clone(&catalog))),
            Collaborators::default(),
            config,
        );

        println!("Loading: {}", track.display_title());
        let readiness = session.load_track(track).await?;
        println!("Audio ready: {:?}", readiness);

        if let Err(e) = session.play().await {
            warn!("Playback did not start: {}", e);
        }
        audio.advance(5.0);

        match session.enter_xr().await {
            Ok(mode) => println!("Mode: {}", mode),
            Err(e) => println!("XR unavailable: {}", e),
        }
        if options.block_autoplay {
            info!("Simulating a user click");
            session.user_gesture().await;
        }

        for _ in 0..4 {
            tokio::time::sleep(tick).await;
            audio.advance(tick.as_secs_f64());
        }

        let muted = session.toggle_master_mute();
        println!("Master mute: {}", muted);
        let muted = session.toggle_master_mute();
        println!("Master mute: {}", muted);

        println!("Skipped to {:.1}s", session.skip_forward());
        tokio::time::sleep(Duration::from_millis(10)).await;

        if session.exit_xr() {
            println!("Mode: {}", session.mode());
        }

        println!("{}", serde_json::to_string_pretty(&session.state())?);
        anyhow::Ok(())
    })
}
