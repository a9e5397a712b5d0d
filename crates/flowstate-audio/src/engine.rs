//! Playback controller coordinating decode, effects, queueing and output.
//!
//! The controller lives on the caller's thread. While a producer session is
//! running it owns the decoder; the controller gets it back when the session
//! is joined. Hosts call [`PlaybackController::poll`] regularly to process
//! end-of-track transitions and device loss.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use flowstate_core::{
    Error, Playlist, RepeatMode, Result, SessionState, StreamProperties, Track,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::buffer::{shared_block_queue, SharedBlockQueue};
use crate::chain::{shared_chain, EffectsChain, SharedChain};
use crate::config::EngineConfig;
use crate::control::{Command, ControlSignal, SharedControl};
use crate::decode::StreamDecoder;
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::output::{BlockRenderer, OutputDevice, SinkShared};
use crate::producer::{Producer, ProducerEvent, ProducerExit, ProducerOutcome};
use crate::tap::{visualization_tap, TapReceiver, VisualizationTap};
use crate::worker::{WorkerHandle, WorkerPool};

/// Playback state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl PlaybackState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Playing => "playing",
            Self::Paused => "paused",
        }
    }
}

/// Events emitted by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Playback state changed.
    StateChanged(PlaybackState),
    /// A track was opened and the pipeline configured for it.
    TrackLoaded {
        index: usize,
        properties: StreamProperties,
        duration_secs: Option<f64>,
    },
    /// Playback moved to another playlist entry.
    TrackChanged(usize),
    /// Position jumped (seconds).
    Seeked(f64),
    /// The playlist ran out with repeat off.
    PlaybackFinished,
    VolumeChanged { volume: f32, muted: bool },
    /// Error occurred.
    Error(String),
}

/// Playlist entry addressed by a remote sync request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTarget {
    Index(usize),
    LibraryId(i64),
}

#[derive(Debug, Clone)]
struct LoadedTrack {
    index: usize,
    path: PathBuf,
    properties: StreamProperties,
    duration_secs: Option<f64>,
}

/// Owns the playlist and the playback pipeline.
pub struct PlaybackController {
    config: EngineConfig,
    pool: WorkerPool,
    queue: SharedBlockQueue,
    chain: SharedChain,
    control: SharedControl,
    sink: Arc<SinkShared>,
    device: Box<dyn OutputDevice>,
    /// Properties the device was opened with.
    device_props: Option<StreamProperties>,
    metrics: Arc<EngineMetrics>,
    tap: Option<VisualizationTap>,
    playlist: Playlist,
    state: PlaybackState,
    loaded: Option<LoadedTrack>,
    /// Decoder held while no producer session runs.
    decoder: Option<StreamDecoder>,
    producer: Option<WorkerHandle<ProducerOutcome>>,
    session: u64,
    decoded_frame: Arc<AtomicU64>,
    producer_tx: Sender<ProducerEvent>,
    producer_rx: Receiver<ProducerEvent>,
    event_tx: Sender<EngineEvent>,
    event_rx: Receiver<EngineEvent>,
    /// Playlist ended; waiting for the queued tail to reach the output.
    draining: bool,
    shut_down: bool,
}

impl PlaybackController {
    /// Create a controller with its own worker pool.
    pub fn new(config: EngineConfig, device: Box<dyn OutputDevice>, chain: EffectsChain) -> Result<Self> {
        Self::with_pool(config, device, chain, WorkerPool::new("flowstate"))
    }

    /// Create a controller that spawns producers on `pool`.
    pub fn with_pool(
        config: EngineConfig,
        device: Box<dyn OutputDevice>,
        chain: EffectsChain,
        pool: WorkerPool,
    ) -> Result<Self> {
        config.validate()?;
        let (producer_tx, producer_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        info!(
            "Playback controller ready (block {} frames, queue {} blocks, output {})",
            config.block_size,
            config.queue_capacity,
            device.name()
        );
        Ok(Self {
            queue: shared_block_queue(config.queue_capacity),
            chain: shared_chain(chain),
            control: Arc::new(ControlSignal::new(Command::Stop)),
            sink: SinkShared::new(config.initial_volume),
            device,
            device_props: None,
            metrics: EngineMetrics::new(),
            tap: None,
            playlist: Playlist::new(),
            state: PlaybackState::Stopped,
            loaded: None,
            decoder: None,
            producer: None,
            session: 0,
            decoded_frame: Arc::new(AtomicU64::new(0)),
            producer_tx,
            producer_rx,
            event_tx,
            event_rx,
            draining: false,
            shut_down: false,
            pool,
            config,
        })
    }

    /// Receiver for all engine events.
    pub fn events(&self) -> Receiver<EngineEvent> {
        self.event_rx.clone()
    }

    /// Register a visualization consumer. Takes effect from the next producer session.
    pub fn attach_tap(&mut self) -> TapReceiver {
        let (tap, rx) = visualization_tap(self.config.tap_capacity, self.metrics.clone());
        self.tap = Some(tap);
        rx
    }

    /// The effects chain. Lock it only from the controlling thread.
    pub fn chain(&self) -> SharedChain {
        self.chain.clone()
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub const fn state(&self) -> PlaybackState {
        self.state
    }

    pub const fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.queue.stale_discarded())
    }

    /// Stream properties of the loaded track.
    pub fn properties(&self) -> Option<StreamProperties> {
        self.loaded.as_ref().map(|t| t.properties)
    }

    pub fn duration(&self) -> Option<f64> {
        self.loaded.as_ref().and_then(|t| t.duration_secs)
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.loaded.as_ref().map(|t| t.path.as_path())
    }

    /// Audible position in seconds.
    pub fn position(&self) -> f64 {
        self.loaded.as_ref().map_or(0.0, |t| {
            t.properties.frames_to_secs(self.sink.played_frame())
        })
    }

    /// Position the producer has decoded up to, in seconds.
    pub fn decoded_position(&self) -> f64 {
        self.loaded.as_ref().map_or(0.0, |t| {
            t.properties
                .frames_to_secs(self.decoded_frame.load(Ordering::Relaxed))
        })
    }

    pub fn is_producer_running(&self) -> bool {
        self.producer.is_some()
    }

    pub fn output_name(&self) -> String {
        self.device.name()
    }

    pub fn is_output_open(&self) -> bool {
        self.device.is_open()
    }

    // Playlist

    /// Append a track. Returns its index.
    pub fn add_track(&mut self, track: Track) -> usize {
        self.playlist.push(track);
        self.playlist.len() - 1
    }

    /// Add several files to the end of the playlist.
    pub fn add_paths<I, P>(&mut self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        for path in paths {
            self.playlist.push(Track::from_path(path));
        }
    }

    pub fn insert_track(&mut self, index: usize, track: Track) {
        self.playlist.insert(index, track);
        self.sync_loaded_index();
    }

    /// Remove an entry. Removing the playing entry stops playback.
    pub fn remove_track(&mut self, index: usize) -> Result<Track> {
        let removing_current = self.loaded.as_ref().is_some_and(|t| t.index == index);
        if removing_current {
            self.stop()?;
            self.loaded = None;
        }
        let entry = self
            .playlist
            .remove_at(index)
            .ok_or_else(|| Error::InvalidArgument(format!("no playlist entry {index}")))?;
        self.sync_loaded_index();
        Ok(entry.track)
    }

    pub fn clear_playlist(&mut self) -> Result<()> {
        self.stop()?;
        self.loaded = None;
        self.playlist.clear();
        Ok(())
    }

    // Transport

    /// Stop everything, then open `path` as the current track (Stopped, position 0).
    ///
    /// Paths not yet in the playlist are appended.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<StreamProperties> {
        let path = path.as_ref();
        self.stop()?;
        let (index, appended) = match self.playlist.index_of_path(path) {
            Some(index) => (index, false),
            None => (self.add_track(Track::from_path(path)), true),
        };
        self.playlist.jump_to(index);
        match self.open_track(index) {
            Ok(props) => Ok(props),
            Err(e) => {
                if appended {
                    self.playlist.remove_at(index);
                }
                Err(e)
            }
        }
    }

    pub fn load_and_play(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.load(path)?;
        self.play(None)
    }

    /// Start or resume playback, optionally from `offset` seconds.
    pub fn play(&mut self, offset: Option<f64>) -> Result<()> {
        self.settle_drain();
        match self.state {
            PlaybackState::Playing => {
                if let Some(position) = offset {
                    self.seek(position)?;
                }
                Ok(())
            }
            PlaybackState::Paused => {
                if let Some(position) = offset {
                    self.seek(position)?;
                }
                self.resume()
            }
            PlaybackState::Stopped => self.start(offset),
        }
    }

    fn start(&mut self, offset: Option<f64>) -> Result<()> {
        if self.decoder.is_none() {
            let index = self
                .loaded
                .as_ref()
                .map(|t| t.index)
                .or_else(|| self.playlist.current_index())
                .ok_or_else(|| Error::InvalidState("nothing to play".into()))?;
            self.open_track(index)?;
        }
        self.ensure_output()?;
        if let Some(position) = offset {
            self.seek_stopped(position)?;
        }
        self.spawn_producer(Command::Run)?;
        self.sink.set_active(true);
        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    /// Suspend the producer. Queued audio keeps draining.
    pub fn pause(&mut self) -> Result<()> {
        self.settle_drain();
        if self.state == PlaybackState::Playing {
            self.control.set(Command::Pause);
            self.sink.set_active(false);
            self.set_state(PlaybackState::Paused);
        }
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        self.settle_drain();
        match self.state {
            PlaybackState::Paused => {
                self.ensure_output()?;
                if self.producer.is_none() {
                    self.spawn_producer(Command::Run)?;
                } else {
                    self.control.set(Command::Run);
                }
                self.sink.set_active(true);
                self.set_state(PlaybackState::Playing);
                Ok(())
            }
            PlaybackState::Stopped => self.play(None),
            PlaybackState::Playing => Ok(()),
        }
    }

    /// Stop the producer, flush the queue, close the decoder, reset position.
    pub fn stop(&mut self) -> Result<()> {
        self.draining = false;
        self.stop_producer();
        self.queue.clear();
        if self.decoder.take().is_some() {
            debug!("Closed decoder");
        }
        self.sink.set_active(false);
        self.sink.set_played_frame(0);
        self.decoded_frame.store(0, Ordering::Relaxed);
        self.set_state(PlaybackState::Stopped);
        Ok(())
    }

    /// Jump to `position` seconds without changing Playing/Paused.
    ///
    /// While stopped the loaded track is reopened if needed and repositioned.
    pub fn seek(&mut self, position: f64) -> Result<()> {
        if !position.is_finite() || position < 0.0 {
            return Err(Error::Seek(format!("invalid position {position}")));
        }
        self.settle_drain();
        let Some(props) = self.properties() else {
            return Err(Error::InvalidState("no track loaded".into()));
        };
        match self.state {
            PlaybackState::Playing | PlaybackState::Paused if self.producer.is_some() => {
                if self.control.request_seek(position, &self.queue).is_some() {
                    let frame = props.secs_to_frames(position);
                    self.sink.set_played_frame(frame);
                    self.decoded_frame.store(frame, Ordering::Relaxed);
                } else {
                    self.restart_finished_producer(position)?;
                }
            }
            _ => {
                if self.decoder.is_none() {
                    let index = self.loaded.as_ref().map_or(0, |t| t.index);
                    self.open_track(index)?;
                }
                self.seek_stopped(position)?;
            }
        }
        self.emit(EngineEvent::Seeked(position));
        Ok(())
    }

    /// Reposition a track whose producer already decoded to the end.
    ///
    /// Its end-of-stream event is left unhandled; the new session id makes
    /// `poll()` ignore it.
    fn restart_finished_producer(&mut self, position: f64) -> Result<()> {
        debug!("Producer already at end of stream, restarting at {position:.2}s");
        if let Some(outcome) = self.join_producer() {
            self.decoder = Some(outcome.decoder);
        }
        if self.decoder.is_none() {
            let index = self.loaded.as_ref().map_or(0, |t| t.index);
            self.open_track(index)?;
        }
        self.seek_stopped(position)?;
        if let Err(e) = self.spawn_producer(self.producer_command()) {
            self.fail_playback(&e);
            return Err(e);
        }
        Ok(())
    }

    fn seek_stopped(&mut self, position: f64) -> Result<()> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| Error::InvalidState("no decoder open".into()))?;
        decoder.seek(position)?;
        self.queue.clear();
        let frame = decoder.position_frames();
        self.sink.set_played_frame(frame);
        self.decoded_frame.store(frame, Ordering::Relaxed);
        Ok(())
    }

    /// Skip to the next entry in play order.
    pub fn next(&mut self) -> Result<()> {
        let resume = self.state == PlaybackState::Playing;
        match self.playlist.skip_forward() {
            Some(index) => self.switch_to(index, resume),
            None => {
                self.queue.clear();
                self.finish_playlist();
                Ok(())
            }
        }
    }

    /// Restart the current track past the restart threshold, else step back.
    pub fn previous(&mut self) -> Result<()> {
        if self.loaded.is_some() && self.position() > self.config.restart_threshold_secs {
            return self.seek(0.0);
        }
        let resume = self.state == PlaybackState::Playing;
        match self.playlist.skip_backward() {
            Some(index) => self.switch_to(index, resume),
            None => self.seek(0.0),
        }
    }

    /// Load and play playlist entry `index`.
    pub fn play_index(&mut self, index: usize) -> Result<()> {
        if self.playlist.jump_to(index).is_none() {
            return Err(Error::InvalidArgument(format!("no playlist entry {index}")));
        }
        self.switch_to(index, true)
    }

    /// Bring playback to a remote peer's state in one call.
    pub fn force_sync_playback(&mut self, target: SyncTarget, position: f64, playing: bool) -> Result<()> {
        let index = match target {
            SyncTarget::Index(index) => index,
            SyncTarget::LibraryId(id) => self
                .playlist
                .entries()
                .iter()
                .position(|e| e.track.library_id == Some(id))
                .ok_or_else(|| Error::InvalidArgument(format!("library track {id} not in playlist")))?,
        };
        info!("Force sync to entry {index} at {position:.2}s (playing: {playing})");

        let already_current = self.loaded.as_ref().is_some_and(|t| t.index == index);
        if !already_current {
            if self.playlist.jump_to(index).is_none() {
                return Err(Error::InvalidArgument(format!("no playlist entry {index}")));
            }
            self.switch_to(index, false)?;
        }

        match (playing, self.state) {
            (true, PlaybackState::Stopped) => self.play(Some(position)),
            (true, _) => {
                self.seek(position)?;
                self.resume()
            }
            (false, PlaybackState::Playing) => {
                self.pause()?;
                self.seek(position)
            }
            (false, _) => self.seek(position),
        }
    }

    // Volume

    pub fn volume(&self) -> f32 {
        self.sink.volume()
    }

    pub fn is_muted(&self) -> bool {
        self.sink.is_muted()
    }

    /// Volume the output currently applies (0 while muted).
    pub fn effective_volume(&self) -> f32 {
        self.sink.effective_volume()
    }

    /// Set the volume (clamped to 0..=1). Mute state is kept.
    pub fn set_volume(&mut self, volume: f32) -> f32 {
        let volume = self.sink.set_volume(volume);
        self.emit_volume();
        volume
    }

    /// Flip mute. The stored volume is never modified.
    pub fn toggle_mute(&mut self) -> bool {
        let muted = !self.sink.is_muted();
        self.sink.set_muted(muted);
        self.emit_volume();
        muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.sink.set_muted(muted);
        self.emit_volume();
    }

    // Modes

    pub fn set_shuffle(&mut self, shuffle: bool) {
        self.playlist.set_shuffle(shuffle);
        debug!("Shuffle {}", if shuffle { "on" } else { "off" });
    }

    pub fn toggle_shuffle(&mut self) -> bool {
        self.playlist.toggle_shuffle()
    }

    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        self.playlist.set_repeat_mode(mode);
        debug!("Repeat {}", mode.as_str());
    }

    pub fn cycle_repeat(&mut self) -> RepeatMode {
        self.playlist.cycle_repeat()
    }

    // Session

    /// Snapshot of the persistable state.
    pub fn session_state(&self) -> SessionState {
        SessionState {
            playlist: self
                .playlist
                .entries()
                .iter()
                .map(|e| e.track.path.clone())
                .collect(),
            current_index: self.playlist.current_index(),
            position_secs: self.position(),
            volume: self.volume(),
            muted: self.is_muted(),
            shuffle: self.playlist.is_shuffle(),
            repeat: self.playlist.repeat_mode(),
        }
    }

    /// Replace the playlist and settings from `session`, leaving playback stopped.
    ///
    /// A missing or unreadable current track is logged and skipped.
    pub fn restore_session(&mut self, session: &SessionState) -> Result<()> {
        self.stop()?;
        self.loaded = None;
        let tracks = session.playlist.iter().map(Track::from_path).collect();
        self.playlist.set(tracks, session.current_index.unwrap_or(0));
        self.playlist.set_repeat_mode(session.repeat);
        self.playlist.set_shuffle(session.shuffle);
        self.sink.set_volume(session.volume);
        self.sink.set_muted(session.muted);
        self.emit_volume();

        if let Some(index) = session.current_index.filter(|i| *i < self.playlist.len()) {
            match self.open_track(index) {
                Ok(_) if session.position_secs > 0.0 => {
                    if let Err(e) = self.seek_stopped(session.position_secs) {
                        warn!("Could not restore position {:.2}s: {e}", session.position_secs);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Could not reopen session track: {e}"),
            }
        }
        info!("Restored session with {} tracks", self.playlist.len());
        Ok(())
    }

    // Housekeeping

    /// Handle finished producer sessions and device loss. Returns events handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.producer_rx.try_recv() {
            if event.session != self.session || self.producer.is_none() {
                continue;
            }
            handled += 1;
            self.on_producer_finished(&event);
        }

        if self.draining && (self.queue.is_empty() || !self.device.is_open()) {
            handled += 1;
            self.complete_playlist();
        }

        if self.sink.take_device_lost() {
            handled += 1;
            error!("Output device lost");
            self.device.close();
            self.device_props = None;
            self.emit(EngineEvent::Error("Output device lost".into()));
        }
        handled
    }

    /// Close and reopen the output device for the loaded track.
    pub fn reopen_output(&mut self) -> Result<()> {
        self.device.close();
        self.device_props = None;
        if self.loaded.is_some() {
            self.ensure_output()?;
        }
        Ok(())
    }

    /// Stop playback, close the device and join all workers.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        if let Err(e) = self.stop() {
            warn!("Error while stopping during shutdown: {e}");
        }
        self.device.close();
        let detached = self.pool.shutdown(self.config.stop_timeout());
        if detached > 0 {
            error!("{detached} worker threads still running at shutdown");
        }
        info!("Playback controller shut down");
    }

    // Internals

    fn on_producer_finished(&mut self, event: &ProducerEvent) {
        let Some(outcome) = self.join_producer() else {
            return;
        };
        self.decoder = Some(outcome.decoder);
        if event.exit == ProducerExit::DecodeFailed {
            let message = event.message.clone().unwrap_or_else(|| "decode error".into());
            self.emit(EngineEvent::Error(message));
        }

        if self.playlist.repeat_mode() == RepeatMode::One {
            if let Some(decoder) = self.decoder.as_mut() {
                match decoder.seek(0.0) {
                    Ok(()) => {
                        debug!("Repeating current track");
                        if let Err(e) = self.spawn_producer(self.producer_command()) {
                            self.fail_playback(&e);
                        }
                        return;
                    }
                    Err(e) => warn!("Could not rewind for repeat: {e}"),
                }
            }
        }
        self.advance_after_end();
    }

    /// Move to the next playable entry after the current one ended.
    fn advance_after_end(&mut self) {
        for _ in 0..self.playlist.len().max(1) {
            let Some(index) = self.playlist.advance_after_end() else {
                self.finish_playlist();
                return;
            };
            match self.continue_with(index) {
                Ok(()) => return,
                Err(e) => {
                    warn!("Skipping unplayable entry {index}: {e}");
                    self.emit(EngineEvent::Error(e.to_string()));
                }
            }
        }
        self.finish_playlist();
    }

    /// Open `index` behind the track that just ended, without flushing the queue
    /// when the stream format is unchanged.
    fn continue_with(&mut self, index: usize) -> Result<()> {
        let previous = self.properties();
        let path = self.entry_path(index)?;
        let decoder = StreamDecoder::open(&path)?;
        let props = decoder.properties();

        if previous != Some(props) {
            // Old tail cannot play at the new format
            self.queue.clear();
            self.chain.lock().set_stream_properties(props);
            self.sink.set_played_frame(0);
        }
        self.decoder = Some(decoder);
        self.set_loaded(index, path, props);
        self.decoded_frame.store(0, Ordering::Relaxed);
        self.emit(EngineEvent::TrackChanged(index));

        if let Err(e) = self.ensure_output() {
            // Producer keeps queueing so a later reopen can resume
            self.emit(EngineEvent::Error(e.to_string()));
        }
        self.spawn_producer(self.producer_command())
    }

    /// The producer is done with the last entry. `PlaybackFinished` follows
    /// once `poll()` sees the queue drained.
    fn finish_playlist(&mut self) {
        info!("Reached end of playlist");
        self.stop_producer();
        self.decoder = None;
        self.sink.set_active(false);
        if self.state == PlaybackState::Playing && !self.queue.is_empty() && self.device.is_open() {
            debug!("Draining {} queued blocks before finishing", self.queue.len());
            self.draining = true;
        } else {
            self.complete_playlist();
        }
    }

    fn complete_playlist(&mut self) {
        self.draining = false;
        self.set_state(PlaybackState::Stopped);
        self.emit(EngineEvent::PlaybackFinished);
    }

    /// Any transport call during the drain ends it first.
    fn settle_drain(&mut self) {
        if self.draining {
            self.complete_playlist();
        }
    }

    fn fail_playback(&mut self, e: &Error) {
        error!("Playback failed: {e}");
        self.emit(EngineEvent::Error(e.to_string()));
        if let Err(e) = self.stop() {
            warn!("Stop after failure: {e}");
        }
    }

    /// Stop whatever is playing and open `index`, playing it if `play`.
    fn switch_to(&mut self, index: usize, play: bool) -> Result<()> {
        self.stop()?;
        self.open_track(index)?;
        self.emit(EngineEvent::TrackChanged(index));
        if play {
            self.play(None)?;
        }
        Ok(())
    }

    /// Open the decoder for playlist entry `index` and configure the pipeline.
    fn open_track(&mut self, index: usize) -> Result<StreamProperties> {
        let path = self.entry_path(index)?;
        let decoder = match StreamDecoder::open(&path) {
            Ok(decoder) => decoder,
            Err(e) => {
                error!("Failed to load {}: {e}", path.display());
                self.emit(EngineEvent::Error(e.to_string()));
                return Err(e);
            }
        };
        let props = decoder.properties();
        self.chain.lock().set_stream_properties(props);
        if self.device_props.is_some_and(|p| p != props) {
            self.device.close();
            self.device_props = None;
        }
        self.playlist.jump_to(index);
        self.decoder = Some(decoder);
        self.set_loaded(index, path, props);
        self.sink.set_played_frame(0);
        self.decoded_frame.store(0, Ordering::Relaxed);
        Ok(props)
    }

    fn set_loaded(&mut self, index: usize, path: PathBuf, properties: StreamProperties) {
        let duration_secs = self.decoder.as_ref().and_then(StreamDecoder::duration_secs);
        info!("Loaded {} ({properties})", path.display());
        self.loaded = Some(LoadedTrack {
            index,
            path,
            properties,
            duration_secs,
        });
        self.emit(EngineEvent::TrackLoaded {
            index,
            properties,
            duration_secs,
        });
    }

    fn entry_path(&self, index: usize) -> Result<PathBuf> {
        self.playlist
            .get(index)
            .map(|e| e.track.path.clone())
            .ok_or_else(|| Error::InvalidArgument(format!("no playlist entry {index}")))
    }

    fn sync_loaded_index(&mut self) {
        if let Some(loaded) = self.loaded.as_mut() {
            if let Some(index) = self.playlist.index_of_path(&loaded.path) {
                loaded.index = index;
            }
        }
    }

    /// Open the device at the loaded track's properties if not already.
    fn ensure_output(&mut self) -> Result<()> {
        let props = self
            .properties()
            .ok_or_else(|| Error::InvalidState("no track loaded".into()))?;
        if self.device.is_open() && self.device_props == Some(props) {
            return Ok(());
        }
        self.device.close();
        let renderer = BlockRenderer::new(
            self.queue.clone(),
            self.sink.clone(),
            self.metrics.clone(),
            props,
            self.config.block_size,
            self.config.pop_timeout(props),
        );
        if let Err(e) = self.device.open(renderer) {
            error!("Failed to open output: {e}");
            self.emit(EngineEvent::Error(e.to_string()));
            return Err(e);
        }
        self.device_props = Some(props);
        Ok(())
    }

    const fn producer_command(&self) -> Command {
        match self.state {
            PlaybackState::Paused => Command::Pause,
            _ => Command::Run,
        }
    }

    fn spawn_producer(&mut self, command: Command) -> Result<()> {
        let decoder = self
            .decoder
            .take()
            .ok_or_else(|| Error::InvalidState("no decoder open".into()))?;
        self.session += 1;
        // Each session gets its own signal so a detached producer can never be revived
        self.control = Arc::new(ControlSignal::new(command));
        let producer = Producer {
            session: self.session,
            decoder,
            chain: self.chain.clone(),
            queue: self.queue.clone(),
            control: self.control.clone(),
            tap: self.tap.clone(),
            metrics: self.metrics.clone(),
            decoded_frame: self.decoded_frame.clone(),
            events: self.producer_tx.clone(),
            block_size: self.config.block_size,
            push_timeout: self.config.push_timeout(),
        };
        let handle = self.pool.spawn("producer", move || producer.run())?;
        self.producer = Some(handle);
        Ok(())
    }

    /// Signal stop and join with the configured bound.
    fn stop_producer(&mut self) {
        if self.producer.is_none() {
            return;
        }
        self.control.set(Command::Stop);
        if let Some(outcome) = self.join_producer() {
            self.decoder = Some(outcome.decoder);
        }
    }

    fn join_producer(&mut self) -> Option<ProducerOutcome> {
        let handle = self.producer.take()?;
        let name = handle.name().to_string();
        match handle.join_timeout(self.config.stop_timeout()) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Producer {name} did not stop: {e}; abandoning this track");
                self.control.set(Command::Stop);
                self.queue.clear();
                self.emit(EngineEvent::Error(e.to_string()));
                None
            }
        }
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            debug!("State {} -> {}", self.state.as_str(), state.as_str());
            self.state = state;
            self.emit(EngineEvent::StateChanged(state));
        }
    }

    fn emit_volume(&self) {
        self.emit(EngineEvent::VolumeChanged {
            volume: self.sink.volume(),
            muted: self.sink.is_muted(),
        });
    }

    fn emit(&self, event: EngineEvent) {
        // Our own receiver keeps the channel open
        let _ = self.event_tx.send(event);
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
