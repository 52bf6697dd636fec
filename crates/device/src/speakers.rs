//! Speaker playback.
//!
//! One playback at a time, stoppable mid-chunk. The rodio output stream is
//! not `Send`, so a dedicated thread owns it and doubles as the monitor:
//! it polls the sink every millisecond until the chunk drains or the stop
//! flag is raised, then cleans up under the state lock.
//!
//! State flow: `Idle` → `play` → `Playing`; `stop` flips `Playing` →
//! `Stopping` and waits; cleanup always lands back in `Idle`. There is at
//! most one monitor while not `Idle` — it is the playback thread itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use tokio::sync::watch;

use voicewire_core::{DeviceError, PcmBuffer, PlaybackDone, PlaybackSink};

const MONITOR_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlayerState {
    Idle,
    Playing,
    Stopping,
}

struct Shared {
    state: Mutex<PlayerState>,
    stop_flag: AtomicBool,
}

struct PlayRequest {
    samples: Vec<i16>,
    channels: u16,
    sample_rate: u32,
    done: watch::Sender<bool>,
}

/// Local speaker sink.
pub struct Speakers {
    shared: Arc<Shared>,
    commands: Mutex<std::sync::mpsc::Sender<PlayRequest>>,
    current_done: Mutex<Option<watch::Receiver<bool>>>,
}

impl Speakers {
    /// Open the default output device. Blocks briefly until the audio
    /// hardware is ready; failure here is fatal for the session.
    pub fn new() -> Result<Self, DeviceError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(PlayerState::Idle),
            stop_flag: AtomicBool::new(false),
        });
        let (commands, command_rx) = std::sync::mpsc::channel::<PlayRequest>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), DeviceError>>();

        let thread_shared = Arc::clone(&shared);
        std::thread::spawn(move || {
            let (_stream, handle) = match OutputStream::try_default() {
                Ok(pair) => pair,
                Err(err) => {
                    let _ = ready_tx.send(Err(DeviceError::Unavailable(err.to_string())));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            tracing::info!("output device ready");

            for request in command_rx.iter() {
                play_and_monitor(&thread_shared, &handle, request);
            }
            tracing::debug!("playback thread exiting");
        });

        ready_rx
            .recv()
            .map_err(|_| DeviceError::Unavailable("playback thread died".to_string()))??;

        Ok(Self {
            shared,
            commands: Mutex::new(commands),
            current_done: Mutex::new(None),
        })
    }
}

/// Run one playback to completion or interruption, then reset to `Idle`.
fn play_and_monitor(shared: &Shared, handle: &rodio::OutputStreamHandle, request: PlayRequest) {
    let started = Instant::now();
    let sink = match Sink::try_new(handle) {
        Ok(sink) => sink,
        Err(err) => {
            tracing::error!(%err, "cannot open playback sink");
            cleanup(shared, &request.done);
            return;
        }
    };
    sink.append(SamplesBuffer::new(
        request.channels,
        request.sample_rate,
        request.samples,
    ));

    loop {
        if sink.empty() || shared.stop_flag.load(Ordering::SeqCst) {
            break;
        }
        std::thread::sleep(MONITOR_POLL);
    }

    sink.stop();
    drop(sink);
    cleanup(shared, &request.done);
    tracing::debug!(
        playback_ms = started.elapsed().as_millis() as u64,
        "playback done"
    );
}

fn cleanup(shared: &Shared, done: &watch::Sender<bool>) {
    let mut state = shared.state.lock();
    *state = PlayerState::Idle;
    shared.stop_flag.store(false, Ordering::SeqCst);
    let _ = done.send(true);
}

#[async_trait]
impl PlaybackSink for Speakers {
    async fn play(&self, audio: PcmBuffer) -> Result<Option<PlaybackDone>, DeviceError> {
        {
            let mut state = self.shared.state.lock();
            if *state != PlayerState::Idle {
                return Err(DeviceError::AlreadyPlaying);
            }
            *state = PlayerState::Playing;
        }

        let samples: Vec<i16> = audio
            .data
            .iter()
            .map(|&s| s.clamp(i16::MIN as i32, i16::MAX as i32) as i16)
            .collect();

        let (done_tx, done_rx) = watch::channel(false);
        *self.current_done.lock() = Some(done_rx.clone());

        let request = PlayRequest {
            samples,
            channels: audio.channels,
            sample_rate: audio.sample_rate,
            done: done_tx,
        };
        if self.commands.lock().send(request).is_err() {
            *self.shared.state.lock() = PlayerState::Idle;
            return Err(DeviceError::Closed);
        }
        Ok(Some(PlaybackDone::new(done_rx)))
    }

    async fn stop(&self) -> Result<(), DeviceError> {
        let done = {
            let mut state = self.shared.state.lock();
            match *state {
                PlayerState::Idle => {
                    tracing::debug!("player already stopped");
                    return Ok(());
                }
                // Only possible when several callers race their stops.
                PlayerState::Stopping => return Err(DeviceError::AlreadyStopping),
                PlayerState::Playing => {
                    *state = PlayerState::Stopping;
                    self.shared.stop_flag.store(true, Ordering::SeqCst);
                }
            }
            self.current_done.lock().clone()
        };

        tracing::debug!("stopping current playback");
        if let Some(done) = done {
            PlaybackDone::new(done).wait().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Hardware-dependent paths (device open, real playback) are exercised
    // by the CLI, not by unit tests; these cover the pure parts.

    #[test]
    fn sample_clamping() {
        let audio = PcmBuffer::mono16(vec![40_000, -40_000, 100], 24_000);
        let samples: Vec<i16> = audio
            .data
            .iter()
            .map(|&s| s.clamp(i16::MIN as i32, i16::MAX as i32) as i16)
            .collect();
        assert_eq!(samples, vec![32767, -32768, 100]);
    }
}
