//! Microphone capture.
//!
//! The cpal input callback runs on an OS audio thread and must stay cheap:
//! it only appends the captured bytes to a shared buffer. A separate tokio
//! task polls the buffer through the PCM segmenter and emits WAV segments.
//! The `cpal::Stream` itself is not `Send`, so it lives on a dedicated
//! thread for its whole life.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Notify};

use voicewire_codec::pcm_bytes_to_wav;
use voicewire_core::{debug_dump, AudioFormat, AudioSegment, CaptureSource, DeviceError};
use voicewire_pipeline::{PcmVad, PcmVadConfig};

const CAPTURE_CHANNELS: u16 = 1;

/// How often the flush task re-scans the capture buffer.
const FLUSH_POLL: Duration = Duration::from_millis(10);

/// Local microphone capture source at a fixed 16-bit mono configuration.
pub struct Microphone {
    sample_rate: u32,
    dump_dir: Option<PathBuf>,
    buffer: Arc<Mutex<Vec<u8>>>,
    started: AtomicBool,
    stopped: AtomicBool,
    flush_stop: Arc<Notify>,
    stream_thread: Mutex<Option<StreamThread>>,
    flush_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    recording_start: Mutex<Option<Instant>>,
}

struct StreamThread {
    stop_tx: std::sync::mpsc::Sender<()>,
    handle: std::thread::JoinHandle<()>,
}

impl Microphone {
    pub fn new(sample_rate: u32, dump_dir: Option<PathBuf>) -> Self {
        Self {
            sample_rate,
            dump_dir,
            buffer: Arc::new(Mutex::new(Vec::new())),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            flush_stop: Arc::new(Notify::new()),
            stream_thread: Mutex::new(None),
            flush_task: Mutex::new(None),
            recording_start: Mutex::new(None),
        }
    }

    /// Spawn the thread that owns the cpal stream. Resolves the returned
    /// receiver once the device is capturing (or failed to open).
    fn spawn_stream_thread(
        &self,
    ) -> (
        oneshot::Receiver<Result<(), DeviceError>>,
        std::sync::mpsc::Sender<()>,
        std::thread::JoinHandle<()>,
    ) {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let buffer = Arc::clone(&self.buffer);
        let sample_rate = self.sample_rate;

        let handle = std::thread::spawn(move || {
            let host = cpal::default_host();
            let Some(device) = host.default_input_device() else {
                let _ = ready_tx.send(Err(DeviceError::Unavailable(
                    "no default input device".to_string(),
                )));
                return;
            };
            tracing::info!(
                device = %device.name().unwrap_or_default(),
                sample_rate,
                "opening input device"
            );

            let config = StreamConfig {
                channels: CAPTURE_CHANNELS,
                sample_rate: SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let stream = device.build_input_stream(
                &config,
                move |data: &[i16], _info| {
                    let mut buf = buffer.lock();
                    for &sample in data {
                        buf.extend_from_slice(&sample.to_le_bytes());
                    }
                },
                |err| tracing::error!(%err, "input stream error"),
                None,
            );
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = ready_tx.send(Err(DeviceError::Stream(err.to_string())));
                    return;
                }
            };
            if let Err(err) = stream.play() {
                let _ = ready_tx.send(Err(DeviceError::Stream(err.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            // Park until stop; the stream keeps capturing while it lives.
            let _ = stop_rx.recv();
            drop(stream);
            tracing::debug!("input stream closed");
        });

        (ready_rx, stop_tx, handle)
    }
}

#[async_trait]
impl CaptureSource for Microphone {
    async fn start(&self, segments: mpsc::Sender<AudioSegment>) -> Result<(), DeviceError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(DeviceError::AlreadyStarted);
        }

        let (ready_rx, stop_tx, handle) = self.spawn_stream_thread();
        ready_rx
            .await
            .map_err(|_| DeviceError::Unavailable("capture thread died".to_string()))??;
        *self.stream_thread.lock() = Some(StreamThread { stop_tx, handle });
        *self.recording_start.lock() = Some(Instant::now());
        tracing::info!("recording started");

        // The flush task owns the segment sender; when it returns, the
        // channel closes.
        let buffer = Arc::clone(&self.buffer);
        let flush_stop = Arc::clone(&self.flush_stop);
        let dump_dir = self.dump_dir.clone();
        let sample_rate = self.sample_rate;
        let task = tokio::spawn(async move {
            let mut vad = PcmVad::new(PcmVadConfig::local_mic(sample_rate, CAPTURE_CHANNELS));
            let mut interval = tokio::time::interval(FLUSH_POLL);
            let mut ending = false;
            loop {
                if !ending {
                    tokio::select! {
                        _ = flush_stop.notified() => ending = true,
                        _ = interval.tick() => {}
                    }
                }

                let flushed = {
                    let buf = buffer.lock();
                    vad.scan(&buf, ending)
                        .map(|range| (range.clone(), buf[range].to_vec()))
                };
                if let Some((range, bytes)) = flushed {
                    match pcm_bytes_to_wav(&bytes, sample_rate, CAPTURE_CHANNELS) {
                        Ok(wav) => {
                            if let Some(dir) = &dump_dir {
                                debug_dump(
                                    dir.join(format!("segment-{}-{}.wav", range.start, range.end)),
                                    &wav,
                                );
                            }
                            let duration = Duration::from_secs_f64(
                                bytes.len() as f64 / (sample_rate as f64 * 2.0),
                            );
                            let segment = AudioSegment::input(
                                wav,
                                AudioFormat::Wav,
                                duration,
                                "microphone_capture",
                            );
                            if segments.send(segment).await.is_err() {
                                tracing::warn!("segment channel closed, capture flush stopping");
                                return;
                            }
                            // The end flush may leave more than one slice.
                            if ending {
                                continue;
                            }
                        }
                        Err(err) => {
                            tracing::error!(%err, "cannot encode capture slice, skipping it")
                        }
                    }
                }
                if ending {
                    tracing::info!("capture flush finished");
                    return;
                }
            }
        });
        *self.flush_task.lock() = Some(task);
        Ok(())
    }

    async fn stop(&self) -> Result<Vec<u8>, DeviceError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(DeviceError::Unavailable("capture never started".to_string()));
        }

        let first_stop = !self.stopped.swap(true, Ordering::SeqCst);
        if first_stop {
            if let Some(started) = *self.recording_start.lock() {
                tracing::info!(
                    recording_ms = started.elapsed().as_millis() as u64,
                    "recording stopped"
                );
            }

            // Tear the device down first so the buffer stops growing, then
            // let the flush task drain the tail and close the channel.
            let thread = self.stream_thread.lock().take();
            if let Some(thread) = thread {
                let _ = thread.stop_tx.send(());
                let _ = tokio::task::spawn_blocking(move || thread.handle.join()).await;
            }
            self.flush_stop.notify_one();
            let task = self.flush_task.lock().take();
            if let Some(task) = task {
                let _ = task.await;
            }
        }

        let buffer = self.buffer.lock();
        pcm_bytes_to_wav(&buffer, self.sample_rate, CAPTURE_CHANNELS)
            .map_err(|e| DeviceError::Stream(e.to_string()))
    }
}
