//! Session state machine for one telephony stream.
//!
//! The handler sits between the websocket pumps and the pipeline: inbound
//! frames feed the mu-law segmenter, outbound audio is companded and
//! wrapped in media frames. It implements both device seams against the
//! same state, which is what lets the orchestrator treat a phone call like
//! a microphone plus a speaker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use voicewire_codec::{encode_mulaw, mulaw_to_wav};
use voicewire_core::{
    AudioFormat, AudioSegment, CaptureSource, DeviceError, PcmBuffer, PlaybackDone, PlaybackSink,
};
use voicewire_pipeline::{MulawVad, MulawVadConfig, MulawVadEvent};

use crate::messages::{MediaFormat, MediaPayload, StreamMessage};
use crate::TelephonyError;

/// Wire sample rate, fixed by the protocol in both directions.
const WIRE_SAMPLE_RATE: u32 = 8000;

/// Whole-call recordings are upsampled to this rate.
const RECORDING_SAMPLE_RATE: u32 = 16000;

const OUTBOUND_QUEUE: usize = 100;

struct StreamState {
    stream_sid: Option<String>,
    start_time: Option<Instant>,
    /// Every inbound mu-law byte of the call, in arrival order.
    inbound: Vec<u8>,
    vad: MulawVad,
    last_inbound_seq: u64,
    outbound_seq: u64,
    outbound_chunk: u64,
    stopped: bool,
}

/// One phone call.
pub struct StreamHandler {
    state: Mutex<StreamState>,
    write_tx: Mutex<Option<mpsc::Sender<String>>>,
    segments: Mutex<Option<mpsc::Sender<AudioSegment>>>,
    capture_started: AtomicBool,
    capture_stopped: AtomicBool,
}

impl StreamHandler {
    /// Build a handler and the receiving end of its outbound frame queue.
    /// The transport writes each received string to the websocket and
    /// closes the socket gracefully when the queue closes.
    pub fn new() -> (Self, mpsc::Receiver<String>) {
        let (write_tx, write_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let handler = Self {
            state: Mutex::new(StreamState {
                stream_sid: None,
                start_time: None,
                inbound: Vec::new(),
                vad: MulawVad::new(MulawVadConfig::default()),
                last_inbound_seq: 0,
                outbound_seq: 0,
                outbound_chunk: 0,
                stopped: false,
            }),
            write_tx: Mutex::new(Some(write_tx)),
            segments: Mutex::new(None),
            capture_started: AtomicBool::new(false),
            capture_stopped: AtomicBool::new(false),
        };
        (handler, write_rx)
    }

    /// Total inbound audio received so far, in bytes (= samples).
    pub fn inbound_len(&self) -> usize {
        self.state.lock().inbound.len()
    }

    /// Dispatch one inbound text frame.
    ///
    /// Unknown events and payload mismatches are logged and survived; a
    /// frame that is not valid JSON is a protocol violation the caller
    /// should close the session over.
    pub async fn handle_message(&self, raw: &str) -> Result<(), TelephonyError> {
        let message: StreamMessage = serde_json::from_str(raw).map_err(|err| {
            tracing::error!(%err, frame = %raw, "cannot decode frame");
            TelephonyError::MalformedFrame(err.to_string())
        })?;

        tracing::debug!(frame = %message.log_render(), "received frame");

        match message.event.as_str() {
            "connected" => self.handle_connected(&message),
            "start" => self.handle_start(&message),
            "media" => self.handle_media(&message).await,
            "stop" => {
                if message.stop.is_none() {
                    tracing::error!("stop frame without stop payload");
                }
            }
            // `clear` carries no payload and needs no state change; treat
            // it like a mark.
            "mark" | "clear" => {
                if message.event == "mark" && message.mark.is_none() {
                    tracing::error!("mark frame without mark payload");
                }
            }
            other => tracing::error!(event = other, "unknown frame event"),
        }
        Ok(())
    }

    fn handle_connected(&self, message: &StreamMessage) {
        if message.protocol.as_deref() != Some("Call") {
            tracing::error!(protocol = ?message.protocol, "unexpected protocol");
        }
        if message.version.as_deref() != Some("1.0.0") {
            tracing::error!(version = ?message.version, "unexpected protocol version");
        }
    }

    fn handle_start(&self, message: &StreamMessage) {
        let Some(start) = &message.start else {
            tracing::error!("start frame without start payload");
            return;
        };

        if !start.tracks.iter().any(|t| t == "inbound") {
            tracing::error!(tracks = ?start.tracks, "'inbound' missing from tracks");
        }
        // "outbound" in tracks would mean our own audio gets echoed back.
        if start.tracks.iter().any(|t| t == "outbound") {
            tracing::error!(tracks = ?start.tracks, "'outbound' unexpectedly present in tracks");
        }
        if start.media_format != MediaFormat::mulaw_8k() {
            tracing::error!(format = ?start.media_format, "unexpected media format");
        }

        let mut state = self.state.lock();
        state.stream_sid = Some(start.stream_sid.clone());
        state.start_time = Some(Instant::now());
        tracing::info!(stream_sid = %start.stream_sid, "stream started");
    }

    async fn handle_media(&self, message: &StreamMessage) {
        let Some(media) = &message.media else {
            tracing::error!("media frame without media payload");
            return;
        };
        if media.track != "inbound" {
            tracing::debug!(track = %media.track, "ignoring non-inbound media");
            return;
        }

        let bytes = match BASE64.decode(&media.payload) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(%err, "cannot decode media payload, skipping frame");
                return;
            }
        };

        let emissions = {
            let mut state = self.state.lock();
            if let Ok(seq) = message.sequence_number.parse::<u64>() {
                state.last_inbound_seq = seq;
            }

            let StreamState { inbound, vad, .. } = &mut *state;
            inbound.extend_from_slice(&bytes);

            let mut emissions: Vec<Result<AudioSegment, voicewire_codec::CodecError>> = Vec::new();
            for event in vad.advance(inbound) {
                match event {
                    MulawVadEvent::Segment(range) => {
                        emissions.push(segment_from_slice(&inbound[range]));
                    }
                    MulawVadEvent::EndOfTurn => {
                        emissions.push(Ok(AudioSegment::submit("telephony_capture")));
                    }
                }
            }
            emissions
        };

        let Some(segments) = self.segments.lock().clone() else {
            if !emissions.is_empty() {
                tracing::warn!("segments ready before capture started, dropping them");
            }
            return;
        };
        for emission in emissions {
            match emission {
                Ok(segment) => {
                    if segments.send(segment).await.is_err() {
                        tracing::warn!("segment channel closed, dropping emission");
                        return;
                    }
                }
                Err(err) => tracing::error!(%err, "cannot encode segment, dropping it"),
            }
        }
    }

    /// Stamp counters and the session id onto an outbound frame and queue
    /// it for the transport. Frames after `close` are dropped.
    async fn send_frame(&self, mut message: StreamMessage) -> Result<(), TelephonyError> {
        let rendered = {
            let mut state = self.state.lock();
            if state.stopped {
                tracing::debug!("session stopped, dropping outbound frame");
                return Ok(());
            }
            state.outbound_seq += 1;
            message.sequence_number = state.outbound_seq.to_string();
            message.stream_sid = state.stream_sid.clone();
            serde_json::to_string(&message)
                .map_err(|err| TelephonyError::MalformedFrame(err.to_string()))?
        };

        tracing::debug!(frame = %message.log_render(), "sending frame");

        let tx = self.write_tx.lock().clone();
        match tx {
            Some(tx) => tx.send(rendered).await.map_err(|_| TelephonyError::Closed),
            None => Err(TelephonyError::Closed),
        }
    }

    /// End the session: no more outbound frames, and the closed write
    /// queue tells the transport to close the websocket, which in turn
    /// ends the inbound read loop.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        drop(state);
        if self.write_tx.lock().take().is_some() {
            tracing::info!("outbound frame queue closed");
        }
    }
}

fn segment_from_slice(mulaw: &[u8]) -> Result<AudioSegment, voicewire_codec::CodecError> {
    let wav = mulaw_to_wav(mulaw, WIRE_SAMPLE_RATE, WIRE_SAMPLE_RATE)?;
    let duration = Duration::from_secs_f64(mulaw.len() as f64 / WIRE_SAMPLE_RATE as f64);
    Ok(AudioSegment::input(
        wav,
        AudioFormat::Wav,
        duration,
        "telephony_capture",
    ))
}

#[async_trait]
impl CaptureSource for StreamHandler {
    async fn start(&self, segments: mpsc::Sender<AudioSegment>) -> Result<(), DeviceError> {
        if self.capture_started.swap(true, Ordering::SeqCst) {
            return Err(DeviceError::AlreadyStarted);
        }
        *self.segments.lock() = Some(segments);
        tracing::info!("telephony capture started");
        Ok(())
    }

    async fn stop(&self) -> Result<Vec<u8>, DeviceError> {
        // Flush whatever speech the segmenter still holds open, then close
        // the segment channel and hand back the whole-call recording.
        let (leftover, recording) = {
            let mut state = self.state.lock();
            let StreamState { inbound, vad, .. } = &mut *state;
            let leftover = vad.finish(inbound.len()).map(|range| segment_from_slice(&inbound[range]));
            let recording = mulaw_to_wav(inbound, WIRE_SAMPLE_RATE, RECORDING_SAMPLE_RATE)
                .map_err(|e| DeviceError::Stream(e.to_string()))?;
            (leftover, recording)
        };

        let segments = self.segments.lock().take();
        if self.capture_stopped.swap(true, Ordering::SeqCst) {
            return Ok(recording);
        }
        if let (Some(segments), Some(leftover)) = (&segments, leftover) {
            match leftover {
                Ok(segment) => {
                    let _ = segments.send(segment).await;
                }
                Err(err) => tracing::error!(%err, "cannot encode final segment"),
            }
        }
        let (inbound_bytes, last_inbound_seq) = {
            let state = self.state.lock();
            (state.inbound.len(), state.last_inbound_seq)
        };
        tracing::info!(inbound_bytes, last_inbound_seq, "telephony capture stopped");
        Ok(recording)
    }
}

#[async_trait]
impl PlaybackSink for StreamHandler {
    async fn play(&self, audio: PcmBuffer) -> Result<Option<PlaybackDone>, DeviceError> {
        let mulaw =
            encode_mulaw(&audio, WIRE_SAMPLE_RATE).map_err(|e| DeviceError::Stream(e.to_string()))?;
        let payload = BASE64.encode(mulaw);

        let (chunk, timestamp_ms) = {
            let mut state = self.state.lock();
            state.outbound_chunk += 1;
            let elapsed = state
                .start_time
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or(0);
            (state.outbound_chunk, elapsed)
        };

        let message = StreamMessage {
            event: "media".to_string(),
            media: Some(MediaPayload {
                track: "outbound".to_string(),
                chunk: chunk.to_string(),
                timestamp: timestamp_ms.to_string(),
                payload,
            }),
            ..Default::default()
        };

        self.send_frame(message)
            .await
            .map_err(|_| DeviceError::Closed)?;
        // No protocol-level acknowledgement to wait on.
        Ok(None)
    }

    async fn stop(&self) -> Result<(), DeviceError> {
        // Frames already queued are already on the wire as far as we are
        // concerned; there is nothing to truncate.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn start_frame(sid: &str) -> String {
        json!({
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "streamSid": sid,
                "accountSid": "AC0",
                "callSid": "CA0",
                "tracks": ["inbound"],
                "customParameters": {},
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
            },
            "streamSid": sid
        })
        .to_string()
    }

    fn media_frame(seq: u64, track: &str, bytes: &[u8]) -> String {
        json!({
            "event": "media",
            "sequenceNumber": seq.to_string(),
            "media": {
                "track": track,
                "chunk": seq.to_string(),
                "timestamp": "0",
                "payload": BASE64.encode(bytes)
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn inbound_speech_then_silence_produces_segment_and_submit() {
        let (handler, _write_rx) = StreamHandler::new();
        let (seg_tx, mut seg_rx) = mpsc::channel(16);
        handler.start(seg_tx).await.unwrap();

        handler.handle_message(&start_frame("MZ1")).await.unwrap();

        // Three seconds of speech then five of silence, in 20 ms frames.
        let mut stream = vec![0x7Bu8; 24_000];
        stream.extend(vec![0xFFu8; 40_000]);
        let mut seq = 2;
        for frame in stream.chunks(160) {
            handler
                .handle_message(&media_frame(seq, "inbound", frame))
                .await
                .unwrap();
            seq += 1;
        }

        let segment = seg_rx.recv().await.unwrap();
        assert_eq!(segment.kind, voicewire_core::SegmentKind::Input);
        assert_eq!(segment.format, AudioFormat::Wav);
        // Three seconds at the wire rate.
        assert_eq!(segment.duration, Duration::from_secs(3));

        let submit = seg_rx.recv().await.unwrap();
        assert!(submit.is_submit());
    }

    #[tokio::test]
    async fn non_inbound_media_advances_nothing() {
        let (handler, _write_rx) = StreamHandler::new();
        handler.handle_message(&start_frame("MZ1")).await.unwrap();

        handler
            .handle_message(&media_frame(2, "outbound", &[0x7B; 160]))
            .await
            .unwrap();
        assert_eq!(handler.inbound_len(), 0);

        handler
            .handle_message(&media_frame(3, "inbound", &[0x7B; 160]))
            .await
            .unwrap();
        assert_eq!(handler.inbound_len(), 160);
    }

    #[tokio::test]
    async fn outbound_frames_carry_monotonic_counters() {
        let (handler, mut write_rx) = StreamHandler::new();
        handler.handle_message(&start_frame("MZ9")).await.unwrap();

        let silence = PcmBuffer::mono16(vec![0; 800], 8000);
        handler.play(silence.clone()).await.unwrap();
        handler.play(silence).await.unwrap();

        let first: StreamMessage =
            serde_json::from_str(&write_rx.recv().await.unwrap()).unwrap();
        let second: StreamMessage =
            serde_json::from_str(&write_rx.recv().await.unwrap()).unwrap();

        assert_eq!(first.event, "media");
        assert_eq!(first.sequence_number, "1");
        assert_eq!(second.sequence_number, "2");
        assert_eq!(first.media.as_ref().unwrap().chunk, "1");
        assert_eq!(second.media.as_ref().unwrap().chunk, "2");
        assert_eq!(first.stream_sid.as_deref(), Some("MZ9"));
        assert_eq!(first.media.as_ref().unwrap().track, "outbound");
    }

    #[tokio::test]
    async fn outbound_payload_is_wire_rate_mulaw() {
        let (handler, mut write_rx) = StreamHandler::new();
        handler.handle_message(&start_frame("MZ9")).await.unwrap();

        // One second at 16 kHz becomes one second at the 8 kHz wire rate.
        let audio = PcmBuffer::mono16(vec![0; 16_000], 16_000);
        handler.play(audio).await.unwrap();

        let frame: StreamMessage = serde_json::from_str(&write_rx.recv().await.unwrap()).unwrap();
        let payload = BASE64
            .decode(&frame.media.unwrap().payload)
            .expect("valid base64");
        assert_eq!(payload.len(), 8000);
        assert!(payload.iter().all(|&b| b == 0xFF));
    }

    #[tokio::test]
    async fn close_drops_further_outbound_frames() {
        let (handler, mut write_rx) = StreamHandler::new();
        handler.handle_message(&start_frame("MZ9")).await.unwrap();
        handler.close();

        handler
            .play(PcmBuffer::mono16(vec![0; 80], 8000))
            .await
            .unwrap();
        // Queue is closed and nothing was sent.
        assert!(write_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn capture_stop_returns_upsampled_recording_and_closes_channel() {
        let (handler, _write_rx) = StreamHandler::new();
        let (seg_tx, mut seg_rx) = mpsc::channel(16);
        handler.start(seg_tx).await.unwrap();
        handler.handle_message(&start_frame("MZ1")).await.unwrap();

        handler
            .handle_message(&media_frame(2, "inbound", &[0x7B; 1600]))
            .await
            .unwrap();

        let recording = CaptureSource::stop(&handler).await.unwrap();
        let decoded = voicewire_codec::decode_wav(&recording).unwrap();
        assert_eq!(decoded.sample_rate, 16_000);
        assert_eq!(decoded.data.len(), 3200);

        // The open 200 ms of speech was flushed as a final segment.
        let segment = seg_rx.recv().await.unwrap();
        assert_eq!(segment.duration, Duration::from_millis(200));
        assert!(seg_rx.recv().await.is_none(), "segment channel closed");
    }

    #[tokio::test]
    async fn bad_json_is_a_protocol_violation() {
        let (handler, _write_rx) = StreamHandler::new();
        assert!(handler.handle_message("{not json").await.is_err());
    }

    #[tokio::test]
    async fn unknown_event_is_survived() {
        let (handler, _write_rx) = StreamHandler::new();
        let raw = json!({"event": "dtmf", "sequenceNumber": "4"}).to_string();
        assert!(handler.handle_message(&raw).await.is_ok());
    }

    #[tokio::test]
    async fn double_capture_start_is_rejected() {
        let (handler, _write_rx) = StreamHandler::new();
        let (seg_tx, _seg_rx) = mpsc::channel(1);
        handler.start(seg_tx).await.unwrap();
        let (seg_tx2, _seg_rx2) = mpsc::channel(1);
        assert!(matches!(
            handler.start(seg_tx2).await,
            Err(DeviceError::AlreadyStarted)
        ));
    }
}
