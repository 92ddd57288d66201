//! Session: scope state machine, Fragment Handler, and polling worker.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{Result, SecureSyncError};
use crate::filesink;
use crate::logging::{log_debug, log_error, log_info, log_verbose, log_warning};
use crate::message::{FragmentInfo, KeyMessage};
use crate::muxer::{FragmentContext, TrackMeta};
use crate::queue::{DelayQueue, ScopeDescriptor};
use crate::registry::{PublisherConfig, PublisherHandle, PublisherRegistry};

/// Worker poll interval: `EXMG_MESSAGE_QUEUE_WORKER_POLL` (20ms => 50fps) in
/// the original source.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

const MQTT_RETRY_BUDGET: i32 = 3;

struct ScopeState {
    key_scope_first_pts: i64,
    key_scope_duration: i64,
    key_frag_counter: u32,
    key_index_counter: u64,
    aes_key: [u8; 16],
    aes_iv: [u8; 16],
}

impl ScopeState {
    fn new() -> Self {
        ScopeState {
            key_scope_first_pts: 0,
            key_scope_duration: 0,
            key_frag_counter: 0,
            key_index_counter: 0,
            aes_key: [0u8; 16],
            aes_iv: [0u8; 16],
        }
    }

    fn key_low32(&self) -> u32 {
        u32::from_le_bytes([self.aes_key[0], self.aes_key[1], self.aes_key[2], self.aes_key[3]])
    }

    fn iv_low32(&self) -> u32 {
        u32::from_le_bytes([self.aes_iv[0], self.aes_iv[1], self.aes_iv[2], self.aes_iv[3]])
    }
}

/// One instance per muxing job. Owns the delay queue, worker thread, scope
/// state, and a reference to the shared MQTT publisher.
pub struct Session {
    config: Config,
    scope: Mutex<ScopeState>,
    queue: Arc<DelayQueue>,
    mqtt_pub: Option<Arc<PublisherHandle>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    worker_stop: Sender<()>,
    worker_stop_rx: Receiver<()>,
    running: Arc<AtomicBool>,
    /// Most recently observed track metadata, refreshed on every
    /// `on_fragment` call; the worker reads this as "current encoding media
    /// time" and as the track metadata the File Sink needs to build a
    /// per-track path — the queue item itself only carries media_time.
    last_track: Mutex<Option<TrackMeta>>,
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

impl Session {
    /// Initialise a session: read config, optionally acquire an MQTT
    /// publisher (pinging it), start the queue + worker.
    pub fn init(config: Config) -> Result<Arc<Session>> {
        let mqtt_pub = if config.mqtt_enabled {
            let handle = PublisherRegistry::acquire(&config.mqtt_url, config.mqtt_config.clone())?;
            // Send the health ping regardless of whether this initial connect
            // attempt itself succeeded: `publish`'s own reconnect/retry loop
            // gets its own shot at establishing the connection.
            handle.connect();
            let _ = handle.publish(b"ping\0", -1);
            Some(handle)
        } else {
            None
        };

        let (worker_stop, worker_stop_rx) = bounded(1);

        let session = Arc::new(Session {
            config,
            scope: Mutex::new(ScopeState::new()),
            queue: Arc::new(DelayQueue::new()),
            mqtt_pub,
            worker: Mutex::new(None),
            worker_stop,
            worker_stop_rx,
            running: Arc::new(AtomicBool::new(true)),
            last_track: Mutex::new(None),
        });

        let worker_session = session.clone();
        let handle = thread::spawn(move || worker_session.worker_loop());
        *session.worker.lock() = Some(handle);

        log_info!(
            "SECURESYNC",
            "initialized SecureSync encode/encrypt context. key-publish-delay={:.3}s fragments-per-key={}",
            session.config.publish_delay_secs,
            session.config.fragments_per_key
        );

        Ok(session)
    }

    pub fn publish_delay_secs(&self) -> f64 {
        self.config.publish_delay_secs
    }

    pub fn fragments_per_key(&self) -> u32 {
        self.config.fragments_per_key
    }

    pub fn is_encryption_enabled(&self) -> bool {
        self.config.is_encryption_enabled
    }

    pub fn key_index_max_window(&self) -> i64 {
        self.config.key_index_max_window
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Fragment Handler: invoked once per finalised fragment by the muxer.
    pub fn on_fragment(&self, ctx: &dyn FragmentContext) -> Result<()> {
        if !ctx.dash_flag_set() {
            return Ok(());
        }
        if ctx.stream_count() > 1 {
            log_error!("SECURESYNC", "does not support multiple tracks per DASH fragment");
            return Err(SecureSyncError::Config(
                "secure-sync does not support multiple tracks per DASH fragment".into(),
            ));
        }
        let track = match ctx.track() {
            Some(t) => t,
            None => {
                log_warning!(
                    "SECURESYNC",
                    "trying to push on queue, but default track is null (maybe shutting down)"
                );
                return Ok(());
            }
        };

        *self.last_track.lock() = Some(track);

        let mut scope = self.scope.lock();

        if scope.key_frag_counter == 0 {
            scope.key_scope_duration = 0;
            scope.key_scope_first_pts = track.frag_start;
            scope.key_index_counter += 1;

            let key: u32 = (rand::random::<u16>()) as u32;
            let iv: u32 = 0;

            log_verbose!(
                "SECURESYNC",
                "set key/iv pair for {} next fragments: {key} (0x{key:08X}) / {iv} (0x{iv:08X})",
                self.config.fragments_per_key
            );

            scope.aes_key = [0u8; 16];
            scope.aes_key[0..4].copy_from_slice(&key.to_le_bytes());
            scope.aes_iv = [0u8; 16];
            scope.aes_iv[0..4].copy_from_slice(&iv.to_le_bytes());
        }

        scope.key_frag_counter += 1;

        let frag_duration = track.end_pts - track.frag_start;
        if frag_duration > 0 {
            scope.key_scope_duration += frag_duration;
        } else if frag_duration == 0 {
            // Workaround for a missing duration (LLS/streaming=1 audio tracks).
            scope.key_scope_duration = track.frag_start - scope.key_scope_first_pts;
        }

        log_verbose!(
            "SECURESYNC",
            "fragment duration: {frag_duration}, key-scope so-far duration: {} ({} of {} fragments done)",
            scope.key_scope_duration,
            scope.key_frag_counter,
            self.config.fragments_per_key
        );

        if scope.key_frag_counter < self.config.fragments_per_key {
            return Ok(());
        }
        scope.key_frag_counter = 0;

        if frag_duration == 0 {
            scope.key_scope_duration += 1;
        }

        let message = self.format_message(&scope, &track);
        let wire_bytes = message.to_wire_bytes()?;

        log_debug!("SECURESYNC", "wrote key-message: {}", serde_json::to_string(&message).unwrap_or_default());

        let first_pts = scope.key_scope_first_pts;
        drop(scope);

        self.queue.push(ScopeDescriptor { message_bytes: wire_bytes, media_time: first_pts })?;
        log_verbose!(
            "SECURESYNC",
            "pushed key-message with scope starting at {:.3}s for track-id {}",
            first_pts as f64 / track.timescale as f64,
            track.track_id
        );
        Ok(())
    }

    fn format_message(&self, scope: &ScopeState, track: &TrackMeta) -> KeyMessage {
        let fragment_info = FragmentInfo {
            track_id: track.track_id,
            media_time_secs: scope.key_scope_first_pts as f64 / track.timescale as f64,
            first_pts: scope.key_scope_first_pts,
            duration: scope.key_scope_duration,
            timescale: track.timescale,
            codec_id: track.codec_id,
            codec_type: track.codec_type,
            bitrate: track.bit_rate,
        };
        KeyMessage::new(now_micros(), fragment_info, scope.key_index_counter, scope.key_low32(), scope.iv_low32())
    }

    /// One iteration of the Polling Worker, split out so
    /// tests can drive it deterministically without a real sleeping thread.
    pub fn poll_once(&self, now_secs: f64, timescale: u32) {
        self.poll_once_for_track(now_secs, timescale, None)
    }

    fn poll_once_for_track(&self, now_secs: f64, timescale: u32, track: Option<&TrackMeta>) {
        let delay = self.config.publish_delay_secs;
        let popped = self.queue.pop_if(|head| {
            let head_secs = head.media_time as f64 / timescale as f64;
            now_secs - head_secs >= delay
        });

        let Some(item) = popped else { return };

        if self.config.is_dry_run {
            log_warning!("SECURESYNC", "dry-run, not really publishing anything");
            return;
        }

        if let Some(basepath) = &self.config.fs_pub_basepath {
            let result = match track {
                Some(t) => filesink::publish_to_file_for_track(basepath, t, item.media_time, &item.message_bytes),
                None => filesink::publish_to_file(basepath, item.media_time, &item.message_bytes),
            };
            if let Err(e) = result {
                log_warning!("SECURESYNC", "file-sink error: {e}");
            }
        }

        if let Some(publisher) = &self.mqtt_pub {
            if let Err(e) = publisher.publish(&item.message_bytes, MQTT_RETRY_BUDGET) {
                log_warning!("SECURESYNC", "mqtt publish abandoned: {e}");
            }
        }
    }

    fn worker_loop(self: Arc<Self>) {
        while self.running.load(Ordering::Relaxed) {
            if self.worker_stop_rx.try_recv().is_ok() {
                break;
            }
            if let Some(track) = self.last_track.lock().clone() {
                let now_secs = track.frag_start as f64 / track.timescale as f64;
                self.poll_once_for_track(now_secs, track.timescale, Some(&track));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Teardown: cancel the
    /// worker, drain the queue (dropping, not publishing, what's left),
    /// and release the MQTT handle if this session held the last reference.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.worker_stop.send(());
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        self.queue.drain(|item| {
            log_warning!("SECURESYNC", "dropping queued key-message at media_time={} on shutdown", item.media_time);
        });
        if let Some(publisher) = &self.mqtt_pub {
            PublisherRegistry::release(publisher);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CodecType;
    use pretty_assertions::assert_eq;

    fn config(fragments_per_key: u32, delay: f64) -> Config {
        Config {
            is_dry_run: true,
            is_encryption_enabled: true,
            fs_pub_basepath: None,
            mqtt_enabled: false,
            mqtt_url: String::new(),
            mqtt_config: PublisherConfig {
                client_id: String::new(),
                user: String::new(),
                passwd: String::new(),
                topic: String::new(),
            },
            publish_delay_secs: delay,
            fragments_per_key,
            key_index_max_window: -1,
        }
    }

    fn track(frag_start: i64, end_pts: i64, timescale: u32) -> TrackMeta {
        TrackMeta {
            frag_start,
            end_pts,
            timescale,
            track_id: 1,
            codec_id: 27,
            codec_type: CodecType::Video,
            bit_rate: 500_000,
        }
    }

    fn dash_ctx(t: TrackMeta) -> crate::muxer::SimulatedFragmentContext {
        crate::muxer::SimulatedFragmentContext::single_track(t)
    }

    #[test]
    fn s1_single_scope_single_fragment() {
        let session = Session::init(config(1, 10.0)).unwrap();
        session.on_fragment(&dash_ctx(track(0, 2000, 1000))).unwrap();
        assert_eq!(session.queue_len(), 1);
        let popped = session.queue.pop_if(|_| true).unwrap();
        assert_eq!(popped.media_time, 0);
        let s = String::from_utf8(popped.message_bytes).unwrap();
        assert!(s.contains("\"first_pts\":0"));
        assert!(s.contains("\"duration\":2000"));
        assert!(s.contains("\"key_id\":1"));
        session.shutdown();
    }

    #[test]
    fn s2_two_fragment_scope_emits_once() {
        let session = Session::init(config(2, 10.0)).unwrap();
        session.on_fragment(&dash_ctx(track(0, 2000, 1000))).unwrap();
        assert_eq!(session.queue_len(), 0);
        session.on_fragment(&dash_ctx(track(2000, 4000, 1000))).unwrap();
        assert_eq!(session.queue_len(), 1);
        let popped = session.queue.pop_if(|_| true).unwrap();
        assert_eq!(popped.media_time, 0);
        let s = String::from_utf8(popped.message_bytes).unwrap();
        assert!(s.contains("\"first_pts\":0"));
        assert!(s.contains("\"duration\":4000"));
        assert!(s.contains("\"key_id\":1"));
        session.shutdown();
    }

    #[test]
    fn s4_zero_duration_audio_fragment_increments_duration() {
        let session = Session::init(config(1, 10.0)).unwrap();
        session.on_fragment(&dash_ctx(track(1000, 1000, 1000))).unwrap();
        let popped = session.queue.pop_if(|_| true).unwrap();
        let s = String::from_utf8(popped.message_bytes).unwrap();
        // key_scope_first_pts == frag_start == 1000, so duration = 1000 - 1000 + 1 = 1
        assert!(s.contains("\"duration\":1"));
        session.shutdown();
    }

    #[test]
    fn s3_delay_gating() {
        let session = Session::init(config(1, 10.0)).unwrap();
        session.on_fragment(&dash_ctx(track(0, 2000, 1000))).unwrap();
        session.poll_once(5.0, 1000);
        assert_eq!(session.queue_len(), 1, "must not release before delay elapses");
        session.poll_once(10.01, 1000);
        assert_eq!(session.queue_len(), 0, "must release once delay has elapsed");
        session.shutdown();
    }

    #[test]
    fn key_index_counter_strictly_increasing() {
        let session = Session::init(config(1, 10.0)).unwrap();
        for i in 0..3 {
            let start = i * 2000;
            session.on_fragment(&dash_ctx(track(start, start + 2000, 1000))).unwrap();
        }
        let mut ids = vec![];
        while let Some(item) = session.queue.pop_if(|_| true) {
            let s = String::from_utf8(item.message_bytes).unwrap();
            let v: serde_json::Value = serde_json::from_str(s.trim_end_matches('\0')).unwrap();
            ids.push(v["key_id"].as_u64().unwrap());
        }
        assert_eq!(ids, vec![1, 2, 3]);
        session.shutdown();
    }

    #[test]
    fn multi_stream_is_rejected() {
        let session = Session::init(config(1, 10.0)).unwrap();
        let ctx = crate::muxer::SimulatedFragmentContext {
            dash_mode: true,
            streams: vec![track(0, 2000, 1000), track(0, 2000, 1000)],
            current: Some(0),
        };
        assert!(session.on_fragment(&ctx).is_err());
        session.shutdown();
    }

    #[test]
    fn null_track_is_silently_ignored() {
        let session = Session::init(config(1, 10.0)).unwrap();
        let ctx = crate::muxer::SimulatedFragmentContext { dash_mode: true, streams: vec![], current: None };
        assert!(session.on_fragment(&ctx).is_ok());
        assert_eq!(session.queue_len(), 0);
        session.shutdown();
    }

    #[test]
    fn non_dash_mode_is_silently_ignored() {
        let session = Session::init(config(1, 10.0)).unwrap();
        let mut ctx = dash_ctx(track(0, 2000, 1000));
        ctx.dash_mode = false;
        assert!(session.on_fragment(&ctx).is_ok());
        assert_eq!(session.queue_len(), 0);
        session.shutdown();
    }
}
