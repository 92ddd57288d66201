//! Narrow contact surface standing in for the external DASH muxer.
use crate::message::CodecType;

/// Per-track fragment metadata the muxer exposes read-only, once per
/// finalised fragment.
#[derive(Debug, Clone, Copy)]
pub struct TrackMeta {
    pub frag_start: i64,
    pub end_pts: i64,
    pub timescale: u32,
    pub track_id: i32,
    pub codec_id: i32,
    pub codec_type: CodecType,
    pub bit_rate: i64,
}

/// What the Fragment Handler needs from the muxer on every callback.
///
/// A production integration implements this over the real muxer context;
/// `SimulatedFragmentContext` below drives tests and the demo binary.
pub trait FragmentContext {
    /// Whether the muxer is currently operating in DASH mode
    /// (`mov->flags & FF_MOV_FLAG_DASH`).
    fn dash_flag_set(&self) -> bool;

    /// Number of streams/tracks the muxer currently exposes.
    fn stream_count(&self) -> usize;

    /// The single track's metadata, or `None` during late-shutdown races
    /// Late-shutdown races can leave this `None` even in DASH mode.
    fn track(&self) -> Option<TrackMeta>;
}

/// A fixed, pre-programmed fragment sequence: used by tests and the demo
/// binary to drive `Session::on_fragment` without a real muxer.
pub struct SimulatedFragmentContext {
    pub dash_mode: bool,
    pub streams: Vec<TrackMeta>,
    pub current: Option<usize>,
}

impl SimulatedFragmentContext {
    pub fn single_track(track: TrackMeta) -> Self {
        SimulatedFragmentContext { dash_mode: true, streams: vec![track], current: Some(0) }
    }
}

impl FragmentContext for SimulatedFragmentContext {
    fn dash_flag_set(&self) -> bool {
        self.dash_mode
    }

    fn stream_count(&self) -> usize {
        self.streams.len()
    }

    fn track(&self) -> Option<TrackMeta> {
        self.current.and_then(|i| self.streams.get(i).copied())
    }
}
