use anyhow::Context;
use exmg_secure_sync::message::CodecType;
use exmg_secure_sync::muxer::{SimulatedFragmentContext, TrackMeta};
use exmg_secure_sync::{Config, Session};

/// Drives a `Session` with a small, hand-built fragment sequence so the
/// pipeline can be exercised end to end without a real muxer attached.
fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    let session = Session::init(config).context("failed to initialize secure-sync session")?;

    let timescale = 1000u32;
    for i in 0..6i64 {
        let frag_start = i * 2000;
        let end_pts = frag_start + 2000;
        let track = TrackMeta {
            frag_start,
            end_pts,
            timescale,
            track_id: 1,
            codec_id: 27,
            codec_type: CodecType::Video,
            bit_rate: 2_500_000,
        };
        let ctx = SimulatedFragmentContext::single_track(track);
        session.on_fragment(&ctx)?;
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    std::thread::sleep(std::time::Duration::from_secs_f64(session.publish_delay_secs() + 1.0));
    session.shutdown();
    Ok(())
}
