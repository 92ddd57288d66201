//! Secure-Sync: key-publication pipeline for DASH fragment muxing.
//!
//! A muxer feeds finalised fragments into [`Session::on_fragment`], which
//! tracks encryption scope boundaries, builds key-publication messages, and
//! hands them to a delayed-publish worker that fans them out to an MQTT
//! broker and/or a file sink.

pub mod config;
pub mod error;
pub mod filesink;
pub mod logging;
pub mod message;
pub mod muxer;
pub mod queue;
pub mod registry;
pub mod session;

pub use config::Config;
pub use error::{Result, SecureSyncError};
pub use message::{CodecType, FragmentInfo, KeyMessage};
pub use muxer::{FragmentContext, SimulatedFragmentContext, TrackMeta};
pub use queue::{DelayQueue, ScopeDescriptor};
pub use registry::{PublisherConfig, PublisherHandle, PublisherRegistry};
pub use session::Session;
