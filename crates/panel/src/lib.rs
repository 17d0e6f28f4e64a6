//! Peerlink panel adapter
//!
//! A uniform peer-management interface over an upstream VPN panel whose REST
//! shape varies between versions. The client probes an ordered list of
//! candidate request shapes, normalizes whatever peer representation comes
//! back, and validates downloaded configuration text before it is handed to
//! an end user.

pub mod client;
pub mod normalize;
pub mod probe;
pub mod wgconfig;

pub use client::{CreatePeerOptions, PanelClient};
pub use normalize::Peer;
pub use probe::{Candidate, Method};
pub use wgconfig::{is_client_config, normalize, NormalizeOptions};
