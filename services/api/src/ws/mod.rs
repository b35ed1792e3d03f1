//! WebSocket Session Management
//!
//! - `protocol`: the JSON messages exchanged with clients.
//! - `session`: connection lifecycle and per-session routing for `/ws/audio` and `/ws/text`.
//! - `cycle`: what happens to one final transcript (phrase gate, music, joke, speech).
//! - `provider`: streaming speech-to-text vendors (Deepgram).

mod cycle;
pub mod protocol;
pub mod provider;
pub mod session;

pub use session::{text_ws_handler, ws_handler};
