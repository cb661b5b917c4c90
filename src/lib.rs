//! CueCore: Streaming Speaker Attribution Engine
//!
//! A Rust/WASM engine that decides, while a chat message is still streaming,
//! which character it belongs to.
//!
//! # Architecture
//!
//! ## Scanner Components
//! - `profile.rs` - Profile: roster identities, vocabularies, weights, toggles
//! - `patterns.rs` - MatcherSet: per-kind matchers compiled from a Profile
//! - `quotes.rs` - QuoteSpanState: incremental dialogue/narration tracking
//! - `tokens.rs` - TokenProjector: char offsets <-> token indices
//! - `collector.rs` - MatchCollector: windowed, quote-aware match collection
//! - `fuzzy.rs` - NameResolver: alias / accent-fold / edit-distance rescue
//!
//! ## Scoring & Scene
//! - `scoring/` - AttributionScorer: per-match scores, winner, scene ranking
//! - `scene/` - SceneRoster (turn-based TTL) and DecisionLog
//!
//! ## Session
//! - `session.rs` - AttributionEngine: matcher cache, stream buffers, switch gate
//! - `wasm.rs` - AttributionSession: browser facade
//!
//! # Usage (Rust)
//! ```rust
//! use cuecore::{AttributionEngine, Profile};
//!
//! let mut engine = AttributionEngine::new(Profile::with_names(["Kotori", "Tohka"]));
//! engine.append("msg-1", "Tohka stepped ", 0);
//! let update = engine.append("msg-1", "forward.", 1);
//! assert_eq!(update.winner.unwrap().detection.name, "Tohka");
//! ```
//!
//! # Usage (WASM)
//! ```javascript,ignore
//! import init, { AttributionSession } from 'cuecore';
//!
//! await init();
//! const session = new AttributionSession({ patterns: ['Kotori', 'Tohka'] });
//! const result = session.analyze('Kotori: "Hello!"');
//! console.log(result.winner, result.stats);
//! ```

pub mod error;
pub mod scanner;
pub mod scene;
pub mod scoring;
pub mod session;
pub mod wasm;

pub use error::*;
pub use scanner::*;
pub use scene::*;
pub use scoring::*;
pub use session::*;
pub use wasm::AttributionSession;

use wasm_bindgen::prelude::*;

// When the `wee_alloc` feature is enabled, use `wee_alloc` as the global
// allocator for smaller WASM bundle size.
#[cfg(feature = "wee_alloc")]
#[global_allocator]
static ALLOC: wee_alloc::WeeAlloc = wee_alloc::WeeAlloc::INIT;

/// Initialize panic hook for better error messages in browser console
#[wasm_bindgen(start)]
pub fn main() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Get version information
#[wasm_bindgen]
pub fn version() -> String {
    format!("cuecore v{}", env!("CARGO_PKG_VERSION"))
}
