//! AttributionSession: wasm-bindgen facade over `AttributionEngine`
//!
//! # Usage (JS)
//! ```javascript
//! const session = new AttributionSession({ patterns: ["Kotori", "Tohka"] });
//! session.append("msg-1", "Kotori: ");
//! const update = session.append("msg-1", "Hello!");
//! // update.winner, update.decision
//! session.endBuffer("msg-1");
//! ```
//!
//! Timestamps come from `now_millis()`; the `*At` variants take them from JS.

use serde::de::DeserializeOwned;
use serde::Serialize;
use wasm_bindgen::prelude::*;

use crate::scanner::{Profile, ScanOptions, TokenizedText};
use crate::scene::{RosterSnapshot, RosterUpdate};
use crate::session::{now_millis, AttributionEngine};

fn to_js<T: Serialize>(value: &T) -> JsValue {
    match serde_wasm_bindgen::to_value(value) {
        Ok(v) => v,
        Err(e) => {
            web_sys::console::error_1(&format!("[AttributionSession] Serialization failed: {:?}", e).into());
            JsValue::NULL
        }
    }
}

/// `undefined` / `null` become `T::default()`
fn from_js<T: DeserializeOwned + Default>(value: JsValue, what: &str) -> Result<T, JsValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(T::default());
    }
    serde_wasm_bindgen::from_value(value)
        .map_err(|e| JsValue::from_str(&format!("Failed to parse {}: {}", what, e)))
}

#[wasm_bindgen]
pub struct AttributionSession {
    engine: AttributionEngine,
}

impl AttributionSession {
    pub fn new(profile: Profile) -> Self {
        let session = Self {
            engine: AttributionEngine::new(profile),
        };
        session.report_compile_errors();
        session
    }

    pub fn engine(&self) -> &AttributionEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut AttributionEngine {
        &mut self.engine
    }

    fn report_compile_errors(&self) {
        for err in self.engine.compile_errors() {
            web_sys::console::warn_1(&format!("[AttributionSession] {}", err).into());
        }
        if !self.engine.has_name_matchers() {
            web_sys::console::warn_1(&"[AttributionSession] no usable roster names; detection disabled".into());
        }
    }
}

// =============================================================================
// WASM Bindings
// =============================================================================

#[wasm_bindgen]
impl AttributionSession {
    /// Create a session from a profile object (omitted = defaults)
    #[wasm_bindgen(constructor)]
    pub fn js_new(profile: JsValue) -> Result<AttributionSession, JsValue> {
        let profile: Profile = from_js(profile, "profile")?;
        Ok(Self::new(profile))
    }

    /// Swap the profile; true if matchers were recompiled
    #[wasm_bindgen(js_name = "setProfile")]
    pub fn js_set_profile(&mut self, profile: JsValue) -> Result<bool, JsValue> {
        let profile: Profile = from_js(profile, "profile")?;
        let compiled = self.engine.set_profile(profile);
        if compiled {
            self.report_compile_errors();
        }
        Ok(compiled)
    }

    #[wasm_bindgen(js_name = "effectivePatterns")]
    pub fn js_effective_patterns(&self) -> JsValue {
        to_js(&self.engine.matchers().effective_patterns())
    }

    #[wasm_bindgen(js_name = "compileErrors")]
    pub fn js_compile_errors(&self) -> JsValue {
        let errors: Vec<String> = self
            .engine
            .compile_errors()
            .iter()
            .map(|e| e.to_string())
            .collect();
        to_js(&errors)
    }

    /// One-shot analysis; `tokens` is an optional `{ ids, offsets, chunks }`
    #[wasm_bindgen(js_name = "analyze")]
    pub fn js_analyze(&self, text: &str, options: JsValue, tokens: JsValue) -> Result<JsValue, JsValue> {
        let options: ScanOptions = from_js(options, "scan options")?;
        let analysis = if tokens.is_undefined() || tokens.is_null() {
            self.engine.analyze(text, &options)
        } else {
            let tokens: TokenizedText = from_js(tokens, "tokens")?;
            self.engine.analyze_tokenized(text, &options, &tokens)
        };
        Ok(to_js(&analysis))
    }

    #[wasm_bindgen(js_name = "append")]
    pub fn js_append(&mut self, buffer_id: &str, chunk: &str) -> JsValue {
        to_js(&self.engine.append(buffer_id, chunk, now_millis()))
    }

    #[wasm_bindgen(js_name = "appendAt")]
    pub fn js_append_at(&mut self, buffer_id: &str, chunk: &str, now: f64) -> JsValue {
        to_js(&self.engine.append(buffer_id, chunk, now as i64))
    }

    #[wasm_bindgen(js_name = "updateBuffer")]
    pub fn js_update_buffer(&mut self, buffer_id: &str, full_text: &str) -> JsValue {
        to_js(&self.engine.update_buffer(buffer_id, full_text, now_millis()))
    }

    #[wasm_bindgen(js_name = "updateBufferAt")]
    pub fn js_update_buffer_at(&mut self, buffer_id: &str, full_text: &str, now: f64) -> JsValue {
        to_js(&self.engine.update_buffer(buffer_id, full_text, now as i64))
    }

    /// Finish a buffer; `null` if it was unknown
    #[wasm_bindgen(js_name = "endBuffer")]
    pub fn js_end_buffer(&mut self, buffer_id: &str) -> JsValue {
        match self.engine.end_buffer(buffer_id, now_millis()) {
            Some(summary) => to_js(&summary),
            None => JsValue::NULL,
        }
    }

    #[wasm_bindgen(js_name = "resetBuffer")]
    pub fn js_reset_buffer(&mut self, buffer_id: &str) -> bool {
        self.engine.reset_buffer(buffer_id)
    }

    #[wasm_bindgen(js_name = "resetScene")]
    pub fn js_reset_scene(&mut self) {
        self.engine.reset_scene();
    }

    // ===== Roster =====

    /// Replace-style roster refresh; returns `{ joined, left }`
    #[wasm_bindgen(js_name = "updateRoster")]
    pub fn js_update_roster(&mut self, update: JsValue) -> Result<JsValue, JsValue> {
        let update: RosterUpdate = from_js(update, "roster update")?;
        Ok(to_js(&self.engine.roster_mut().update(update)))
    }

    /// Set one member's turn budget; `undefined` never expires
    #[wasm_bindgen(js_name = "setRosterMember")]
    pub fn js_set_roster_member(&mut self, name: &str, turns: Option<u32>) -> JsValue {
        to_js(self.engine.roster_mut().set_member(name, turns, now_millis()))
    }

    #[wasm_bindgen(js_name = "removeRosterMember")]
    pub fn js_remove_roster_member(&mut self, name: &str) -> bool {
        self.engine.roster_mut().remove_member(name).is_some()
    }

    #[wasm_bindgen(js_name = "activeNames")]
    pub fn js_active_names(&self) -> JsValue {
        to_js(&self.engine.roster().active_names())
    }

    #[wasm_bindgen(js_name = "rosterSnapshot")]
    pub fn js_roster_snapshot(&self) -> JsValue {
        to_js(&self.engine.roster().snapshot())
    }

    #[wasm_bindgen(js_name = "restoreRoster")]
    pub fn js_restore_roster(&mut self, snapshot: JsValue) -> Result<(), JsValue> {
        let snapshot: RosterSnapshot = from_js(snapshot, "roster snapshot")?;
        self.engine.roster_mut().restore(snapshot);
        Ok(())
    }

    // ===== Decision log =====

    /// Newest first; everything when `limit` is omitted
    #[wasm_bindgen(js_name = "decisionLog")]
    pub fn js_decision_log(&self, limit: Option<usize>) -> JsValue {
        let log = self.engine.decision_log();
        to_js(&log.recent(limit.unwrap_or(log.len())))
    }
}
