//! Sync tuning knobs with conservative defaults.

/// Options for the debounced persister.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Quiet period after the last edit before a persist fires.
    pub debounce_ms: u64,
    /// Hard ceiling on any single remote call.
    pub request_timeout_ms: u64,
    /// Provenance string recorded as `last_update_source` on every write.
    pub source: String,
    /// Stable per-client identifier, recorded for forensics.
    pub client_id: Option<String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            debounce_ms: 2_000,
            request_timeout_ms: 10_000,
            source: "autosync".to_string(),
            client_id: None,
        }
    }
}

impl SyncOptions {
    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}
