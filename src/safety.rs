//! Secret scrubbing for anything that leaves a bound tool.
//!
//! Tool results and error strings flow into conversation memory, logs and the
//! caller's `TurnResult`. The leak detector removes the session's own access
//! token plus anything shaped like a platform token before that happens.

use std::sync::LazyLock;

use regex::Regex;
use secrecy::{ExposeSecret, SecretString};

const REDACTED: &str = "[REDACTED]";

/// `access_token=...` in URLs echoed back by the platform.
static ACCESS_TOKEN_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(access_token=)[^&\s]+").expect("static regex")
});

/// Meta user/page/system-user tokens (`EAA...`) and bearer headers.
static TOKEN_SHAPES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bEAA[A-Za-z0-9]{20,}\b|(?i:bearer)\s+[A-Za-z0-9._\-]{16,}")
        .expect("static regex")
});

/// Scrubs credential material from text, for one session.
pub struct LeakDetector {
    known_secrets: Vec<SecretString>,
}

impl LeakDetector {
    /// A detector that only applies the generic token patterns.
    pub fn new() -> Self {
        Self {
            known_secrets: Vec::new(),
        }
    }

    /// Also redact this exact secret wherever it appears.
    pub fn with_secret(mut self, secret: &SecretString) -> Self {
        if !secret.expose_secret().trim().is_empty() {
            self.known_secrets
                .push(SecretString::from(secret.expose_secret().to_owned()));
        }
        self
    }

    /// Scrub sensitive data from `content`.
    pub fn scrub(&self, content: &str) -> String {
        let mut out = content.to_string();
        for secret in &self.known_secrets {
            let secret = secret.expose_secret();
            if out.contains(secret) {
                out = out.replace(secret, REDACTED);
            }
        }
        let out = ACCESS_TOKEN_PARAM.replace_all(&out, format!("${{1}}{REDACTED}"));
        TOKEN_SHAPES.replace_all(&out, REDACTED).into_owned()
    }

    /// Scrub every string inside a JSON value.
    pub fn scrub_json(&self, value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::String(s) => serde_json::Value::String(self.scrub(s)),
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(|v| self.scrub_json(v)).collect())
            }
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.scrub_json(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

impl Default for LeakDetector {
    fn default() -> Self {
        Self::new()
    }
}
