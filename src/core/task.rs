//! Canonical task envelope and its wire format.
//!
//! Envelopes are immutable once enqueued: the dispatcher stamps
//! `ts_enqueue` when it first places a task into a queue and nothing
//! downstream rewrites it. Unknown fields round-trip through the
//! `extras` map so older and newer components can share a broker.

use serde::{Deserialize, Serialize};

use crate::Result;

fn default_cpu_units() -> u32 {
    1
}

fn default_scale() -> String {
    "1280:720".to_string()
}

fn default_vcodec() -> String {
    "h264".to_string()
}

fn default_preset() -> String {
    "veryfast".to_string()
}

fn default_crf() -> u32 {
    28
}

/// Resolved encode parameters carried inside a task envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeProfile {
    /// Output scale filter, e.g. `1280:720`.
    #[serde(default = "default_scale")]
    pub scale: String,
    /// Video codec family: `h264`, or `hevc`/`h265`.
    #[serde(default = "default_vcodec")]
    pub vcodec: String,
    /// Encoder preset.
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Constant rate factor (quality knob).
    #[serde(default = "default_crf")]
    pub crf: u32,
    /// Optional codec thread cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vthreads: Option<u32>,
    /// Optional filter thread cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fthreads: Option<u32>,
}

impl Default for EncodeProfile {
    fn default() -> Self {
        Self {
            scale: default_scale(),
            vcodec: default_vcodec(),
            preset: default_preset(),
            crf: default_crf(),
            vthreads: None,
            fthreads: None,
        }
    }
}

impl EncodeProfile {
    /// Library name for the codec family.
    pub fn codec_lib(&self) -> &'static str {
        match self.vcodec.to_ascii_lowercase().as_str() {
            "hevc" | "h265" => "libx265",
            _ => "libx264",
        }
    }
}

/// The immutable descriptor of one unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    /// Input locator (opaque to the scheduler).
    pub input: String,
    /// Output locator; must be writable by the worker.
    pub output: String,
    #[serde(flatten)]
    pub profile: EncodeProfile,
    /// vCPU demand used for capacity accounting and core-pool selection.
    #[serde(default = "default_cpu_units")]
    pub cpu_units: u32,
    /// Broker-side submission timestamp (epoch ms); set once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts_enqueue: Option<i64>,
    /// Ordering key for strict global FIFO under concurrent submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Explicit cpuset (injected by the worker in exclusive mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpuset: Option<String>,
    /// CPU quota percent (injected by the worker in shared mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_quota: Option<u32>,
    /// CPU weight hint (injected by the worker in shared mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_weight: Option<u32>,
    /// Resource-scope unit name for quota adjustments (shared mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_name: Option<String>,
    /// Unknown fields, preserved for forward compatibility.
    #[serde(flatten)]
    pub extras: serde_json::Map<String, serde_json::Value>,
}

impl TaskEnvelope {
    /// New envelope for `input` -> `output` with the given profile.
    pub fn new(input: impl Into<String>, output: impl Into<String>, profile: EncodeProfile) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            profile,
            cpu_units: 1,
            ts_enqueue: None,
            seq: None,
            cpuset: None,
            cpu_quota: None,
            cpu_weight: None,
            unit_name: None,
            extras: serde_json::Map::new(),
        }
    }

    /// Parse an envelope from its JSON wire form.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// vCPU demand, clamped to at least 1.
    pub fn cpu_units(&self) -> u32 {
        self.cpu_units.max(1)
    }

    /// Arguments for the encode child process, in canonical order.
    pub fn encode_args(&self) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            self.input.clone(),
            "-vf".to_string(),
            format!("scale={}", self.profile.scale),
            "-c:v".to_string(),
            self.profile.codec_lib().to_string(),
            "-preset".to_string(),
            self.profile.preset.clone(),
            "-crf".to_string(),
            self.profile.crf.to_string(),
        ];
        if let Some(vthreads) = self.profile.vthreads {
            args.push("-threads:v".to_string());
            args.push(vthreads.to_string());
        }
        if let Some(fthreads) = self.profile.fthreads {
            args.push("-filter_threads".to_string());
            args.push(fthreads.to_string());
        }
        args.push("-c:a".to_string());
        args.push("copy".to_string());
        args.push(self.output.clone());
        args
    }
}
