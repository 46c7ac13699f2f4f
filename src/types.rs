use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of probing a device's supported ABI list.
///
/// "No tags reported" and "the probe itself failed" are kept distinct on
/// purpose: they produce different fallback labels so an operator can tell
/// a genuinely tagless device apart from a broken probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiProbe {
    Tags(Vec<String>),
    Empty,
    Failed,
}

impl AbiProbe {
    /// Label fragment for the device's primary ABI (first entry of the
    /// reported list), or the applicable fallback sentinel.
    pub fn primary_label(&self) -> &str {
        match self {
            Self::Tags(tags) => tags.first().map(String::as_str).unwrap_or("unknownabi"),
            Self::Empty => "generic-android-abi",
            Self::Failed => "abi-detection-failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAttrs {
    pub model: String,
    pub sdk: String,
    pub abis: AbiProbe,
}

/// Normalize a getprop value for use inside a runner name: spaces become
/// underscores, dashes are dropped (they are the name's field separator).
pub fn sanitize_prop(raw: &str) -> String {
    raw.trim().replace(' ', "_").replace('-', "")
}

/// Deterministic runner name shown in the GitHub UI, e.g.
/// `ANDROID-Pixel7-SDK34-ABC123`. Doubled underscores (from models whose
/// sanitized name runs two replacements together) are collapsed.
pub fn runner_name(attrs: &DeviceAttrs, serial: &str) -> String {
    format!("ANDROID-{}-SDK{}-{}", attrs.model, attrs.sdk, serial).replace("__", "_")
}

/// Label set for job targeting: every runner is `self-hosted` plus one
/// `Android-<primary abi>` label.
pub fn runner_labels(attrs: &DeviceAttrs) -> String {
    format!("self-hosted,Android-{}", attrs.abis.primary_label())
}

/// On-disk registration marker, written into a runner directory after the
/// control plane accepts the registration. Its presence is the
/// "registered" state and is what makes `ensure_registered` idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerMarker {
    pub name: String,
    pub labels: String,
    pub configured_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub github_url: String,
    pub runner_token: String,
    pub base_dir: PathBuf,
    pub poll_interval: Duration,
    pub grace_period: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(model: &str, sdk: &str, abis: AbiProbe) -> DeviceAttrs {
        DeviceAttrs {
            model: model.to_string(),
            sdk: sdk.to_string(),
            abis,
        }
    }

    #[test]
    fn sanitize_prop_replaces_spaces_and_drops_dashes() {
        assert_eq!(sanitize_prop(" Pixel 7 Pro "), "Pixel_7_Pro");
        assert_eq!(sanitize_prop("SM-G991B"), "SMG991B");
    }

    #[test]
    fn runner_name_structured() {
        let a = attrs("Pixel7", "34", AbiProbe::Tags(vec!["arm64-v8a".into()]));
        assert_eq!(runner_name(&a, "ABC123"), "ANDROID-Pixel7-SDK34-ABC123");
    }

    #[test]
    fn runner_name_collapses_doubled_underscores() {
        let a = attrs("Weird__Model", "30", AbiProbe::Empty);
        assert_eq!(runner_name(&a, "S1"), "ANDROID-Weird_Model-SDK30-S1");
    }

    #[test]
    fn runner_names_differ_by_serial_only() {
        let a = attrs("Pixel7", "34", AbiProbe::Empty);
        assert_ne!(runner_name(&a, "AAA"), runner_name(&a, "BBB"));
    }

    #[test]
    fn labels_use_primary_abi() {
        let a = attrs(
            "Pixel7",
            "34",
            AbiProbe::Tags(vec!["arm64-v8a".into(), "armeabi-v7a".into()]),
        );
        assert_eq!(runner_labels(&a), "self-hosted,Android-arm64-v8a");
    }

    #[test]
    fn labels_distinguish_empty_from_failed_probe() {
        let empty = attrs("M", "1", AbiProbe::Empty);
        let failed = attrs("M", "1", AbiProbe::Failed);
        assert_eq!(runner_labels(&empty), "self-hosted,Android-generic-android-abi");
        assert_eq!(runner_labels(&failed), "self-hosted,Android-abi-detection-failed");
    }

    #[test]
    fn marker_roundtrips_through_json() {
        let marker = RunnerMarker {
            name: "ANDROID-Pixel7-SDK34-ABC123".into(),
            labels: "self-hosted,Android-arm64-v8a".into(),
            configured_at: Utc::now(),
        };
        let json = serde_json::to_string(&marker).unwrap();
        let back: RunnerMarker = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, marker.name);
        assert_eq!(back.labels, marker.labels);
    }
}
