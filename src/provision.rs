//! Provisioner: materialize a runner directory from the template and perform
//! one-time control-plane registration.
//!
//! Both operations are idempotent so the reconciliation loop can replay the
//! whole create chain every tick; whichever steps already happened become
//! no-ops and a partially provisioned serial resumes where it stopped.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::github::ControlPlane;
use crate::log;
use crate::store;
use crate::types::{runner_labels, runner_name, DeviceAttrs, RunnerMarker};

/// Create the on-disk runner directory for `serial` by copying the template,
/// or do nothing if it already exists. Returns the runner directory path.
pub async fn ensure_materialized(base: &Path, serial: &str) -> Result<PathBuf> {
    let dir = store::runner_dir(base, serial);
    if fs::try_exists(&dir)
        .await
        .map_err(|e| Error::materialization(serial, e.to_string()))?
    {
        return Ok(dir);
    }

    let template = store::template_dir(base);
    if !fs::try_exists(&template)
        .await
        .map_err(|e| Error::materialization(serial, e.to_string()))?
    {
        return Err(Error::materialization(
            serial,
            format!("runner template missing at {}", template.display()),
        ));
    }

    log::info(
        "materializing_runner",
        serde_json::json!({"serial": serial, "dir": dir.display().to_string()}),
    );

    let copy_src = template.clone();
    let copy_dst = dir.clone();
    let copied = tokio::task::spawn_blocking(move || copy_tree(&copy_src, &copy_dst))
        .await
        .map_err(|e| Error::materialization(serial, format!("copy task panicked: {e}")))?;

    if let Err(e) = copied {
        // Leave no half-copied directory behind; the idempotence check above
        // must only ever see fully materialized runners.
        let _ = fs::remove_dir_all(&dir).await;
        return Err(Error::materialization(serial, e.to_string()));
    }
    Ok(dir)
}

fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(std::io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            // fs::copy carries permission bits, so config.sh/run.sh stay
            // executable in the materialized copy.
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Register the runner with the control plane unless the on-disk marker says
/// it already happened. The marker is written only after the control plane
/// accepts, so a failed attempt retries cleanly next tick; a present marker
/// short-circuits before any remote call (registration tokens are single-use
/// and must never be replayed).
pub async fn ensure_registered(
    control_plane: &dyn ControlPlane,
    dir: &Path,
    serial: &str,
    attrs: &DeviceAttrs,
) -> Result<RunnerMarker> {
    if store::is_registered(dir).await {
        if let Some(marker) = store::read_marker(dir).await {
            return Ok(marker);
        }
        // Marker present but unreadable: the registration already happened,
        // so rebuild the marker from the deterministic name instead of
        // replaying the single-use token.
        let marker = RunnerMarker {
            name: runner_name(attrs, serial),
            labels: runner_labels(attrs),
            configured_at: Utc::now(),
        };
        store::write_marker(dir, &marker)
            .await
            .map_err(|e| Error::registration(serial, format!("marker rewrite failed: {e}")))?;
        return Ok(marker);
    }

    let name = runner_name(attrs, serial);
    let labels = runner_labels(attrs);

    log::info(
        "registering_runner",
        serde_json::json!({"serial": serial, "name": name, "labels": labels}),
    );
    control_plane.register(dir, serial, &name, &labels).await?;

    let marker = RunnerMarker {
        name,
        labels,
        configured_at: Utc::now(),
    };
    store::write_marker(dir, &marker)
        .await
        .map_err(|e| Error::registration(serial, format!("marker write failed: {e}")))?;
    Ok(marker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::DeregisterOutcome;
    use crate::types::AbiProbe;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPlane {
        registered: Mutex<Vec<String>>,
        fail_register: AtomicBool,
    }

    #[async_trait::async_trait]
    impl ControlPlane for RecordingPlane {
        async fn register(
            &self,
            _dir: &Path,
            serial: &str,
            name: &str,
            _labels: &str,
        ) -> Result<()> {
            if self.fail_register.load(Ordering::SeqCst) {
                return Err(Error::registration(serial, "transient control plane outage"));
            }
            self.registered.lock().unwrap().push(name.to_string());
            Ok(())
        }

        async fn deregister(&self, _dir: &Path, _serial: &str) -> Result<DeregisterOutcome> {
            Ok(DeregisterOutcome::Removed)
        }
    }

    fn attrs() -> DeviceAttrs {
        DeviceAttrs {
            model: "Pixel7".into(),
            sdk: "34".into(),
            abis: AbiProbe::Tags(vec!["arm64-v8a".into(), "armeabi-v7a".into()]),
        }
    }

    async fn seed_template(base: &Path) {
        let template = base.join("template");
        fs::create_dir_all(template.join("bin")).await.unwrap();
        fs::write(template.join("config.sh"), "#!/bin/sh\n").await.unwrap();
        fs::write(template.join("run.sh"), "#!/bin/sh\n").await.unwrap();
        fs::write(template.join("bin").join("Runner.Listener"), "bin").await.unwrap();
    }

    #[tokio::test]
    async fn materialize_copies_template_tree() {
        let tmp = tempfile::tempdir().unwrap();
        seed_template(tmp.path()).await;

        let dir = ensure_materialized(tmp.path(), "ABC123").await.unwrap();
        assert!(dir.join("config.sh").exists());
        assert!(dir.join("run.sh").exists());
        assert!(dir.join("bin").join("Runner.Listener").exists());
    }

    #[tokio::test]
    async fn materialize_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        seed_template(tmp.path()).await;

        let dir = ensure_materialized(tmp.path(), "ABC123").await.unwrap();
        fs::write(dir.join("scratch.txt"), "kept").await.unwrap();

        let again = ensure_materialized(tmp.path(), "ABC123").await.unwrap();
        assert_eq!(dir, again);
        assert!(dir.join("scratch.txt").exists());
    }

    #[tokio::test]
    async fn materialize_fails_without_template() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ensure_materialized(tmp.path(), "ABC123").await.unwrap_err();
        assert!(matches!(err, Error::Materialization { .. }));
        assert!(!tmp.path().join("ABC123").exists());
    }

    #[tokio::test]
    async fn register_writes_marker_once() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("ABC123");
        fs::create_dir(&dir).await.unwrap();
        let plane = RecordingPlane::default();

        let marker = ensure_registered(&plane, &dir, "ABC123", &attrs()).await.unwrap();
        assert_eq!(marker.name, "ANDROID-Pixel7-SDK34-ABC123");
        assert_eq!(marker.labels, "self-hosted,Android-arm64-v8a");

        // Second call short-circuits on the marker: no second remote call.
        ensure_registered(&plane, &dir, "ABC123", &attrs()).await.unwrap();
        assert_eq!(plane.registered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn corrupt_marker_short_circuits_without_token_replay() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("ABC123");
        fs::create_dir(&dir).await.unwrap();
        fs::write(dir.join(store::MARKER_FILE), "{not json").await.unwrap();
        let plane = RecordingPlane::default();

        let marker = ensure_registered(&plane, &dir, "ABC123", &attrs()).await.unwrap();
        assert!(plane.registered.lock().unwrap().is_empty());
        assert_eq!(marker.name, "ANDROID-Pixel7-SDK34-ABC123");
        // The marker has been rewritten into readable form.
        assert_eq!(store::read_marker(&dir).await.unwrap().name, marker.name);
    }

    #[tokio::test]
    async fn failed_registration_leaves_no_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("ABC123");
        fs::create_dir(&dir).await.unwrap();
        let plane = RecordingPlane::default();
        plane.fail_register.store(true, Ordering::SeqCst);

        let err = ensure_registered(&plane, &dir, "ABC123", &attrs()).await.unwrap_err();
        assert!(matches!(err, Error::Registration { .. }));
        assert!(store::read_marker(&dir).await.is_none());

        // Outage clears; the retry registers for real.
        plane.fail_register.store(false, Ordering::SeqCst);
        ensure_registered(&plane, &dir, "ABC123", &attrs()).await.unwrap();
        assert_eq!(plane.registered.lock().unwrap().len(), 1);
        assert!(store::read_marker(&dir).await.is_some());
    }
}
