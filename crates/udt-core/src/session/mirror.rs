//! Local mirror of a session
//!
//! Holds the last known `{summary, name, interface}` projection and the
//! version it corresponds to. The held value is never edited in place:
//! every update builds a new `Arc<Projection>` and swaps it in, so readers
//! see either the old or the new value.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::error::{DatasetResult, PatchError};
use crate::models::{Projection, SAMPLES_KEY};
use crate::patch::{self, PatchOp};

/// Snapshot of the mirror
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MirrorState {
    /// `None` until the first summary fetch
    pub projection: Option<Arc<Projection>>,
    /// `None` until a session was created or joined
    pub version: Option<u64>,
}

/// Outcome of merging a remote patch into the mirror
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// Patch merged; some ops may have been skipped
    Applied { skipped: Vec<PatchError> },
    /// The mirror moved away from the base version in the meantime
    Stale,
}

/// Copy-on-write holder of a session projection
#[derive(Debug)]
pub struct Mirror {
    state: watch::Sender<MirrorState>,
    state_rx: watch::Receiver<MirrorState>,
}

impl Default for Mirror {
    fn default() -> Self {
        Self::new()
    }
}

impl Mirror {
    /// Create an uninitialized mirror
    pub fn new() -> Self {
        let (state, state_rx) = watch::channel(MirrorState::default());
        Self { state, state_rx }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> MirrorState {
        self.state_rx.borrow().clone()
    }

    /// Current projection, if initialized
    pub fn get(&self) -> Option<Arc<Projection>> {
        self.state_rx.borrow().projection.clone()
    }

    pub fn version(&self) -> Option<u64> {
        self.state_rx.borrow().version
    }

    pub fn is_initialized(&self) -> bool {
        self.state_rx.borrow().projection.is_some()
    }

    /// Watch for mirror replacements
    pub fn subscribe(&self) -> watch::Receiver<MirrorState> {
        self.state_rx.clone()
    }

    /// Replace projection and version together
    pub fn set(&self, projection: Projection, version: u64) {
        self.state.send_replace(MirrorState {
            projection: Some(Arc::new(projection)),
            version: Some(version),
        });
    }

    /// Replace the projection, keeping the version
    pub fn set_projection(&self, projection: Projection) {
        self.state.send_modify(|state| {
            *state = MirrorState {
                projection: Some(Arc::new(projection)),
                version: state.version,
            };
        });
    }

    /// Record a version without a projection (session just created)
    pub fn set_version(&self, version: u64) {
        self.state.send_modify(|state| {
            *state = MirrorState {
                projection: state.projection.clone(),
                version: Some(version),
            };
        });
    }

    /// Drop the projection so the next read refetches it
    pub fn invalidate(&self) {
        self.state.send_modify(|state| {
            *state = MirrorState {
                projection: None,
                version: state.version,
            };
        });
    }

    /// Forget everything
    pub fn clear(&self) {
        self.state.send_replace(MirrorState::default());
    }

    /// Build a new projection from the current one and swap it in
    ///
    /// Fails without touching the mirror if `update` fails. An uninitialized
    /// mirror is left alone and `Ok(false)` is returned.
    pub fn update<F>(&self, update: F) -> DatasetResult<bool>
    where
        F: FnOnce(&Projection) -> DatasetResult<Projection>,
    {
        let mut result = Ok(false);
        self.state.send_if_modified(|state| {
            let Some(current) = state.projection.as_ref() else {
                return false;
            };
            match update(current) {
                Ok(next) => {
                    *state = MirrorState {
                        projection: Some(Arc::new(next)),
                        version: state.version,
                    };
                    result = Ok(true);
                    true
                }
                Err(e) => {
                    result = Err(e);
                    false
                }
            }
        });
        result
    }

    /// Merge a remote patch taking the mirror from `from` to `to`
    ///
    /// Ops under `/samples` are dropped: the mirror holds summaries, never
    /// sample bodies. An op that does not apply, or that would leave a
    /// document that is no longer a valid projection, is skipped and the
    /// mirror still advances to `to`. Nothing changes if the mirror is no
    /// longer at `from`.
    pub fn apply_patch(&self, patch: &[PatchOp], from: u64, to: u64) -> DatasetResult<MergeOutcome> {
        let mut result = Ok(MergeOutcome::Stale);
        self.state.send_if_modified(|state| {
            if state.version != Some(from) {
                return false;
            }
            let Some(current) = state.projection.as_ref() else {
                return false;
            };

            let merged = merge(current, patch);
            match merged {
                Ok((next, skipped)) => {
                    *state = MirrorState {
                        projection: Some(Arc::new(next)),
                        version: Some(to),
                    };
                    result = Ok(MergeOutcome::Applied { skipped });
                    true
                }
                Err(e) => {
                    result = Err(e);
                    false
                }
            }
        });
        result
    }
}

/// Keep only ops that do not address sample bodies
pub fn without_sample_ops(patch: &[PatchOp]) -> Vec<PatchOp> {
    patch
        .iter()
        .filter(|op| !op.touches(SAMPLES_KEY))
        .cloned()
        .collect()
}

fn merge(current: &Projection, patch: &[PatchOp]) -> DatasetResult<(Projection, Vec<PatchError>)> {
    let ops = without_sample_ops(patch);
    if ops.len() != patch.len() {
        debug!("Dropped {} sample op(s) from remote patch", patch.len() - ops.len());
    }

    let mut document = current.to_value()?;
    let mut next = current.clone();
    let mut skipped = Vec::new();

    for (index, op) in ops.iter().enumerate() {
        let outcome = patch::apply(&document, std::slice::from_ref(op));
        if let Some(mut err) = outcome.skipped.into_iter().next() {
            err.index = index;
            skipped.push(err);
            continue;
        }
        match Projection::from_value(outcome.document.clone()) {
            Ok(projection) => {
                next = projection;
                document = outcome.document;
            }
            Err(e) => skipped.push(PatchError {
                index,
                path: op.path().to_string(),
                reason: format!("result is not a valid summary: {}", e),
            }),
        }
    }

    Ok((next, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Dataset, Sample};
    use serde_json::json;

    fn projection(ids: &[&str]) -> Projection {
        let mut ds = Dataset::named("birds");
        ds.samples = ids
            .iter()
            .map(|id| Sample::from_value(json!({"_id": id})).unwrap())
            .collect();
        Projection::from_dataset(&ds)
    }

    #[test]
    fn test_uninitialized() {
        let mirror = Mirror::new();
        assert!(mirror.get().is_none());
        assert!(mirror.version().is_none());
        assert!(!mirror.is_initialized());
    }

    #[test]
    fn test_set_replaces_whole_value() {
        let mirror = Mirror::new();
        mirror.set(projection(&["a"]), 1);
        let before = mirror.get().unwrap();

        mirror.set(projection(&["a", "b"]), 2);

        // earlier readers keep their snapshot
        assert_eq!(before.summary.len(), 1);
        assert_eq!(mirror.get().unwrap().summary.len(), 2);
        assert_eq!(mirror.version(), Some(2));
    }

    #[test]
    fn test_apply_patch_filters_sample_ops() {
        let mirror = Mirror::new();
        mirror.set(projection(&["a"]), 1);

        let patch = vec![
            PatchOp::add("/samples/1", json!({"_id": "b", "imageUrl": "x"})),
            PatchOp::add(
                "/summary/samples/1",
                json!({"_id": "b", "hasAnnotation": false}),
            ),
            PatchOp::replace("/name", json!("renamed")),
        ];

        let outcome = mirror.apply_patch(&patch, 1, 3).unwrap();
        assert_eq!(outcome, MergeOutcome::Applied { skipped: vec![] });

        let current = mirror.get().unwrap();
        assert_eq!(current.summary.len(), 2);
        assert_eq!(current.name.as_deref(), Some("renamed"));
        assert!(current.extra.get("samples").is_none());
        assert_eq!(mirror.version(), Some(3));
    }

    #[test]
    fn test_apply_patch_reports_skipped_ops() {
        let mirror = Mirror::new();
        mirror.set(projection(&["a"]), 1);

        let patch = vec![
            PatchOp::remove("/summary/samples/4"),
            PatchOp::replace("/summary/samples/0/hasAnnotation", json!(true)),
        ];

        match mirror.apply_patch(&patch, 1, 2).unwrap() {
            MergeOutcome::Applied { skipped } => assert_eq!(skipped.len(), 1),
            MergeOutcome::Stale => panic!("expected merge"),
        }
        assert_eq!(mirror.get().unwrap().summary.annotated_count(), 1);
    }

    #[test]
    fn test_apply_patch_skips_ops_that_break_the_projection() {
        let mirror = Mirror::new();
        mirror.set(projection(&[]), 0);

        let patch = vec![
            PatchOp::replace("/name", json!(42)),
            PatchOp::add(
                "/summary/samples/0",
                json!({"_id": "a", "hasAnnotation": true}),
            ),
        ];

        match mirror.apply_patch(&patch, 0, 2).unwrap() {
            MergeOutcome::Applied { skipped } => {
                assert_eq!(skipped.len(), 1);
                assert_eq!(skipped[0].index, 0);
                assert_eq!(skipped[0].path, "/name");
            }
            MergeOutcome::Stale => panic!("expected merge"),
        }

        let current = mirror.get().unwrap();
        assert_eq!(current.name.as_deref(), Some("birds"));
        assert_eq!(current.summary.len(), 1);
        assert_eq!(mirror.version(), Some(2));

        // later valid changes keep merging from the new version
        mirror
            .apply_patch(&[PatchOp::replace("/name", json!("owls"))], 2, 3)
            .unwrap();
        assert_eq!(mirror.get().unwrap().name.as_deref(), Some("owls"));
        assert_eq!(mirror.version(), Some(3));
    }

    #[test]
    fn test_apply_patch_on_stale_base_is_ignored() {
        let mirror = Mirror::new();
        mirror.set(projection(&["a"]), 5);

        let outcome = mirror
            .apply_patch(&[PatchOp::replace("/name", json!("x"))], 4, 6)
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Stale);
        assert_eq!(mirror.version(), Some(5));
        assert_eq!(mirror.get().unwrap().name.as_deref(), Some("birds"));
    }

    #[test]
    fn test_update_and_invalidate() {
        let mirror = Mirror::new();
        assert!(!mirror.update(|p| Ok(p.clone())).unwrap());

        mirror.set(projection(&[]), 1);
        assert!(mirror
            .update(|p| p.with_property("interface", json!({"type": "text"})))
            .unwrap());
        assert_eq!(
            mirror.get().unwrap().interface,
            json!({"type": "text"})
        );

        // failed updates leave the mirror untouched
        assert!(mirror
            .update(|p| p.with_property("samples", json!([])))
            .is_err());
        assert_eq!(mirror.version(), Some(1));

        mirror.invalidate();
        assert!(mirror.get().is_none());
        assert_eq!(mirror.version(), Some(1));
    }

    #[tokio::test]
    async fn test_subscribe_sees_replacements() {
        let mirror = Mirror::new();
        let mut rx = mirror.subscribe();
        mirror.set(projection(&["a"]), 1);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().version, Some(1));
    }
}
