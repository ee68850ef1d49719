//! Recognition session: match faces in live frames and mark attendance.

use crate::engine::{EngineError, FaceEncoder};
use crate::ledger::{AttendanceLedger, LedgerError, MarkOutcome};
use crate::types::{EuclideanMatcher, IdentityStore, Matcher};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("face encoding failed: {0}")]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// A blocking source of RGB frames, e.g. a camera.
///
/// The session takes ownership of the source for the duration of
/// [`RecognitionSession::run`] and drops it on every exit path.
pub trait FrameSource {
    type Error: std::error::Error + Send + Sync + 'static;

    fn next_frame(&mut self) -> Result<RgbImage, Self::Error>;
}

/// Shared flag that asks a running session to stop before its next frame.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One matched face in a frame and what the ledger did with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub name: String,
    pub distance: f32,
    pub outcome: MarkOutcome,
}

/// Why [`RecognitionSession::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The stop signal was raised.
    Signal,
    /// The frame source failed; carries the source's error message.
    SourceFailed(String),
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub frames: u64,
    pub recognitions: u64,
    /// Names newly written to the ledger, in marking order.
    pub newly_marked: Vec<String>,
    pub ended_by: StopReason,
}

/// Owns the identity store, ledger, and face encoder for one marking session.
pub struct RecognitionSession<E> {
    store: IdentityStore,
    ledger: AttendanceLedger,
    encoder: E,
    tolerance: f32,
}

impl<E: FaceEncoder> RecognitionSession<E> {
    pub fn new(store: IdentityStore, ledger: AttendanceLedger, encoder: E, tolerance: f32) -> Self {
        Self {
            store,
            ledger,
            encoder,
            tolerance,
        }
    }

    /// Match every face in `frame` and mark each recognized identity.
    ///
    /// A frame with no face, or with no face within tolerance, touches nothing.
    pub fn process_frame(&mut self, frame: &RgbImage) -> Result<Vec<Recognition>, SessionError> {
        let embeddings = self.encoder.encode(frame)?;
        let mut recognitions = Vec::new();

        for probe in &embeddings {
            let result = EuclideanMatcher.compare(probe, self.store.as_slice(), self.tolerance);
            let Some(name) = result.name else {
                tracing::trace!(distance = result.distance, "face not recognized");
                continue;
            };

            let outcome = self.ledger.mark(&name)?;
            tracing::debug!(name = %name, distance = result.distance, marked = outcome.is_marked(), "face recognized");
            recognitions.push(Recognition {
                name,
                distance: result.distance,
                outcome,
            });
        }

        Ok(recognitions)
    }

    /// Pull frames from `source` until `stop` is raised or the source fails.
    ///
    /// `on_event` sees every recognition as it happens. Source failures end
    /// the session normally; encoder and ledger failures are returned.
    pub fn run<S, F>(
        &mut self,
        mut source: S,
        stop: &StopSignal,
        mut on_event: F,
    ) -> Result<SessionSummary, SessionError>
    where
        S: FrameSource,
        F: FnMut(&Recognition),
    {
        let mut summary = SessionSummary {
            frames: 0,
            recognitions: 0,
            newly_marked: Vec::new(),
            ended_by: StopReason::Signal,
        };

        tracing::info!(
            known = self.store.len(),
            tolerance = self.tolerance,
            "recognition session started"
        );

        while !stop.is_stopped() {
            let frame = match source.next_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, "frame source failed, ending session");
                    summary.ended_by = StopReason::SourceFailed(e.to_string());
                    break;
                }
            };
            summary.frames += 1;

            for recognition in self.process_frame(&frame)? {
                summary.recognitions += 1;
                if recognition.outcome.is_marked() {
                    summary.newly_marked.push(recognition.name.clone());
                }
                on_event(&recognition);
            }
        }

        drop(source);
        tracing::info!(
            frames = summary.frames,
            marked = summary.newly_marked.len(),
            ended_by = ?summary.ended_by,
            "recognition session ended"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorError;
    use crate::types::{Embedding, KnownIdentity};
    use image::Rgb;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Encoder that returns one scripted result per call.
    struct ScriptedEncoder(VecDeque<Result<Vec<Embedding>, EngineError>>);

    impl ScriptedEncoder {
        fn new(script: Vec<Vec<Vec<f32>>>) -> Self {
            Self(
                script
                    .into_iter()
                    .map(|faces| Ok(faces.into_iter().map(Embedding::new).collect()))
                    .collect(),
            )
        }
    }

    impl FaceEncoder for ScriptedEncoder {
        fn encode(&mut self, _image: &RgbImage) -> Result<Vec<Embedding>, EngineError> {
            self.0.pop_front().unwrap_or_else(|| Ok(vec![]))
        }
    }

    #[derive(Debug, Error)]
    #[error("camera unplugged")]
    struct Unplugged;

    /// Yields `frames` blank frames then fails; records when it is dropped.
    struct CountingSource {
        remaining: usize,
        dropped: Arc<AtomicBool>,
    }

    impl FrameSource for CountingSource {
        type Error = Unplugged;

        fn next_frame(&mut self) -> Result<RgbImage, Unplugged> {
            if self.remaining == 0 {
                return Err(Unplugged);
            }
            self.remaining -= 1;
            Ok(RgbImage::from_pixel(4, 4, Rgb([0, 0, 0])))
        }
    }

    impl Drop for CountingSource {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    fn source(frames: usize) -> (CountingSource, Arc<AtomicBool>) {
        let dropped = Arc::new(AtomicBool::new(false));
        (
            CountingSource {
                remaining: frames,
                dropped: dropped.clone(),
            },
            dropped,
        )
    }

    fn store() -> IdentityStore {
        let known = |name: &str, values: Vec<f32>| KnownIdentity {
            name: name.into(),
            embedding: Embedding::new(values),
            source: PathBuf::from(format!("{name}.png")),
        };
        IdentityStore::new(vec![
            known("alice", vec![1.0, 0.0, 0.0]),
            known("bob", vec![0.0, 1.0, 0.0]),
        ])
    }

    fn session(
        tmp: &TempDir,
        script: Vec<Vec<Vec<f32>>>,
        tolerance: f32,
    ) -> RecognitionSession<ScriptedEncoder> {
        RecognitionSession::new(
            store(),
            AttendanceLedger::new(tmp.path().join("attendance.csv")),
            ScriptedEncoder::new(script),
            tolerance,
        )
    }

    fn blank() -> RgbImage {
        RgbImage::new(4, 4)
    }

    #[test]
    fn test_two_known_faces_in_one_frame_are_both_marked() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(&tmp, vec![vec![vec![0.0, 0.9, 0.0], vec![0.95, 0.0, 0.0]]], 0.5);

        let recognitions = s.process_frame(&blank()).unwrap();
        let names: Vec<&str> = recognitions.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["bob", "alice"]);
        assert!(recognitions.iter().all(|r| r.outcome.is_marked()));

        let ledger = AttendanceLedger::new(tmp.path().join("attendance.csv"));
        assert_eq!(ledger.read_all().unwrap().len(), 2);
    }

    #[test]
    fn test_same_face_twice_reports_already_marked() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(&tmp, vec![vec![vec![1.0, 0.0, 0.0]], vec![vec![1.0, 0.0, 0.0]]], 0.5);

        let first = s.process_frame(&blank()).unwrap();
        assert!(first[0].outcome.is_marked());
        // Marking around midnight would legitimately produce a second row.
        let second = s.process_frame(&blank()).unwrap();
        assert_eq!(second.len(), 1);
        if let MarkOutcome::Marked(record) = &second[0].outcome {
            let MarkOutcome::Marked(earlier) = &first[0].outcome else { unreachable!() };
            assert_ne!(record.date, earlier.date);
        }
    }

    #[test]
    fn test_no_face_has_no_side_effect() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(&tmp, vec![vec![]], 0.5);

        assert!(s.process_frame(&blank()).unwrap().is_empty());
        assert!(!tmp.path().join("attendance.csv").exists());
    }

    #[test]
    fn test_unknown_face_has_no_side_effect() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(&tmp, vec![vec![vec![0.0, 0.0, 1.0]]], 0.5);

        assert!(s.process_frame(&blank()).unwrap().is_empty());
        assert!(!tmp.path().join("attendance.csv").exists());
    }

    #[test]
    fn test_tolerance_boundary_is_inclusive() {
        // About 1.0 from alice and 1.34 from bob; the tolerance is set to the
        // exact computed distance.
        let probe = vec![1.0, 0.6, 0.8];
        let alice = Embedding::new(vec![1.0, 0.0, 0.0]);
        let distance = Embedding::new(probe.clone()).euclidean_distance(&alice);

        let tmp = TempDir::new().unwrap();
        let mut at = session(&tmp, vec![vec![probe.clone()]], distance);
        let hits = at.process_frame(&blank()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "alice");

        let tmp = TempDir::new().unwrap();
        let mut below = session(&tmp, vec![vec![probe]], distance - 1e-4);
        assert!(below.process_frame(&blank()).unwrap().is_empty());
    }

    #[test]
    fn test_run_ends_on_source_failure_and_releases_source() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(
            &tmp,
            vec![vec![], vec![vec![1.0, 0.0, 0.0]], vec![vec![0.0, 1.0, 0.0]]],
            0.5,
        );
        let (src, dropped) = source(3);

        let mut seen = Vec::new();
        let summary = s
            .run(src, &StopSignal::new(), |r| seen.push(r.name.clone()))
            .unwrap();

        assert_eq!(summary.frames, 3);
        assert_eq!(summary.recognitions, 2);
        assert_eq!(summary.newly_marked, vec!["alice", "bob"]);
        assert_eq!(summary.ended_by, StopReason::SourceFailed("camera unplugged".into()));
        assert_eq!(seen, vec!["alice", "bob"]);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_run_stops_on_signal() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(&tmp, vec![vec![vec![1.0, 0.0, 0.0]]], 0.5);
        let (src, dropped) = source(100);
        let stop = StopSignal::new();

        let summary = s.run(src, &stop, |_| stop.stop()).unwrap();

        assert_eq!(summary.frames, 1);
        assert_eq!(summary.ended_by, StopReason::Signal);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_run_with_stop_already_raised_reads_nothing() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(&tmp, vec![], 0.5);
        let (src, dropped) = source(5);
        let stop = StopSignal::new();
        stop.stop();

        let summary = s.run(src, &stop, |_| {}).unwrap();
        assert_eq!(summary.frames, 0);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_run_encoder_failure_is_returned_and_releases_source() {
        let tmp = TempDir::new().unwrap();
        let mut s = RecognitionSession::new(
            store(),
            AttendanceLedger::new(tmp.path().join("attendance.csv")),
            ScriptedEncoder(VecDeque::from([Err(EngineError::Detector(
                DetectorError::EmptyFrame,
            ))])),
            0.5,
        );
        let (src, dropped) = source(5);

        let err = s.run(src, &StopSignal::new(), |_| {}).unwrap_err();
        assert!(matches!(err, SessionError::Engine(_)));
        assert!(dropped.load(Ordering::SeqCst));
    }
}
