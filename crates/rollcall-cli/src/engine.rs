use rollcall_core::{
    Embedding, EmbeddingExtractor, EuclideanMatcher, ExtractError, IdentityRecord, MatchError,
    MatchReport, MatchResult, Matcher,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("extractor error: {0}")]
    Extract(#[from] ExtractError),
    #[error("matcher error: {0}")]
    Match(#[from] MatchError),
    #[error("no face detected in {attempts} captured frame(s)")]
    NoFaceDetected { attempts: usize },
    #[error("failed to start engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of a capture operation.
#[derive(Debug)]
pub struct CaptureResult {
    pub embedding: Embedding,
    /// Frames consumed until a face was found.
    pub attempts: usize,
}

/// Result of an identify operation.
#[derive(Debug)]
pub struct IdentifyResult {
    pub report: MatchReport,
    pub attempts: usize,
}

/// Messages sent from the CLI to the engine thread.
enum EngineRequest {
    Capture {
        max_attempts: usize,
        reply: oneshot::Sender<Result<CaptureResult, EngineError>>,
    },
    Identify {
        catalog: Vec<IdentityRecord>,
        threshold: f64,
        max_attempts: usize,
        reply: oneshot::Sender<Result<IdentifyResult, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Request a capture: pull frames until one yields a face embedding.
    pub async fn capture(&self, max_attempts: usize) -> Result<CaptureResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Capture {
                max_attempts,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Request identification: capture a face, then compare it against `catalog`.
    pub async fn identify(
        &self,
        catalog: Vec<IdentityRecord>,
        threshold: f64,
        max_attempts: usize,
    ) -> Result<IdentifyResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Identify {
                catalog,
                threshold,
                max_attempts,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The extractor is handed over ready to use; the engine owns it and the
/// matcher for its whole lifetime. The thread exits once every handle is
/// dropped.
pub fn spawn_engine<E>(mut extractor: E, dimension: usize) -> Result<EngineHandle, EngineError>
where
    E: EmbeddingExtractor + 'static,
{
    let matcher = EuclideanMatcher::new(dimension);
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::debug!(dimension, "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Capture {
                        max_attempts,
                        reply,
                    } => {
                        let result = run_capture(&mut extractor, dimension, max_attempts);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Identify {
                        catalog,
                        threshold,
                        max_attempts,
                        reply,
                    } => {
                        let result = run_identify(
                            &mut extractor,
                            &matcher,
                            &catalog,
                            threshold,
                            max_attempts,
                        );
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::debug!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

/// Pull frames until one has a face. Running out of frames counts as not finding one.
fn run_capture(
    extractor: &mut impl EmbeddingExtractor,
    dimension: usize,
    max_attempts: usize,
) -> Result<CaptureResult, EngineError> {
    let mut attempts = 0;
    while attempts < max_attempts {
        let frame = match extractor.extract() {
            Ok(frame) => frame,
            Err(ExtractError::SourceExhausted) => {
                tracing::debug!(attempts, "capture source exhausted");
                break;
            }
            Err(e) => return Err(e.into()),
        };
        attempts += 1;

        match frame {
            Some(embedding) => {
                embedding.check_len(dimension)?;
                tracing::debug!(attempt = attempts, "face captured");
                return Ok(CaptureResult {
                    embedding,
                    attempts,
                });
            }
            None => tracing::debug!(attempt = attempts, "no face in frame"),
        }
    }
    Err(EngineError::NoFaceDetected { attempts })
}

/// Capture a face, then match it. The matcher only runs after a successful capture.
fn run_identify(
    extractor: &mut impl EmbeddingExtractor,
    matcher: &EuclideanMatcher,
    catalog: &[IdentityRecord],
    threshold: f64,
    max_attempts: usize,
) -> Result<IdentifyResult, EngineError> {
    let capture = run_capture(extractor, matcher.dimension(), max_attempts)?;
    let report = matcher.compare(&capture.embedding, catalog, threshold)?;

    for skipped in &report.skipped {
        tracing::warn!(
            identity = %skipped.identity_id,
            index = skipped.index,
            reason = %skipped.reason,
            "catalog entry skipped"
        );
    }

    match &report.result {
        MatchResult::Matched {
            identity,
            distance,
            confidence,
        } => tracing::info!(
            identity = %identity.id,
            distance,
            confidence,
            catalog = catalog.len(),
            "face matched"
        ),
        MatchResult::Unmatched => tracing::info!(catalog = catalog.len(), "face not recognized"),
    }

    Ok(IdentifyResult {
        report,
        attempts: capture.attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rollcall_core::{DescriptorStream, Identity};
    use std::collections::VecDeque;
    use std::io::Cursor;

    /// Extractor that replays a fixed script of frames.
    struct Scripted(VecDeque<Result<Option<Embedding>, ExtractError>>);

    impl Scripted {
        fn frames(frames: Vec<Option<Vec<f64>>>) -> Self {
            Self(
                frames
                    .into_iter()
                    .map(|f| Ok(f.map(Embedding::new)))
                    .collect(),
            )
        }
    }

    impl EmbeddingExtractor for Scripted {
        fn extract(&mut self) -> Result<Option<Embedding>, ExtractError> {
            self.0.pop_front().unwrap_or(Err(ExtractError::SourceExhausted))
        }
    }

    fn record(id: &str, values: Vec<f64>) -> IdentityRecord {
        IdentityRecord {
            identity: Identity {
                id: id.into(),
                name: id.to_uppercase(),
                department: None,
            },
            embedding: Embedding::new(values),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_identify_after_empty_frames() {
        let extractor = Scripted::frames(vec![None, None, Some(vec![0.0, 0.0])]);
        let engine = spawn_engine(extractor, 2).unwrap();
        let catalog = vec![record("a", vec![0.0, 0.0]), record("b", vec![1.0, 1.0])];

        let result = engine.identify(catalog, 0.6, 5).await.unwrap();
        assert_eq!(result.attempts, 3);
        assert_eq!(result.report.result.identity().map(|i| i.id.as_str()), Some("a"));
    }

    #[tokio::test]
    async fn test_identify_unrecognized() {
        let engine = spawn_engine(Scripted::frames(vec![Some(vec![1.0, 1.0])]), 2).unwrap();
        let result = engine
            .identify(vec![record("a", vec![0.0, 0.0])], 0.6, 3)
            .await
            .unwrap();
        assert_eq!(result.report.result, MatchResult::Unmatched);
    }

    #[tokio::test]
    async fn test_no_face_within_attempts() {
        let extractor = Scripted::frames(vec![None, None, None, Some(vec![0.0, 0.0])]);
        let engine = spawn_engine(extractor, 2).unwrap();
        let err = engine.capture(2).await.unwrap_err();
        assert!(matches!(err, EngineError::NoFaceDetected { attempts: 2 }));

        // The engine keeps its place in the source across requests.
        let capture = engine.capture(2).await.unwrap();
        assert_eq!(capture.attempts, 2);
        assert_eq!(capture.embedding.values(), &[0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_exhausted_source_is_no_face() {
        let engine = spawn_engine(Scripted::frames(vec![None]), 2).unwrap();
        let err = engine.capture(5).await.unwrap_err();
        assert!(matches!(err, EngineError::NoFaceDetected { attempts: 1 }));
    }

    #[tokio::test]
    async fn test_wrong_length_capture_fails_fast() {
        let extractor = Scripted::frames(vec![Some(vec![0.0; 3]), Some(vec![0.0; 128])]);
        let engine = spawn_engine(extractor, 128).unwrap();
        let err = engine.capture(5).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Match(MatchError::InvalidEmbeddingLength {
                expected: 128,
                actual: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_extractor_error_propagates() {
        let mut script = Scripted::frames(vec![None]);
        script
            .0
            .push_back(Err(ExtractError::Capture("camera unplugged".into())));
        let engine = spawn_engine(script, 2).unwrap();
        let err = engine.capture(5).await.unwrap_err();
        assert!(matches!(err, EngineError::Extract(ExtractError::Capture(_))));
    }

    #[tokio::test]
    async fn test_identify_skips_bad_catalog_entry() {
        let frames = DescriptorStream::new(Cursor::new("-\n[0.1,0.1]\n"));
        let engine = spawn_engine(frames, 2).unwrap();
        let catalog = vec![record("bad", vec![0.1]), record("good", vec![0.1, 0.2])];

        let result = engine.identify(catalog, 0.6, 5).await.unwrap();
        assert_eq!(result.report.skipped.len(), 1);
        assert_eq!(result.report.skipped[0].identity_id, "bad");
        assert_eq!(
            result.report.result.identity().map(|i| i.id.as_str()),
            Some("good")
        );
    }

    #[tokio::test]
    async fn test_handles_share_engine() {
        let frames = DescriptorStream::new(Cursor::new("[0.0,0.0]\n[0.0,0.0]\n"));
        let engine = spawn_engine(frames, 2).unwrap();
        let other = engine.clone();
        assert_eq!(engine.capture(1).await.unwrap().attempts, 1);
        assert_eq!(other.capture(1).await.unwrap().attempts, 1);
        assert!(matches!(
            engine.capture(1).await,
            Err(EngineError::NoFaceDetected { attempts: 0 })
        ));
    }
}
