use anyhow::Result;

use crate::{
    classifier::KnnClassifier,
    gesture::{GestureAction, GestureHandler, LoggingGestureHandler, handle_prediction},
    pipeline::{landmarks::LandmarkSource, render::Renderer},
    types::{Frame, HandDetection, format_vector},
};

#[derive(Clone, Debug, PartialEq)]
pub enum CaptureOutcome {
    Captured { label: String, total: usize },
    NoHand,
    NoFrame,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PredictOutcome {
    Predicted(GestureAction),
    NoTrainingData,
    NoHand,
    NoFrame,
}

impl CaptureOutcome {
    pub fn describe(&self) -> String {
        match self {
            CaptureOutcome::Captured { label, total } => {
                format!("Captured pose for label: {label} ({total} examples)")
            }
            CaptureOutcome::NoHand => "No hand detected".to_string(),
            CaptureOutcome::NoFrame => "No camera frame yet".to_string(),
        }
    }
}

impl PredictOutcome {
    pub fn describe(&self) -> String {
        match self {
            PredictOutcome::Predicted(GestureAction::Unknown(label)) => {
                format!("Unknown gesture: {label}")
            }
            PredictOutcome::Predicted(action) => format!("{} detected", action.display_name()),
            PredictOutcome::NoTrainingData => "No training examples available".to_string(),
            PredictOutcome::NoHand => "No hand detected".to_string(),
            PredictOutcome::NoFrame => "No camera frame yet".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FrameReport {
    pub rendered: Frame,
    pub hand: Option<HandDetection>,
}

enum Detection {
    Hand(HandDetection),
    NoHand,
    NoFrame,
}

/// Everything one gesture-training session needs, owned in one place.
///
/// Frames and user actions must reach the session from a single thread; the
/// detection loop in [`crate::pipeline::worker`] is that thread.
pub struct Session<S, H = LoggingGestureHandler> {
    source: S,
    classifier: KnnClassifier,
    renderer: Renderer,
    handler: H,
    latest_frame: Option<Frame>,
    log_text: String,
}

impl<S: LandmarkSource, H: GestureHandler> Session<S, H> {
    pub fn new(source: S, classifier: KnnClassifier, renderer: Renderer, handler: H) -> Self {
        Self {
            source,
            classifier,
            renderer,
            handler,
            latest_frame: None,
            log_text: String::new(),
        }
    }

    pub fn classifier(&self) -> &KnnClassifier {
        &self.classifier
    }

    /// Latest flattened landmark vector, as shown in the log panel.
    pub fn log_text(&self) -> &str {
        &self.log_text
    }

    #[cfg(test)]
    pub(crate) fn source(&self) -> &S {
        &self.source
    }

    #[cfg(test)]
    pub(crate) fn handler(&self) -> &H {
        &self.handler
    }

    /// Per-frame step: detect, render, remember the frame for later actions.
    pub fn process_frame(&mut self, frame: Frame) -> FrameReport {
        let hand = match self.source.estimate_hands(&frame) {
            Ok(hands) => hands.into_iter().next(),
            Err(err) => {
                log::warn!("landmark detection failed: {err:?}");
                None
            }
        };

        if let Some(hand) = &hand {
            self.log_text = format_vector(&hand.flatten());
        }

        let rendered = self.renderer.render(&frame, hand.as_ref());
        self.latest_frame = Some(frame);
        FrameReport { rendered, hand }
    }

    /// Runs one detection and stores the flattened landmarks under `label`.
    pub fn capture_pose(&mut self, label: &str) -> Result<CaptureOutcome> {
        let hand = match self.detect_once()? {
            Detection::Hand(hand) => hand,
            Detection::NoHand => {
                log::info!("No hand detected, nothing captured for {label}");
                return Ok(CaptureOutcome::NoHand);
            }
            Detection::NoFrame => {
                log::info!("no camera frame yet, nothing captured for {label}");
                return Ok(CaptureOutcome::NoFrame);
            }
        };

        let vector = hand.flatten();
        log::debug!(
            "capture {label}: confidence {:.2}, handedness {:.2}, vector {}",
            hand.confidence,
            hand.handedness,
            format_vector(&vector)
        );
        self.classifier.learn(vector, label)?;
        log::info!("Captured pose for label: {label}");

        Ok(CaptureOutcome::Captured {
            label: label.to_string(),
            total: self.classifier.len(),
        })
    }

    /// Classifies the current pose and routes the label to the gesture handler.
    pub fn predict_pose(&mut self) -> Result<PredictOutcome> {
        if self.classifier.is_empty() {
            log::info!("No training examples available");
            return Ok(PredictOutcome::NoTrainingData);
        }

        let hand = match self.detect_once()? {
            Detection::Hand(hand) => hand,
            Detection::NoHand => {
                log::info!("No hand detected");
                return Ok(PredictOutcome::NoHand);
            }
            Detection::NoFrame => {
                log::info!("no camera frame yet, skipping prediction");
                return Ok(PredictOutcome::NoFrame);
            }
        };

        let label = self.classifier.classify(&hand.flatten())?;
        let action = handle_prediction(&mut self.handler, &label);
        Ok(PredictOutcome::Predicted(action))
    }

    fn detect_once(&mut self) -> Result<Detection> {
        let Some(frame) = self.latest_frame.as_ref() else {
            return Ok(Detection::NoFrame);
        };
        let hand = self.source.estimate_hands(frame)?.into_iter().next();
        Ok(hand.map_or(Detection::NoHand, Detection::Hand))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;

    use anyhow::anyhow;

    use super::*;
    use crate::{gesture::tests::RecordingHandler, types::synthetic_landmarks};

    /// Replays queued detection results, then reports no hand.
    #[derive(Default)]
    pub(crate) struct ScriptedSource {
        pub(crate) script: VecDeque<Result<Option<Vec<[f32; 3]>>, String>>,
        pub(crate) calls: usize,
    }

    impl ScriptedSource {
        pub(crate) fn with(results: Vec<Option<Vec<[f32; 3]>>>) -> Self {
            Self {
                script: results.into_iter().map(Ok).collect(),
                calls: 0,
            }
        }
    }

    impl LandmarkSource for ScriptedSource {
        fn estimate_hands(&mut self, _frame: &Frame) -> Result<Vec<HandDetection>> {
            self.calls += 1;
            match self.script.pop_front() {
                Some(Ok(Some(landmarks))) => {
                    Ok(HandDetection::new(landmarks, 0.9, 1.0).into_iter().collect())
                }
                Some(Ok(None)) | None => Ok(Vec::new()),
                Some(Err(message)) => Err(anyhow!(message)),
            }
        }
    }

    pub(crate) fn test_frame() -> Frame {
        Frame::new(vec![0u8; 32 * 24 * 4], 32, 24)
    }

    fn session(source: ScriptedSource) -> Session<ScriptedSource, RecordingHandler> {
        Session::new(
            source,
            KnnClassifier::default(),
            Renderer::new(true),
            RecordingHandler::default(),
        )
    }

    fn uniform(value: f32) -> Vec<[f32; 3]> {
        vec![[value; 3]; 21]
    }

    #[test]
    fn captures_append_one_example_each_in_order() {
        let mut session = session(ScriptedSource::with(vec![
            None,
            Some(synthetic_landmarks(0.0)),
            Some(synthetic_landmarks(5.0)),
            Some(synthetic_landmarks(9.0)),
        ]));
        session.process_frame(test_frame());

        for (n, label) in ["move", "click", "move"].into_iter().enumerate() {
            let outcome = session.capture_pose(label).unwrap();
            assert_eq!(
                outcome,
                CaptureOutcome::Captured {
                    label: label.to_string(),
                    total: n + 1
                }
            );
        }

        let labels: Vec<&str> = session
            .classifier()
            .examples()
            .iter()
            .map(|e| e.label.as_str())
            .collect();
        assert_eq!(labels, ["move", "click", "move"]);
        assert_eq!(session.classifier().examples()[1].vector[0], 5.0);
    }

    #[test]
    fn capture_without_hand_changes_nothing() {
        let mut session = session(ScriptedSource::with(vec![None, None]));
        session.process_frame(test_frame());

        assert_eq!(session.capture_pose("move").unwrap(), CaptureOutcome::NoHand);
        assert!(session.classifier().is_empty());
    }

    #[test]
    fn actions_before_first_frame_skip_detection() {
        let mut session = session(ScriptedSource::default());
        assert_eq!(session.capture_pose("move").unwrap(), CaptureOutcome::NoFrame);
        assert_eq!(session.source().calls, 0);
    }

    #[test]
    fn predict_with_empty_training_set_does_nothing() {
        let mut session = session(ScriptedSource::with(vec![None, Some(uniform(0.0))]));
        session.process_frame(test_frame());
        let calls_before = session.source().calls;

        assert_eq!(
            session.predict_pose().unwrap(),
            PredictOutcome::NoTrainingData
        );
        assert_eq!(
            PredictOutcome::NoTrainingData.describe(),
            "No training examples available"
        );
        assert_eq!(session.source().calls, calls_before);
        assert!(session.handler().calls.is_empty());
        assert!(session.classifier().is_empty());
    }

    #[test]
    fn predict_routes_nearest_label_to_handler() {
        let mut session = session(ScriptedSource::with(vec![
            None,
            Some(uniform(0.0)),
            Some(uniform(100.0)),
            Some(uniform(0.0)),
        ]));
        session.process_frame(test_frame());
        session.capture_pose("move").unwrap();
        session.capture_pose("click").unwrap();

        assert_eq!(
            session.predict_pose().unwrap(),
            PredictOutcome::Predicted(GestureAction::Move)
        );
        assert_eq!(session.handler().calls, ["move"]);
    }

    #[test]
    fn predict_without_hand_is_reported() {
        let mut session = session(ScriptedSource::with(vec![
            None,
            Some(uniform(1.0)),
            None,
        ]));
        session.process_frame(test_frame());
        session.capture_pose("click").unwrap();

        assert_eq!(session.predict_pose().unwrap(), PredictOutcome::NoHand);
        assert!(session.handler().calls.is_empty());
    }

    #[test]
    fn frame_with_hand_updates_log_text() {
        let mut session = session(ScriptedSource::with(vec![Some(uniform(2.0))]));
        let report = session.process_frame(test_frame());

        assert!(report.hand.is_some());
        assert_eq!((report.rendered.width, report.rendered.height), (32, 24));
        assert!(session.log_text().starts_with("2,2,2,"));
        assert_eq!(session.log_text().split(',').count(), 63);
    }

    #[test]
    fn inference_errors_skip_the_action() {
        let mut source = ScriptedSource::with(vec![None]);
        source.script.push_back(Err("model exploded".into()));
        let mut session = session(source);
        session.process_frame(test_frame());

        assert!(session.capture_pose("move").is_err());
        assert!(session.classifier().is_empty());
    }
}
