use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError, select};

use super::landmarks::LandmarkSource;
use crate::{
    gesture::GestureHandler,
    session::Session,
    types::Frame,
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STATUS_SEND_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Clone, Debug, PartialEq)]
pub enum SessionCommand {
    Capture(String),
    Predict,
}

/// What the UI needs to redraw after one step of the detection loop.
#[derive(Clone, Debug)]
pub struct SessionUpdate {
    pub frame: Option<Frame>,
    pub log_text: String,
    pub status: Option<String>,
    pub label_counts: Vec<(String, usize)>,
}

/// Handle to the thread that owns the [`Session`]. Stops and joins it on
/// `stop` or drop.
#[derive(Debug)]
pub struct DetectionLoop {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl DetectionLoop {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DetectionLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn start_detection_loop<S, H>(
    mut session: Session<S, H>,
    frame_rx: Receiver<Frame>,
    command_rx: Receiver<SessionCommand>,
    update_tx: Sender<SessionUpdate>,
) -> Result<DetectionLoop>
where
    S: LandmarkSource,
    H: GestureHandler,
{
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let handle = thread::Builder::new()
        .name("detection".into())
        .spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                select! {
                    recv(command_rx) -> command => {
                        let Ok(command) = command else {
                            log::debug!("command sender gone, stopping detection");
                            break;
                        };
                        let status = run_command(&mut session, command);
                        let update = snapshot(&session, None, Some(status));
                        if update_tx.send_timeout(update, STATUS_SEND_TIMEOUT).is_err() {
                            log::warn!("ui did not take session status in time");
                        }
                    }
                    recv(frame_rx) -> frame => {
                        let Ok(frame) = frame else {
                            log::debug!("camera stream closed, stopping detection");
                            break;
                        };
                        let frame = drain_latest(frame, &frame_rx);
                        let report = session.process_frame(frame);
                        let update = snapshot(&session, Some(report.rendered), None);
                        if let Err(TrySendError::Disconnected(_)) = update_tx.try_send(update) {
                            break;
                        }
                    }
                    default(POLL_INTERVAL) => {}
                }
            }
            log::info!("detection loop stopped");
        })
        .context("failed to spawn detection thread")?;

    Ok(DetectionLoop {
        stop,
        handle: Some(handle),
    })
}

fn run_command<S, H>(session: &mut Session<S, H>, command: SessionCommand) -> String
where
    S: LandmarkSource,
    H: GestureHandler,
{
    match command {
        SessionCommand::Capture(label) => match session.capture_pose(&label) {
            Ok(outcome) => outcome.describe(),
            Err(err) => {
                log::warn!("capture for {label} failed: {err:?}");
                format!("Capture failed: {err}")
            }
        },
        SessionCommand::Predict => match session.predict_pose() {
            Ok(outcome) => outcome.describe(),
            Err(err) => {
                log::warn!("prediction failed: {err:?}");
                format!("Prediction failed: {err}")
            }
        },
    }
}

fn snapshot<S, H>(
    session: &Session<S, H>,
    frame: Option<Frame>,
    status: Option<String>,
) -> SessionUpdate
where
    S: LandmarkSource,
    H: GestureHandler,
{
    SessionUpdate {
        frame,
        log_text: session.log_text().to_string(),
        status,
        label_counts: session.classifier().label_counts(),
    }
}

fn drain_latest(mut frame: Frame, frame_rx: &Receiver<Frame>) -> Frame {
    // Skip frames that queued up while the last one was processed.
    while let Ok(newer) = frame_rx.try_recv() {
        frame = newer;
    }
    frame
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::{bounded, unbounded};

    use super::*;
    use crate::{
        classifier::KnnClassifier,
        gesture::tests::RecordingHandler,
        pipeline::render::Renderer,
        session::tests::{ScriptedSource, test_frame},
    };

    const WAIT: Duration = Duration::from_secs(5);

    fn spawn(
        source: ScriptedSource,
    ) -> (
        DetectionLoop,
        Sender<Frame>,
        Sender<SessionCommand>,
        Receiver<SessionUpdate>,
    ) {
        let session = Session::new(
            source,
            KnnClassifier::default(),
            Renderer::new(true),
            RecordingHandler::default(),
        );
        let (frame_tx, frame_rx) = bounded(1);
        let (command_tx, command_rx) = unbounded();
        let (update_tx, update_rx) = bounded(4);
        let detection = start_detection_loop(session, frame_rx, command_rx, update_tx).unwrap();
        (detection, frame_tx, command_tx, update_rx)
    }

    #[test]
    fn frame_then_capture_reports_status() {
        let (detection, frame_tx, command_tx, update_rx) =
            spawn(ScriptedSource::with(vec![None, Some(vec![[1.0; 3]; 21])]));

        frame_tx.send(test_frame()).unwrap();
        let update = update_rx.recv_timeout(WAIT).unwrap();
        assert!(update.frame.is_some());
        assert!(update.status.is_none());

        command_tx
            .send(SessionCommand::Capture("click".into()))
            .unwrap();
        let update = update_rx.recv_timeout(WAIT).unwrap();
        assert!(update.frame.is_none());
        assert_eq!(
            update.status.as_deref(),
            Some("Captured pose for label: click (1 examples)")
        );
        assert_eq!(update.label_counts, vec![("click".to_string(), 1)]);

        detection.stop();
    }

    #[test]
    fn predict_without_examples_reports_empty_training_set() {
        let (detection, _frame_tx, command_tx, update_rx) = spawn(ScriptedSource::default());

        command_tx.send(SessionCommand::Predict).unwrap();
        let update = update_rx.recv_timeout(WAIT).unwrap();
        assert_eq!(
            update.status.as_deref(),
            Some("No training examples available")
        );
        assert!(update.label_counts.is_empty());

        detection.stop();
    }

    #[test]
    fn stop_joins_idle_loop() {
        let (detection, _frame_tx, _command_tx, _update_rx) = spawn(ScriptedSource::default());
        detection.stop();
    }

    #[test]
    fn loop_exits_when_camera_goes_away() {
        let (detection, frame_tx, _command_tx, update_rx) = spawn(ScriptedSource::default());
        drop(frame_tx);
        // The loop drops its update sender once it exits.
        assert!(update_rx.recv_timeout(WAIT).is_err());
        drop(detection);
    }

    #[test]
    fn drain_keeps_newest_frame() {
        let (tx, rx) = unbounded();
        let mut newest = test_frame();
        newest.width = 7;
        tx.send(test_frame()).unwrap();
        tx.send(newest).unwrap();
        assert_eq!(drain_latest(test_frame(), &rx).width, 7);
    }
}
