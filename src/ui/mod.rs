use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use gpui::{
    AnyElement, App, AppContext, Context, IntoElement, ObjectFit, ParentElement, Render,
    RenderImage, SharedString, Styled, StyledImage, TitlebarOptions, Window, WindowOptions, div,
    img, px,
};
use gpui_component::{
    ActiveTheme, Root,
    button::{Button, ButtonVariants},
    h_flex, v_flex,
};
use image::{Frame as ImageFrame, ImageBuffer, Rgba};

use crate::pipeline::{CameraStream, DetectionLoop, SessionCommand, SessionUpdate};

mod main_view;
mod render_util;

const WINDOW_TITLE: &str = "Gesture Trainer";
const DEFAULT_CAMERA_RATIO: f32 = 16.0 / 9.0;
const VIDEO_WIDTH: f32 = 720.0;

/// Background pieces the window drives; they stop when the view is dropped.
pub struct UiRuntime {
    pub update_rx: Receiver<SessionUpdate>,
    pub command_tx: Sender<SessionCommand>,
    pub detection_loop: DetectionLoop,
    pub camera_stream: CameraStream,
}

pub fn launch_ui(app: &mut App, runtime: UiRuntime) -> gpui::Result<()> {
    let window_options = WindowOptions {
        titlebar: Some(TitlebarOptions {
            title: Some(WINDOW_TITLE.into()),
            ..Default::default()
        }),
        ..Default::default()
    };

    app.open_window(window_options, move |window, app| {
        let view = app.new(|_| AppView::new(runtime));
        app.new(|cx| Root::new(view, window, cx))
    })?;

    Ok(())
}

// Field order matters: the update receiver goes first so a detection thread
// blocked on sending sees the disconnect while its handle joins it.
struct AppView {
    update_rx: Receiver<SessionUpdate>,
    command_tx: Sender<SessionCommand>,
    _detection_loop: DetectionLoop,
    camera_stream: CameraStream,
    latest_image: Option<Arc<RenderImage>>,
    frame_size: Option<(u32, u32)>,
    log_text: String,
    status: Option<String>,
    label_counts: Vec<(String, usize)>,
}

impl AppView {
    fn new(runtime: UiRuntime) -> Self {
        Self {
            update_rx: runtime.update_rx,
            command_tx: runtime.command_tx,
            _detection_loop: runtime.detection_loop,
            camera_stream: runtime.camera_stream,
            latest_image: None,
            frame_size: None,
            log_text: String::new(),
            status: None,
            label_counts: Vec::new(),
        }
    }

    fn send_command(&mut self, command: SessionCommand) {
        log::debug!("ui command: {command:?}");
        if self.command_tx.send(command).is_err() {
            log::error!("detection loop is gone, command dropped");
            self.status = Some("Detection stopped".to_string());
        }
    }
}

impl Render for AppView {
    fn render(
        &mut self,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> impl gpui::IntoElement {
        // Keep pulling camera frames even without user input.
        cx.defer_in(window, |_, _, cx| {
            cx.notify();
        });

        self.render_main(window, cx)
    }
}
