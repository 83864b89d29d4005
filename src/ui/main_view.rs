use super::render_util::frame_to_image;
use super::{
    ActiveTheme, AnyElement, AppView, Arc, Button, ButtonVariants, Context, DEFAULT_CAMERA_RATIO,
    IntoElement, ObjectFit, ParentElement, RenderImage, SharedString, Styled, StyledImage,
    VIDEO_WIDTH, Window, div, h_flex, img, px, v_flex,
};
use crate::{gesture::GestureAction, pipeline::SessionCommand};

impl AppView {
    pub(super) fn render_main(
        &mut self,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        self.poll_updates(window, cx);

        let ratio = self
            .frame_size
            .filter(|&(_, h)| h > 0)
            .map(|(w, h)| w as f32 / h as f32)
            .unwrap_or(DEFAULT_CAMERA_RATIO);

        let frame_view: AnyElement = if let Some(image) = &self.latest_image {
            img(image.clone())
                .size_full()
                .object_fit(ObjectFit::Contain)
                .into_any_element()
        } else {
            div()
                .size_full()
                .flex()
                .items_center()
                .justify_center()
                .text_sm()
                .text_color(gpui::rgb(0x8b95a5))
                .child("Waiting for camera...")
                .into_any_element()
        };

        let video = div()
            .w(px(VIDEO_WIDTH))
            .h(px(VIDEO_WIDTH / ratio))
            .overflow_hidden()
            .rounded_lg()
            .bg(gpui::rgb(0x000000))
            .child(frame_view);

        let mut buttons = h_flex().gap_2();
        for action in GestureAction::TRAINABLE {
            let label = action.label().to_string();
            buttons = buttons.child(
                Button::new(SharedString::from(format!("capture-{label}")))
                    .outline()
                    .label(format!("Capture {}", action.display_name()))
                    .on_click(cx.listener(move |this, _, _, cx| {
                        this.send_command(SessionCommand::Capture(label.clone()));
                        cx.notify();
                    })),
            );
        }
        buttons = buttons.child(
            Button::new(SharedString::from("predict"))
                .primary()
                .label("Predict")
                .on_click(cx.listener(|this, _, _, cx| {
                    this.send_command(SessionCommand::Predict);
                    cx.notify();
                })),
        );

        let theme = cx.theme();

        let counts = if self.label_counts.is_empty() {
            "No training examples yet".to_string()
        } else {
            self.label_counts
                .iter()
                .map(|(label, count)| format!("{label}: {count}"))
                .collect::<Vec<_>>()
                .join("  ")
        };

        let info_row = h_flex()
            .justify_between()
            .gap_2()
            .text_xs()
            .text_color(theme.muted_foreground)
            .child(format!("Camera: {}", self.camera_stream.device()))
            .child(counts);

        let status = div()
            .text_sm()
            .text_color(theme.foreground)
            .child(self.status.clone().unwrap_or_default());

        let log_text = if self.log_text.is_empty() {
            "No hand seen yet".to_string()
        } else {
            self.log_text.clone()
        };
        let log_view = div()
            .w(px(VIDEO_WIDTH))
            .p_2()
            .rounded_md()
            .border_1()
            .border_color(theme.border)
            .bg(theme.muted)
            .font_family(theme.mono_font_family.clone())
            .text_xs()
            .text_color(theme.foreground)
            .child(log_text);

        v_flex()
            .size_full()
            .gap_3()
            .p_4()
            .items_center()
            .bg(theme.background)
            .child(video)
            .child(v_flex().w(px(VIDEO_WIDTH)).gap_2().child(info_row).child(buttons))
            .child(div().w(px(VIDEO_WIDTH)).child(status))
            .child(log_view)
            .into_any_element()
    }

    fn poll_updates(&mut self, window: &mut Window, cx: &mut Context<'_, Self>) {
        let mut latest_frame = None;
        while let Ok(update) = self.update_rx.try_recv() {
            if update.frame.is_some() {
                latest_frame = update.frame;
            }
            if update.status.is_some() {
                self.status = update.status;
            }
            self.log_text = update.log_text;
            self.label_counts = update.label_counts;
        }

        // Only the newest frame is worth uploading.
        if let Some(frame) = latest_frame {
            self.frame_size = Some((frame.width, frame.height));
            if let Some(image) = frame_to_image(frame) {
                self.replace_latest_image(image, window, cx);
            }
        }
    }

    fn replace_latest_image(
        &mut self,
        new_image: Arc<RenderImage>,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) {
        if let Some(old_image) = self.latest_image.replace(new_image) {
            // Release the old texture, or the sprite atlas keeps every frame.
            cx.drop_image(old_image, Some(window));
        }
    }
}
