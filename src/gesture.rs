#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GestureAction {
    Move,
    Click,
    DoubleClick,
    Unknown(String),
}

impl GestureAction {
    pub const TRAINABLE: [GestureAction; 3] = [
        GestureAction::Move,
        GestureAction::Click,
        GestureAction::DoubleClick,
    ];

    pub fn from_label(label: &str) -> Self {
        match label {
            "move" => GestureAction::Move,
            "click" => GestureAction::Click,
            "doubleClick" => GestureAction::DoubleClick,
            other => GestureAction::Unknown(other.to_string()),
        }
    }

    /// Label stored with training examples for this action.
    pub fn label(&self) -> &str {
        match self {
            GestureAction::Move => "move",
            GestureAction::Click => "click",
            GestureAction::DoubleClick => "doubleClick",
            GestureAction::Unknown(label) => label,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            GestureAction::Move => "Move",
            GestureAction::Click => "Click",
            GestureAction::DoubleClick => "Double Click",
            GestureAction::Unknown(label) => label,
        }
    }
}

/// Receives the action chosen for each prediction.
pub trait GestureHandler: Send + 'static {
    fn on_move(&mut self) {}
    fn on_click(&mut self) {}
    fn on_double_click(&mut self) {}
    fn on_unknown(&mut self, _label: &str) {}
}

/// Handler that only logs; pointer control is not wired up.
#[derive(Debug, Default)]
pub struct LoggingGestureHandler;

impl GestureHandler for LoggingGestureHandler {}

pub fn handle_prediction<H: GestureHandler + ?Sized>(handler: &mut H, label: &str) -> GestureAction {
    let action = GestureAction::from_label(label);
    match &action {
        GestureAction::Move => {
            log::info!("Move detected");
            handler.on_move();
        }
        GestureAction::Click => {
            log::info!("Click detected");
            handler.on_click();
        }
        GestureAction::DoubleClick => {
            log::info!("Double Click detected");
            handler.on_double_click();
        }
        GestureAction::Unknown(label) => {
            log::info!("Unknown gesture: {label}");
            handler.on_unknown(label);
        }
    }
    action
}
