use std::sync::Arc;

use crate::config::Config;
use crate::intake::Intake;
use crate::status::StatusStore;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Config,
    pub intake: Intake,
    pub statuses: Arc<dyn StatusStore>,
}
