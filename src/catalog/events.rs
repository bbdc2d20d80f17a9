use super::{Event, PayloadRegistry};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentProgramSceneChanged {
    pub scene_name: String,
    #[serde(default)]
    pub scene_uuid: Option<String>,
}

impl Event for CurrentProgramSceneChanged {
    const TYPE: &'static str = "CurrentProgramSceneChanged";
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStateChanged {
    pub output_active: bool,
    pub output_state: String,
}

impl Event for StreamStateChanged {
    const TYPE: &'static str = "StreamStateChanged";
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordStateChanged {
    pub output_active: bool,
    pub output_state: String,
    #[serde(default)]
    pub output_path: Option<String>,
}

impl Event for RecordStateChanged {
    const TYPE: &'static str = "RecordStateChanged";
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudioModeStateChanged {
    pub studio_mode_enabled: bool,
}

impl Event for StudioModeStateChanged {
    const TYPE: &'static str = "StudioModeStateChanged";
}

/// OBS is shutting down. Carries no data.
#[derive(Debug, Clone, Deserialize)]
pub struct ExitStarted {}

impl Event for ExitStarted {
    const TYPE: &'static str = "ExitStarted";
}

pub(crate) fn register_builtin(registry: &mut PayloadRegistry) {
    registry
        .register_event::<CurrentProgramSceneChanged>()
        .register_event::<StreamStateChanged>()
        .register_event::<RecordStateChanged>()
        .register_event::<StudioModeStateChanged>()
        .register_event::<ExitStarted>();
}
