use super::Request;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct GetVersion;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub obs_version: String,
    pub obs_web_socket_version: String,
    pub rpc_version: u32,
    #[serde(default)]
    pub available_requests: Vec<String>,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub platform_description: String,
}

impl Request for GetVersion {
    const TYPE: &'static str = "GetVersion";
    type Response = VersionInfo;
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct GetStats;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Stats {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub available_disk_space: f64,
    pub active_fps: f64,
    pub average_frame_render_time: f64,
    pub render_skipped_frames: u32,
    pub render_total_frames: u32,
    pub output_skipped_frames: u32,
    pub output_total_frames: u32,
}

impl Request for GetStats {
    const TYPE: &'static str = "GetStats";
    type Response = Stats;
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct GetStreamStatus;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamStatus {
    pub output_active: bool,
    pub output_reconnecting: bool,
    pub output_timecode: String,
    pub output_duration: u64,
    pub output_congestion: f64,
    pub output_bytes: u64,
    pub output_skipped_frames: u64,
    pub output_total_frames: u64,
}

impl Request for GetStreamStatus {
    const TYPE: &'static str = "GetStreamStatus";
    type Response = StreamStatus;
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct GetRecordStatus;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordStatus {
    pub output_active: bool,
    pub output_paused: bool,
    pub output_timecode: String,
    pub output_duration: u64,
    pub output_bytes: u64,
}

impl Request for GetRecordStatus {
    const TYPE: &'static str = "GetRecordStatus";
    type Response = RecordStatus;
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct GetStudioModeEnabled;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudioModeEnabled {
    pub studio_mode_enabled: bool,
}

impl Request for GetStudioModeEnabled {
    const TYPE: &'static str = "GetStudioModeEnabled";
    type Response = StudioModeEnabled;
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct GetOutputList;

#[derive(Debug, Clone, Deserialize)]
pub struct OutputList {
    pub outputs: Vec<OutputSummary>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSummary {
    pub output_name: String,
    #[serde(default)]
    pub output_kind: String,
    #[serde(default)]
    pub output_active: bool,
}

impl Request for GetOutputList {
    const TYPE: &'static str = "GetOutputList";
    type Response = OutputList;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetOutputStatus {
    pub output_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputStatus {
    pub output_active: bool,
    pub output_reconnecting: bool,
    pub output_duration: u64,
    pub output_bytes: u64,
    pub output_skipped_frames: u64,
    pub output_total_frames: u64,
}

impl Request for GetOutputStatus {
    const TYPE: &'static str = "GetOutputStatus";
    type Response = OutputStatus;
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct GetCurrentProgramScene;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentProgramScene {
    pub scene_name: String,
    #[serde(default)]
    pub scene_uuid: Option<String>,
}

impl Request for GetCurrentProgramScene {
    const TYPE: &'static str = "GetCurrentProgramScene";
    type Response = CurrentProgramScene;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCurrentProgramScene {
    pub scene_name: String,
}

impl Request for SetCurrentProgramScene {
    const TYPE: &'static str = "SetCurrentProgramScene";
    type Response = ();
}
