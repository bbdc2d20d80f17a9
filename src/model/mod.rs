use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusFrame {
    pub timestamp_unix: u64,
    pub health: f32,
    pub obs: ObsFrame,
    pub outputs: Vec<OutputFrame>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ObsFrame {
    pub connected: bool,
    pub streaming: bool,
    pub recording: bool,
    pub studio_mode: bool,
    pub total_dropped_frames: u64,
    pub total_frames: u64,
    pub render_missed_frames: u32,
    pub render_total_frames: u32,
    pub output_skipped_frames: u32,
    pub output_total_frames: u32,
    pub active_fps: f32,
    pub average_frame_render_time_ms: f32,
    pub available_disk_space_mb: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OutputFrame {
    pub name: String,
    pub kind: String,
    pub active: bool,
}
