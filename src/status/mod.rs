use crate::batch::{BatchRequest, BatchResults};
use crate::catalog::requests::{
    GetOutputList, GetRecordStatus, GetStats, GetStreamStatus, GetStudioModeEnabled,
};
use crate::catalog::Request;
use crate::engine::Engine;
use crate::error::EngineResult;
use crate::model::{ObsFrame, OutputFrame, StatusFrame};
use crate::protocol::ExecutionType;
use std::time::{SystemTime, UNIX_EPOCH};

/// Snapshots OBS state with one batch round trip.
pub struct StatusProbe {
    engine: Engine,
}

impl StatusProbe {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// A disconnected engine yields a frame with `connected = false`.
    pub async fn collect(&self) -> EngineResult<StatusFrame> {
        let timestamp_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();

        let requests = vec![
            BatchRequest::new(&GetStats)?,
            BatchRequest::new(&GetStreamStatus)?,
            BatchRequest::new(&GetRecordStatus)?,
            BatchRequest::new(&GetStudioModeEnabled)?,
            BatchRequest::new(&GetOutputList)?,
        ];
        let results = match self
            .engine
            .send_request_batch(Some(ExecutionType::SerialRealtime), Some(false), requests)
            .await
        {
            Ok(results) => results,
            Err(err) if err.is_disconnected() => {
                tracing::debug!(error = %err, "status probe skipped: not connected");
                return Ok(StatusFrame {
                    timestamp_unix,
                    ..StatusFrame::default()
                });
            }
            Err(err) => return Err(err),
        };

        let mut obs = ObsFrame {
            connected: true,
            ..ObsFrame::default()
        };

        if let Some(stats) = item::<GetStats>(&results) {
            obs.render_missed_frames = stats.render_skipped_frames;
            obs.render_total_frames = stats.render_total_frames;
            obs.output_skipped_frames = stats.output_skipped_frames;
            obs.output_total_frames = stats.output_total_frames;
            obs.active_fps = stats.active_fps as f32;
            obs.average_frame_render_time_ms = stats.average_frame_render_time as f32;
            obs.available_disk_space_mb = stats.available_disk_space;
        }
        if let Some(stream) = item::<GetStreamStatus>(&results) {
            obs.streaming = stream.output_active;
            obs.total_frames = stream.output_total_frames;
            obs.total_dropped_frames = stream.output_skipped_frames;
        }
        if let Some(record) = item::<GetRecordStatus>(&results) {
            obs.recording = record.output_active;
        }
        if let Some(studio) = item::<GetStudioModeEnabled>(&results) {
            obs.studio_mode = studio.studio_mode_enabled;
        }

        let outputs = item::<GetOutputList>(&results)
            .map(|list| {
                list.outputs
                    .iter()
                    .map(|output| OutputFrame {
                        name: output.output_name.clone(),
                        kind: output.output_kind.clone(),
                        active: output.output_active,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let health = compute_health(
            u64::from(obs.output_skipped_frames),
            u64::from(obs.output_total_frames),
        );

        Ok(StatusFrame {
            timestamp_unix,
            health,
            obs,
            outputs,
        })
    }
}

fn item<R: Request>(results: &BatchResults) -> Option<&R::Response> {
    match results.typed::<R>(R::TYPE) {
        Ok(response) => Some(response),
        Err(err) => {
            tracing::warn!(request_type = R::TYPE, error = %err, "status item unavailable");
            None
        }
    }
}

fn compute_health(skipped: u64, total: u64) -> f32 {
    if total == 0 {
        return 1.0;
    }
    let health = 1.0 - skipped as f32 / total as f32;
    health.clamp(0.0, 1.0)
}
