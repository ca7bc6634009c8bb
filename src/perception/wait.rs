use std::time::Duration;

use crate::errors::{TileGridError, TileGridResult};
use crate::perception::template::{match_best_offloaded, match_multiscale_offloaded, Placement, Template};
use crate::perception::traits::ScreenCapture;
use crate::perception::types::Frame;

#[derive(Debug, Clone)]
pub struct PanelWaitConfig {
    pub max_wait_ms: u64,
    pub check_interval_ms: u64,
    pub threshold: f64,
    /// Best-effort floor accepted once the wait expires. `None` disables the fallback.
    pub relaxed_threshold: Option<f64>,
    /// Scale sweep for a multiscale search; empty means a single-scale search.
    pub scales: Vec<f64>,
}

impl Default for PanelWaitConfig {
    fn default() -> Self {
        Self {
            max_wait_ms: 35_000,
            check_interval_ms: 1_000,
            threshold: 0.3,
            relaxed_threshold: None,
            scales: Vec::new(),
        }
    }
}

/// A panel placement together with the frame it was found in.
#[derive(Debug, Clone)]
pub struct PanelMatch {
    pub placement: Placement,
    pub frame: Frame,
    /// True when only the relaxed floor was cleared.
    pub relaxed: bool,
}

impl PanelMatch {
    pub fn score(&self) -> f64 {
        self.placement.score()
    }
}

async fn search(frame: &Frame, template: &Template, scales: &[f64]) -> TileGridResult<Option<Placement>> {
    if scales.is_empty() {
        match_best_offloaded(frame, template).await
    } else {
        match_multiscale_offloaded(frame, template, scales).await
    }
}

/// Poll capture + localization until the template clears `threshold` or the
/// wall-clock budget runs out. Polls at least once; a further poll is skipped
/// when the previous one says it would finish past the budget.
pub async fn wait_for_panel(
    capture: &dyn ScreenCapture,
    template: &Template,
    config: &PanelWaitConfig,
) -> TileGridResult<PanelMatch> {
    let start = std::time::Instant::now();
    let budget = Duration::from_millis(config.max_wait_ms);
    let mut best: Option<PanelMatch> = None;

    let interval = Duration::from_millis(config.check_interval_ms);
    loop {
        let poll_start = std::time::Instant::now();
        match capture.capture().await {
            Ok(frame) => {
                let placement = match search(&frame, template, &config.scales).await {
                    Ok(placement) => placement,
                    Err(e) => {
                        tracing::warn!(panel = %template.name, error = %e, "panel search failed");
                        None
                    }
                };
                if let Some(placement) = placement {
                    let score = placement.score();
                    if score >= config.threshold {
                        tracing::info!(
                            panel = %template.name,
                            score,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "panel found"
                        );
                        return Ok(PanelMatch { placement, frame, relaxed: false });
                    }
                    tracing::debug!(panel = %template.name, score, threshold = config.threshold, "panel below threshold");
                    if best.as_ref().map_or(true, |b| score > b.score()) {
                        best = Some(PanelMatch { placement, frame, relaxed: true });
                    }
                }
            }
            Err(e) => {
                tracing::warn!(panel = %template.name, error = %e, "capture failed while waiting for panel");
            }
        }

        let last_poll = poll_start.elapsed();
        if start.elapsed() + interval + last_poll > budget {
            break;
        }
        tokio::time::sleep(interval).await;
    }

    let best_score = best.as_ref().map_or(0.0, |b| b.score());
    if let (Some(floor), Some(found)) = (config.relaxed_threshold, best) {
        if found.score() >= floor {
            tracing::warn!(panel = %template.name, score = found.score(), floor, "using relaxed panel match");
            return Ok(found);
        }
    }

    tracing::warn!(panel = %template.name, best_score, "panel wait expired");
    Err(TileGridError::PanelTimeout {
        panel: template.name.clone(),
        waited_ms: start.elapsed().as_millis() as u64,
        best_score,
    })
}
