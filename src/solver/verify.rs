use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::config::AppConfig;
use crate::executor::input::PointerActuator;
use crate::perception::grid::Tile;
use crate::perception::template::locate_tiles_offloaded;
use crate::perception::traits::ScreenCapture;
use crate::perception::types::Detection;
use crate::solver::question::Question;
use crate::solver::selection::sanitize_indexes;
use crate::solver::state::{
    ActionKind, ActionResult, LoopOutcome, LoopReport, LoopState, RepairAction, VerificationRound,
};
use crate::vision::coerce::VerifyReply;
use crate::vision::prompts::{PromptSet, VERIFY_SELECTION};
use crate::vision::provider::VisionClassifier;

#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Repair rounds after the initial clicks; observations are capped at `max_fix_rounds + 1`.
    pub max_fix_rounds: u32,
    /// Minimum tile detection score for a click.
    pub click_threshold: f64,
    pub verify_pause_ms: u64,
    pub click_pause_ms: u64,
}

impl LoopSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_fix_rounds: config.solver.max_fix_rounds,
            click_threshold: config.thresholds.object_click,
            verify_pause_ms: config.timing.verify_pause_ms,
            click_pause_ms: config.timing.click_pause_ms,
        }
    }
}

/// Click every index whose current detection clears the gate; everything else
/// is skipped and logged. Each attempt is appended to `log`.
pub async fn click_tiles(
    actuator: &dyn PointerActuator,
    indexes: &[u8],
    detections: &BTreeMap<u8, Detection>,
    kind: ActionKind,
    round: Option<u32>,
    settings: &LoopSettings,
    log: &mut Vec<RepairAction>,
) {
    for &index in indexes {
        let det = detections.get(&index);
        let score = det.map(|d| d.score);
        let result = match det {
            Some(d) if d.score >= settings.click_threshold => match actuator.click_at(d.center).await {
                Ok(()) => {
                    tracing::info!(?kind, index, score = d.score, x = d.center.x, y = d.center.y, "tile clicked");
                    tokio::time::sleep(Duration::from_millis(settings.click_pause_ms)).await;
                    ActionResult::Clicked
                }
                Err(e) => {
                    tracing::warn!(?kind, index, error = %e, "tile click failed");
                    ActionResult::Failed
                }
            },
            _ => {
                tracing::warn!(
                    ?kind,
                    index,
                    score = score.unwrap_or(0.0),
                    threshold = settings.click_threshold,
                    "tile missing or below click gate, skipped"
                );
                ActionResult::Skipped
            }
        };
        log.push(RepairAction { round, kind, index, result, score });
    }
}

fn difference(a: &[u8], b: &[u8]) -> Vec<u8> {
    let b: BTreeSet<u8> = b.iter().copied().collect();
    a.iter().copied().filter(|i| !b.contains(i)).collect()
}

/// What one observation produced.
struct Observation {
    record: VerificationRound,
    detections: BTreeMap<u8, Detection>,
    /// Capture or verification failed; nothing to repair from.
    failed: bool,
}

/// Bounded observe → repair controller for one puzzle round.
pub struct VerificationLoop<'a> {
    pub capture: &'a dyn ScreenCapture,
    pub actuator: &'a dyn PointerActuator,
    pub classifier: &'a dyn VisionClassifier,
    pub prompts: &'a PromptSet,
    pub settings: LoopSettings,
}

impl<'a> VerificationLoop<'a> {
    /// Run until `Converged`, `GridChanged` or `Exhausted`. The initial clicks
    /// for `chosen` must already have happened. Never fails.
    pub async fn run(
        &self,
        question: &Question,
        chosen: &[u8],
        index_order: &[u8],
        tiles: &[Tile],
    ) -> LoopReport {
        let mut rounds: Vec<VerificationRound> = Vec::new();
        let mut actions: Vec<RepairAction> = Vec::new();
        let mut detections = BTreeMap::new();
        let mut observations = 0u32;
        let mut state = LoopState::Observing { round: 0 };

        let outcome = loop {
            match state {
                LoopState::Observing { round } => {
                    tokio::time::sleep(Duration::from_millis(self.settings.verify_pause_ms)).await;
                    observations += 1;
                    let mut obs = self.observe(round, question, chosen, index_order, tiles).await;
                    state = next_state(&obs, index_order.len(), self.settings.max_fix_rounds);
                    if matches!(state, LoopState::GridChanged { .. }) {
                        obs.record.note = Some("grid_changed".into());
                    }
                    tracing::info!(
                        round,
                        missed = ?obs.record.missed,
                        extra = ?obs.record.extra,
                        ok = obs.record.ok,
                        detected = obs.record.detected,
                        next = ?state,
                        "verification round"
                    );
                    rounds.push(obs.record);
                    detections = obs.detections;
                }
                LoopState::Repairing { round, ref missed, ref extra } => {
                    for (indexes, kind) in [(missed, ActionKind::Add), (extra, ActionKind::Remove)] {
                        click_tiles(self.actuator, indexes, &detections, kind, Some(round), &self.settings, &mut actions)
                            .await;
                    }
                    state = LoopState::Observing { round: round + 1 };
                }
                LoopState::Converged { .. } | LoopState::Exhausted { .. } | LoopState::GridChanged { .. } => {
                    break state.outcome().unwrap_or(LoopOutcome::Exhausted);
                }
            }
        };

        tracing::info!(?outcome, observations, clicks = actions.len(), "verification loop finished");
        LoopReport {
            outcome,
            chosen_indexes: chosen.to_vec(),
            rounds,
            actions,
            observations,
        }
    }

    async fn observe(
        &self,
        round: u32,
        question: &Question,
        chosen: &[u8],
        index_order: &[u8],
        tiles: &[Tile],
    ) -> Observation {
        let mut record = VerificationRound {
            round,
            should_select: Vec::new(),
            is_selected: Vec::new(),
            missed: Vec::new(),
            extra: Vec::new(),
            ok: false,
            reason: String::new(),
            detected: 0,
            note: None,
        };

        let frame = match self.capture.capture().await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(round, error = %e, "capture failed during verification");
                record.note = Some("capture_failed".into());
                return Observation { record, detections: BTreeMap::new(), failed: true };
            }
        };

        let mut detections = match locate_tiles_offloaded(&frame, tiles).await {
            Ok(detections) => detections,
            Err(e) => {
                tracing::warn!(round, error = %e, "tile relocation failed");
                record.note = Some("locate_failed".into());
                return Observation { record, detections: BTreeMap::new(), failed: true };
            }
        };
        detections.retain(|idx, _| index_order.contains(idx));
        record.detected = detections
            .values()
            .filter(|d| d.score >= self.settings.click_threshold)
            .count();

        let order = format!("{index_order:?}");
        let instructions = self.prompts.render(
            VERIFY_SELECTION,
            &[("task_text", question.task_text.as_str()), ("index_order", order.as_str())],
        );
        let reply = match self
            .classifier
            .classify(std::slice::from_ref(frame.image()), &instructions)
            .await
        {
            Ok(v) => VerifyReply::from_value(&v),
            Err(e) => {
                tracing::warn!(round, error = %e, "verification call failed");
                record.note = Some("verify_failed".into());
                return Observation { record, detections, failed: true };
            }
        };

        let mut should = sanitize_indexes(&reply.correct_indexes, index_order);
        if should.is_empty() {
            should = chosen.to_vec();
        }
        let is = sanitize_indexes(&reply.selected_indexes, index_order);
        record.missed = difference(&should, &is);
        record.extra = difference(&is, &should);
        record.should_select = should;
        record.is_selected = is;
        record.ok = reply.ok;
        record.reason = reply.reason;
        Observation { record, detections, failed: false }
    }
}

/// Transition out of `Observing`, checked in order: convergence, budget,
/// failed observation, grid change, repair.
fn next_state(obs: &Observation, expected: usize, max_fix_rounds: u32) -> LoopState {
    let r = &obs.record;
    if !obs.failed && r.ok && r.missed.is_empty() && r.extra.is_empty() {
        return LoopState::Converged { round: r.round };
    }
    if r.round >= max_fix_rounds {
        return LoopState::Exhausted { round: r.round };
    }
    if obs.failed {
        return LoopState::Observing { round: r.round + 1 };
    }
    if r.detected <= expected / 2 {
        return LoopState::GridChanged { round: r.round };
    }
    LoopState::Repairing {
        round: r.round,
        missed: r.missed.clone(),
        extra: r.extra.clone(),
    }
}
