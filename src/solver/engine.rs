use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::AppConfig;
use crate::errors::{TileGridError, TileGridResult};
use crate::executor::input::PointerActuator;
use crate::perception::grid::{partition, GridGeometry, Tile};
use crate::perception::template::{locate_tiles_offloaded, match_best_offloaded, Placement, Template};
use crate::perception::traits::ScreenCapture;
use crate::perception::types::{Frame, Rect};
use crate::perception::wait::{wait_for_panel, PanelWaitConfig};
use crate::solver::history::{self, SessionAudit};
use crate::solver::labeler::label_tiles;
use crate::solver::locate::locate_point;
use crate::solver::question::read_question;
use crate::solver::selection::{request_selection, SelectionEngine};
use crate::solver::state::{ActionKind, LoopOutcome, LoopReport};
use crate::solver::verify::{click_tiles, LoopSettings, VerificationLoop};
use crate::taxonomy::Taxonomy;
use crate::vision::prompts::PromptSet;
use crate::vision::provider::VisionClassifier;

/// Reference images the driver looks for on screen.
pub struct Templates {
    pub checkbox: Template,
    pub question: Template,
    pub grid: Template,
    /// Optional: a missing NEXT/DONE asset only skips that click.
    pub next: Option<Template>,
    pub done: Option<Template>,
}

impl Templates {
    pub fn load(assets_dir: &Path, config: &AppConfig) -> TileGridResult<Self> {
        let t = &config.thresholds;
        let button = t.button_threshold();
        let optional = |name: &str| match Template::load(assets_dir.join(name), button) {
            Ok(template) => Some(template),
            Err(e) => {
                tracing::warn!(template = name, error = %e, "optional template unavailable");
                None
            }
        };
        Ok(Self {
            checkbox: Template::load(assets_dir.join("checkbox.png"), button)?,
            question: Template::load(assets_dir.join("question_template.png"), t.question_panel)?,
            grid: Template::load(assets_dir.join("grid_template.png"), t.grid_panel)?,
            next: optional("next.png"),
            done: optional("done.png"),
        })
    }
}

/// `grid_objects.json` payload.
#[derive(Serialize)]
struct GridObjects<'a> {
    template: &'a str,
    score: f64,
    relaxed: bool,
    scale: f64,
    region: Rect,
    geometry: GridGeometry,
    objects: &'a [Tile],
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    /// 1-based puzzle round.
    pub round: u32,
    pub task_text: String,
    pub chosen_indexes: Vec<u8>,
    pub outcome: Option<LoopOutcome>,
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub rounds: Vec<RoundReport>,
}

impl SessionReport {
    pub fn solved(&self) -> usize {
        self.rounds.iter().filter(|r| r.ok).count()
    }
}

/// Drives a whole puzzle session: checkbox, then `solver.rounds` rounds of
/// question → grid → selection → clicks → verification, with NEXT between
/// rounds and DONE after the last.
pub struct Solver {
    config: AppConfig,
    taxonomy: Taxonomy,
    prompts: PromptSet,
    templates: Templates,
    capture: Arc<dyn ScreenCapture>,
    actuator: Arc<dyn PointerActuator>,
    classifier: Arc<dyn VisionClassifier>,
    audit: SessionAudit,
}

impl Solver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AppConfig,
        taxonomy: Taxonomy,
        prompts: PromptSet,
        templates: Templates,
        capture: Arc<dyn ScreenCapture>,
        actuator: Arc<dyn PointerActuator>,
        classifier: Arc<dyn VisionClassifier>,
        audit: SessionAudit,
    ) -> Self {
        Self { config, taxonomy, prompts, templates, capture, actuator, classifier, audit }
    }

    pub async fn run(&self) -> TileGridResult<SessionReport> {
        tracing::info!(session = %self.audit.session_id, rounds = self.config.solver.rounds, "session started");
        self.click_checkbox().await;

        let total = self.config.solver.rounds;
        let mut rounds = Vec::new();
        for round in 1..=total {
            tracing::info!(round, total, "=== round ===");
            match self.solve_round(round).await {
                Ok(report) => rounds.push(report),
                Err(e) => {
                    tracing::error!(round, error = %e, fatal = e.is_fatal(), "round failed");
                    rounds.push(RoundReport {
                        round,
                        task_text: String::new(),
                        chosen_indexes: Vec::new(),
                        outcome: None,
                        ok: false,
                        error: Some(e.to_string()),
                    });
                    if e.is_fatal() {
                        break;
                    }
                }
            }

            let (button, name) = if round < total {
                (self.templates.next.as_ref(), "NEXT")
            } else {
                (self.templates.done.as_ref(), "DONE")
            };
            if !self.click_button(button).await {
                tracing::warn!(button = name, "button not clicked, continuing");
            }
            tokio::time::sleep(Duration::from_millis(self.config.timing.round_pause_ms)).await;
        }

        let report = SessionReport { session_id: self.audit.session_id.clone(), rounds };
        tracing::info!(solved = report.solved(), total, "session finished");
        Ok(report)
    }

    /// Best effort: a failed capture, search or click is logged and the session goes on.
    async fn click_checkbox(&self) {
        let template = &self.templates.checkbox;
        let frame = match self.capture.capture().await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "capture failed, checkbox skipped");
                return;
            }
        };
        let placement = self.search(&frame, template).await;
        let score = placement.as_ref().map_or(0.0, |p| p.score());

        let target = match placement {
            Some(p) if p.score() >= template.min_score => Some(p.detection.center),
            _ => {
                let low = TileGridError::LowConfidenceMatch {
                    name: template.name.clone(),
                    score,
                    threshold: template.min_score,
                };
                tracing::warn!(error = %low, "checkbox template weak, asking vision");
                locate_point(self.classifier.as_ref(), &self.prompts, &frame, "checkbox").await
            }
        };

        match target {
            Some(point) => match self.actuator.click_at(point).await {
                Ok(()) => tracing::info!(x = point.x, y = point.y, score, "checkbox clicked"),
                Err(e) => tracing::warn!(x = point.x, y = point.y, error = %e, "checkbox click failed, continuing"),
            },
            None => tracing::warn!(score, "checkbox not found, continuing"),
        }
    }

    async fn search(&self, frame: &Frame, template: &Template) -> Option<Placement> {
        match match_best_offloaded(frame, template).await {
            Ok(placement) => placement,
            Err(e) => {
                tracing::warn!(template = %template.name, error = %e, "template search failed");
                None
            }
        }
    }

    async fn click_button(&self, template: Option<&Template>) -> bool {
        let Some(template) = template else {
            return false;
        };
        let frame = match self.capture.capture().await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(button = %template.name, error = %e, "capture failed");
                return false;
            }
        };
        let Some(placement) = self.search(&frame, template).await else {
            return false;
        };
        if placement.score() < template.min_score {
            let low = TileGridError::LowConfidenceMatch {
                name: template.name.clone(),
                score: placement.score(),
                threshold: template.min_score,
            };
            tracing::warn!(error = %low, "button skipped");
            return false;
        }
        match self.actuator.click_at(placement.detection.center).await {
            Ok(()) => {
                tracing::info!(button = %template.name, score = placement.score(), "button clicked");
                true
            }
            Err(e) => {
                tracing::warn!(button = %template.name, error = %e, "button click failed");
                false
            }
        }
    }

    async fn solve_round(&self, round: u32) -> TileGridResult<RoundReport> {
        let cfg = &self.config;
        let classifier = self.classifier.as_ref();

        // ── Question panel ────────────────────────────────────────────────
        let question_wait = PanelWaitConfig {
            max_wait_ms: cfg.timing.panel_wait_ms,
            check_interval_ms: cfg.timing.retry_interval_ms,
            threshold: self.templates.question.min_score,
            relaxed_threshold: None,
            scales: Vec::new(),
        };
        let panel = wait_for_panel(self.capture.as_ref(), &self.templates.question, &question_wait).await?;
        let question = read_question(classifier, &self.prompts, &self.taxonomy, &panel.placement.crop, panel.score()).await;
        self.audit.record(round, history::QUESTION, &question);

        // ── Grid panel ────────────────────────────────────────────────────
        let grid_wait = PanelWaitConfig {
            max_wait_ms: cfg.timing.panel_wait_ms,
            check_interval_ms: cfg.timing.retry_interval_ms,
            threshold: self.templates.grid.min_score,
            relaxed_threshold: Some(cfg.thresholds.grid_panel_relaxed),
            scales: cfg.solver.scales.clone(),
        };
        let grid = wait_for_panel(self.capture.as_ref(), &self.templates.grid, &grid_wait).await?;
        let region = &grid.placement.crop;
        let mut tiles = partition(region)?;
        label_tiles(classifier, &self.prompts, &self.taxonomy, &mut tiles).await;
        self.audit.record(
            round,
            history::GRID_OBJECTS,
            &GridObjects {
                template: &self.templates.grid.name,
                score: grid.score(),
                relaxed: grid.relaxed,
                scale: grid.placement.scale,
                region: grid.placement.detection.rect,
                geometry: GridGeometry::for_region(region.width(), region.height()),
                objects: &tiles,
            },
        );

        // ── Selection ─────────────────────────────────────────────────────
        let index_order: Vec<u8> = tiles.iter().map(|t| t.index).collect();
        let reply = request_selection(classifier, &self.prompts, &question, &panel.placement.crop, &tiles, &index_order).await;
        let decision = SelectionEngine::new(&self.taxonomy, cfg.thresholds.label_confidence)
            .select(&reply, &tiles, &question, &index_order);
        self.audit.record(round, history::GRID_CHOICE, &decision);

        let chosen = decision.chosen_indexes.clone();
        if chosen.is_empty() {
            tracing::warn!(round, "nothing to click this round");
            self.audit.record(
                round,
                history::GRID_VERIFY,
                &LoopReport {
                    outcome: LoopOutcome::Exhausted,
                    chosen_indexes: Vec::new(),
                    rounds: Vec::new(),
                    actions: Vec::new(),
                    observations: 0,
                },
            );
            return Ok(RoundReport {
                round,
                task_text: question.task_text,
                chosen_indexes: chosen,
                outcome: None,
                ok: false,
                error: None,
            });
        }

        // ── Initial clicks + verification ─────────────────────────────────
        let settings = LoopSettings::from_config(cfg);
        let mut initial = Vec::new();
        match self.capture.capture().await {
            Ok(before) => match locate_tiles_offloaded(&before, &tiles).await {
                Ok(detections) => {
                    click_tiles(self.actuator.as_ref(), &chosen, &detections, ActionKind::Initial, None, &settings, &mut initial)
                        .await;
                }
                Err(e) => tracing::warn!(round, error = %e, "tile relocation before initial clicks failed"),
            },
            Err(e) => tracing::warn!(round, error = %e, "capture before initial clicks failed"),
        }

        let verifier = VerificationLoop {
            capture: self.capture.as_ref(),
            actuator: self.actuator.as_ref(),
            classifier,
            prompts: &self.prompts,
            settings,
        };
        let mut report = verifier.run(&question, &chosen, &index_order, &tiles).await;
        initial.append(&mut report.actions);
        report.actions = initial;
        self.audit.record(round, history::GRID_VERIFY, &report);

        Ok(RoundReport {
            round,
            task_text: question.task_text,
            chosen_indexes: chosen,
            outcome: Some(report.outcome),
            ok: report.ok(),
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::perception::template::tests::textured;
    use crate::perception::types::Point;
    use crate::solver::testing::{FrameSequence, RecordingActuator, ScriptedClassifier};
    use image::RgbImage;
    use serde_json::{json, Value};

    const CONFIG: &str = r#"
[llm]
active_provider = "openai"

[llm.providers.openai]
display_name = "OpenAI"
api_base = "http://localhost/v1/chat/completions"
model = "gpt-4.1-mini"

[timing]
panel_wait_ms = 20
retry_interval_ms = 5
click_pause_ms = 0
verify_pause_ms = 0
round_pause_ms = 0

[solver]
rounds = 1
max_fix_rounds = 2
scales = [1.0]
"#;

    struct Screen {
        image: RgbImage,
        checkbox: RgbImage,
        question: RgbImage,
        grid: RgbImage,
        done: RgbImage,
    }

    /// Checkbox at (130, 4), question panel at (4, 4), grid at (60, 50), DONE at (130, 124).
    fn screen() -> Screen {
        let checkbox = textured(12, 12, 21);
        let question = textured(40, 20, 22);
        let grid = textured(72, 72, 23);
        let done = textured(16, 10, 24);
        let mut image = textured(160, 140, 20);
        image::imageops::replace(&mut image, &checkbox, 130, 4);
        image::imageops::replace(&mut image, &question, 4, 4);
        image::imageops::replace(&mut image, &grid, 60, 50);
        image::imageops::replace(&mut image, &done, 130, 124);
        Screen { image, checkbox, question, grid, done }
    }

    fn templates(s: &Screen, config: &AppConfig) -> Templates {
        let button = config.thresholds.button_threshold();
        Templates {
            checkbox: Template::from_image("checkbox.png", s.checkbox.clone(), button),
            question: Template::from_image("question_template.png", s.question.clone(), config.thresholds.question_panel),
            grid: Template::from_image("grid_template.png", s.grid.clone(), config.thresholds.grid_panel),
            next: None,
            done: Some(Template::from_image("done.png", s.done.clone(), button)),
        }
    }

    fn script(labels: [&str; 9], selection: Value, verify: Vec<Value>) -> Vec<Result<Value, String>> {
        let mut out = vec![Ok(json!({
            "task_text": "Select all birds",
            "selection_criteria": "birds",
            "target_creature_category": "bird",
        }))];
        out.extend(labels.iter().map(|l| Ok(json!({"label": l, "conf": 0.9}))));
        out.push(Ok(selection));
        out.extend(verify.into_iter().map(Ok));
        out
    }

    #[tokio::test]
    async fn solves_one_round_end_to_end() {
        let config = parse_config(CONFIG).unwrap();
        let s = screen();
        let classifier = Arc::new(ScriptedClassifier::new(script(
            ["sparrow", "car", "pigeon", "cat", "", "", "", "", ""],
            json!({"indexes": [0], "reason": "bird"}),
            vec![
                json!({"correct_indexes": [0, 2], "selected_indexes": [0, 2], "ok": true}),
            ],
        )));
        let actuator = Arc::new(RecordingActuator::default());
        let artifacts = tempfile::tempdir().unwrap();
        let audit = SessionAudit::new(artifacts.path());
        let session_dir = audit.dir().to_path_buf();

        let solver = Solver::new(
            config.clone(),
            Taxonomy::builtin().unwrap(),
            PromptSet::default(),
            templates(&s, &config),
            Arc::new(FrameSequence::new(vec![s.image.clone()])),
            actuator.clone(),
            classifier.clone(),
            audit,
        );
        let report = solver.run().await.unwrap();

        assert_eq!(report.rounds.len(), 1);
        let round = &report.rounds[0];
        // Model picked 0; "all" expansion adds the other bird tile.
        assert_eq!(round.chosen_indexes, vec![0, 2]);
        assert_eq!(round.outcome, Some(LoopOutcome::Converged));
        assert!(round.ok);
        assert_eq!(report.solved(), 1);

        // checkbox, tile 0, tile 2, DONE
        assert_eq!(
            actuator.clicks(),
            vec![Point::new(136, 10), Point::new(72, 62), Point::new(120, 62), Point::new(138, 129)]
        );
        // question + 9 labels + selection + 1 verification
        assert_eq!(classifier.calls(), 12);

        for artifact in [history::QUESTION, history::GRID_OBJECTS, history::GRID_CHOICE, history::GRID_VERIFY] {
            assert!(session_dir.join("round_1").join(artifact).is_file(), "{artifact}");
        }
        let verify: Value = serde_json::from_str(
            &std::fs::read_to_string(session_dir.join("round_1").join(history::GRID_VERIFY)).unwrap(),
        )
        .unwrap();
        assert_eq!(verify["actions"][0]["kind"], "initial");
        assert_eq!(verify["outcome"], "converged");
    }

    #[tokio::test]
    async fn missing_question_panel_is_fatal_for_the_session() {
        let mut config = parse_config(CONFIG).unwrap();
        config.solver.rounds = 2;
        let s = screen();
        let mut blank = templates(&s, &config);
        blank.question = Template::from_image("question_template.png", textured(40, 20, 99), 0.9);
        let actuator = Arc::new(RecordingActuator::default());
        let artifacts = tempfile::tempdir().unwrap();

        let solver = Solver::new(
            config,
            Taxonomy::builtin().unwrap(),
            PromptSet::default(),
            blank,
            Arc::new(FrameSequence::new(vec![s.image.clone()])),
            actuator.clone(),
            Arc::new(ScriptedClassifier::new(vec![])),
            SessionAudit::new(artifacts.path()),
        );
        let report = solver.run().await.unwrap();
        assert_eq!(report.rounds.len(), 1);
        assert!(report.rounds[0].error.as_deref().is_some_and(|e| e.contains("question_template.png")));
        assert_eq!(actuator.clicks(), vec![Point::new(136, 10)]);
    }

    #[tokio::test]
    async fn weak_checkbox_falls_back_to_vision_point() {
        let mut config = parse_config(CONFIG).unwrap();
        config.solver.rounds = 0;
        let s = screen();
        let mut t = templates(&s, &config);
        t.checkbox = Template::from_image("checkbox.png", textured(12, 12, 98), 0.9);
        let actuator = Arc::new(RecordingActuator::default());
        let artifacts = tempfile::tempdir().unwrap();

        let solver = Solver::new(
            config,
            Taxonomy::builtin().unwrap(),
            PromptSet::default(),
            t,
            Arc::new(FrameSequence::new(vec![s.image.clone()])),
            actuator.clone(),
            Arc::new(ScriptedClassifier::new(vec![Ok(json!({"x": 50, "y": 60}))])),
            SessionAudit::new(artifacts.path()),
        );
        let report = solver.run().await.unwrap();
        assert!(report.rounds.is_empty());
        assert_eq!(actuator.clicks(), vec![Point::new(50, 60)]);
    }

    #[tokio::test]
    async fn checkbox_capture_or_click_failures_do_not_end_the_session() {
        let mut config = parse_config(CONFIG).unwrap();
        config.solver.rounds = 0;
        let s = screen();
        let artifacts = tempfile::tempdir().unwrap();
        let actuator = Arc::new(RecordingActuator::default());
        let blind = Solver::new(
            config.clone(),
            Taxonomy::builtin().unwrap(),
            PromptSet::default(),
            templates(&s, &config),
            Arc::new(FrameSequence::new(vec![])),
            actuator.clone(),
            Arc::new(ScriptedClassifier::new(vec![])),
            SessionAudit::new(artifacts.path()),
        );
        assert!(blind.run().await.unwrap().rounds.is_empty());
        assert!(actuator.clicks().is_empty());

        config.solver.rounds = 1;
        let actuator = Arc::new(RecordingActuator {
            fail_at: vec![Point::new(136, 10)],
            ..RecordingActuator::default()
        });
        let solver = Solver::new(
            config.clone(),
            Taxonomy::builtin().unwrap(),
            PromptSet::default(),
            templates(&s, &config),
            Arc::new(FrameSequence::new(vec![s.image.clone()])),
            actuator.clone(),
            Arc::new(ScriptedClassifier::new(script(
                ["sparrow", "", "", "", "", "", "", "", ""],
                json!({"indexes": [0]}),
                vec![json!({"correct_indexes": [0], "selected_indexes": [0], "ok": true})],
            ))),
            SessionAudit::new(artifacts.path()),
        );
        let report = solver.run().await.unwrap();
        assert_eq!(report.rounds.len(), 1);
        assert!(report.rounds[0].ok);
        assert_eq!(actuator.clicks()[0], Point::new(136, 10));
    }
}
