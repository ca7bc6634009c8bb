/// States of the verification & repair loop for one puzzle round.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoopState {
    Observing { round: u32 },
    Repairing { round: u32, missed: Vec<u8>, extra: Vec<u8> },
    Converged { round: u32 },
    Exhausted { round: u32 },
    GridChanged { round: u32 },
}

impl LoopState {
    pub fn outcome(&self) -> Option<LoopOutcome> {
        match self {
            LoopState::Converged { .. } => Some(LoopOutcome::Converged),
            LoopState::Exhausted { .. } => Some(LoopOutcome::Exhausted),
            LoopState::GridChanged { .. } => Some(LoopOutcome::GridChanged),
            LoopState::Observing { .. } | LoopState::Repairing { .. } => None,
        }
    }
}

/// Terminal outcome. Only `Converged` is a success; the others are normal,
/// reportable failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopOutcome {
    Converged,
    Exhausted,
    GridChanged,
}

impl LoopOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LoopOutcome::Converged)
    }
}

/// One observation of the loop.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct VerificationRound {
    pub round: u32,
    pub should_select: Vec<u8>,
    pub is_selected: Vec<u8>,
    pub missed: Vec<u8>,
    pub extra: Vec<u8>,
    pub ok: bool,
    pub reason: String,
    /// Tiles re-detected above the click gate in this observation.
    pub detected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Initial,
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionResult {
    Clicked,
    Skipped,
    Failed,
}

/// One attempted tile click. Initial clicks happen before the loop and carry no round.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RepairAction {
    pub round: Option<u32>,
    pub kind: ActionKind,
    pub index: u8,
    pub result: ActionResult,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct LoopReport {
    pub outcome: LoopOutcome,
    pub chosen_indexes: Vec<u8>,
    pub rounds: Vec<VerificationRound>,
    pub actions: Vec<RepairAction>,
    /// Number of observations made.
    pub observations: u32,
}

impl LoopReport {
    pub fn ok(&self) -> bool {
        self.outcome.is_success()
    }
}
