use serde::{Deserialize, Serialize};

/// Per-sheet calculation settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalcSettings {
    /// Whether cell and reference-handle writes recalculate immediately.
    pub calculation_mode: CalculationMode,
}

impl CalcSettings {
    #[must_use]
    pub fn manual() -> Self {
        Self {
            calculation_mode: CalculationMode::Manual,
        }
    }

    #[must_use]
    pub fn is_manual(&self) -> bool {
        self.calculation_mode == CalculationMode::Manual
    }

    #[must_use]
    pub fn is_automatic(&self) -> bool {
        !self.is_manual()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationMode {
    /// Writes trigger a synchronous `calculate()` of the affected tables.
    #[default]
    Automatic,
    /// Writes only update stored values; callers run `calculate()` themselves.
    Manual,
}
