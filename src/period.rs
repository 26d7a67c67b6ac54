//! Period value object: one uniquely keyed fetch target

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Month labels indexed by ordinal. Ordinal 0 is the supplementary payroll
/// run outside the regular monthly cycle.
const MONTH_LABELS: [&str; 13] = [
    "Complementaría",
    "Enero",
    "Febrero",
    "Marzo",
    "Abril",
    "Mayo",
    "Junio",
    "Julio",
    "Agosto",
    "Septiembre",
    "Octubre",
    "Noviembre",
    "Diciembre",
];

/// Immutable identifier for one fetch target.
///
/// Identity is the (year, ordinal) pair; the label is presentation only and
/// ignored by equality and hashing. The unique key renders as
/// `"{year}-{ordinal:02}"`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Period {
    year: i32,
    ordinal: u8,
    label: String,
}

impl Period {
    /// Create a period for a calendar month, labeled from the month table.
    ///
    /// Accepts ordinals 0 (supplementary run) through 12 (December); anything
    /// above 12 has no month label and is rejected. Use [`Period::with_label`]
    /// for non-monthly schemes such as fortnightly ordinals.
    pub fn new(year: i32, ordinal: u8) -> Result<Self> {
        let label = MONTH_LABELS.get(ordinal as usize).ok_or_else(|| {
            Error::Validation(format!("ordinal {ordinal} has no month label (0..=12)"))
        })?;
        Self::with_label(year, ordinal, *label)
    }

    /// Create a period with an explicit label.
    ///
    /// The year must lie in 2000..=(current year + 1) and the ordinal in
    /// 0..=99. An empty label is allowed; display falls back to the year.
    pub fn with_label(year: i32, ordinal: u8, label: impl Into<String>) -> Result<Self> {
        let max_year = Utc::now().year() + 1;
        if year < 2000 || year > max_year {
            return Err(Error::Validation(format!(
                "year {year} out of range (2000..={max_year})"
            )));
        }
        if ordinal > 99 {
            return Err(Error::Validation(format!(
                "ordinal {ordinal} out of range (0..=99)"
            )));
        }

        Ok(Self {
            year,
            ordinal,
            label: label.into(),
        })
    }

    /// Year of the period
    pub fn year(&self) -> i32 {
        self.year
    }

    /// Ordinal within the year
    pub fn ordinal(&self) -> u8 {
        self.ordinal
    }

    /// Presentation label ("Enero", "Quincena 14", ...)
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Unique key for maps and logs: `"{year}-{ordinal:02}"`
    pub fn key(&self) -> String {
        format!("{}-{:02}", self.year, self.ordinal)
    }

    /// Human-readable name, also the basis for the period's folder name
    pub fn display_name(&self) -> String {
        if self.label.is_empty() {
            format!("Período {:02} - {}", self.ordinal, self.year)
        } else {
            format!("Período {:02}: {}", self.ordinal, self.label)
        }
    }
}

impl PartialEq for Period {
    fn eq(&self, other: &Self) -> bool {
        self.year == other.year && self.ordinal == other.ordinal
    }
}

impl Eq for Period {}

impl std::hash::Hash for Period {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.year.hash(state);
        self.ordinal.hash(state);
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
