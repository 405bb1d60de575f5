use crate::models::{QueryParameter, TransitionRow};

/// Format of the `Timestamp` column in the events table, e.g. `3/14/2024 1:05:09 PM`.
pub const EVENT_TIMESTAMP_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

pub const SOURCE_PARAMETER: &str = "source_input";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionQuery {
    /// Most frequent transitions across all sessions.
    Top { limit: u32 },
    /// Every transition leaving a single screen.
    FromSource { source: String },
}

impl TransitionQuery {
    pub fn sql(&self, table: &str) -> String {
        let screen_data = screen_data_cte(table);
        match self {
            Self::Top { limit } => format!(
                r#"WITH {screen_data},
FilteredTransitions AS (
    SELECT source, target
    FROM WithLead
    WHERE target IS NOT NULL
      AND source != target
),
TopTransitions AS (
    SELECT source, target, COUNT(*) AS transition_count
    FROM FilteredTransitions
    GROUP BY source, target
    ORDER BY transition_count DESC
    LIMIT {limit}
)
SELECT source AS Source, target AS Target, transition_count AS Value
FROM TopTransitions
ORDER BY Value DESC"#
            ),
            Self::FromSource { .. } => format!(
                r#"WITH {screen_data},
FilteredTransitions AS (
    SELECT source, target
    FROM WithLead
    WHERE target IS NOT NULL
      AND source = @{SOURCE_PARAMETER}
),
AggregatedTransitions AS (
    SELECT source, target, COUNT(*) AS transition_count
    FROM FilteredTransitions
    GROUP BY source, target
)
SELECT source AS Source, target AS Target, transition_count AS Value
FROM AggregatedTransitions
ORDER BY Value DESC"#
            ),
        }
    }

    pub fn parameters(&self) -> Vec<QueryParameter> {
        match self {
            Self::Top { .. } => Vec::new(),
            Self::FromSource { source } => vec![QueryParameter::string(SOURCE_PARAMETER, source)],
        }
    }

    pub fn row_limit(&self) -> Option<usize> {
        match self {
            Self::Top { limit } => Some(*limit as usize),
            Self::FromSource { .. } => None,
        }
    }

    /// Whether a decoded row belongs in this query's result set.
    pub fn admits(&self, row: &TransitionRow) -> bool {
        match self {
            Self::Top { .. } => true,
            Self::FromSource { source } => row.source == *source,
        }
    }
}

fn screen_data_cte(table: &str) -> String {
    format!(
        r#"ScreenData AS (
    SELECT
        territory,
        `Session Number`,
        `Current Screen`,
        PARSE_TIMESTAMP('{EVENT_TIMESTAMP_FORMAT}', Timestamp) AS parsed_timestamp
    FROM `{table}`
),
WithLead AS (
    SELECT
        territory,
        `Session Number`,
        `Current Screen` AS source,
        LEAD(`Current Screen`) OVER (
            PARTITION BY territory, `Session Number`
            ORDER BY parsed_timestamp
        ) AS target
    FROM ScreenData
)"#
    )
}
