use relsheets_parse::FORMULA_MARKER;

/// Evaluation settings for a [`Sheet`](crate::Sheet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalConfig {
    /// Leading character that turns cell text into a formula.
    pub marker: char,
    /// Cells a newly added extra column starts with.
    pub extra_column_rows: usize,
    /// Rows fetched by [`Sheet::reload`](crate::Sheet::reload).
    pub page_size: u32,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            marker: FORMULA_MARKER,
            extra_column_rows: 100,
            page_size: 100,
        }
    }
}

impl EvalConfig {
    pub fn with_marker(mut self, marker: char) -> Self {
        self.marker = marker;
        self
    }

    pub fn with_extra_column_rows(mut self, rows: usize) -> Self {
        self.extra_column_rows = rows;
        self
    }

    pub fn with_page_size(mut self, rows: u32) -> Self {
        self.page_size = rows;
        self
    }
}
