use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Idle,
    Processing,
    Completed,
}

/// Durable cursor over the flat link index.
///
/// `index` is the position of the last item whose outcome (record or
/// definitive failure) has been committed, `-1` before the first one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMarker {
    pub year: Option<i32>,
    pub page: Option<u32>,
    pub index: i64,
    pub total_processed: u64,
    pub status: Status,
}

impl Default for ProgressMarker {
    fn default() -> Self {
        Self {
            year: None,
            page: None,
            index: -1,
            total_processed: 0,
            status: Status::Idle,
        }
    }
}

impl ProgressMarker {
    /// The item at `index` has been attempted.
    pub fn advance(&mut self, index: usize, year: i32, page: u32, succeeded: bool) {
        self.year = Some(year);
        self.page = Some(page);
        self.index = index as i64;
        self.status = Status::Processing;
        if succeeded {
            self.total_processed += 1;
        }
    }

    /// Position of the last committed item, if any.
    pub fn committed(&self) -> Option<usize> {
        usize::try_from(self.index).ok()
    }
}

/// First index to process. A marker is only honoured when resuming.
pub fn resume_index(marker: Option<&ProgressMarker>, resume: bool) -> usize {
    match marker {
        Some(m) if resume => m.committed().map_or(0, |i| i + 1),
        _ => 0,
    }
}

/// Position of the link discovery phase: the listing page about to be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingProgress {
    pub current_year: i32,
    pub current_page: u32,
}
