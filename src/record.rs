use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::work::DocumentItem;

/// One labeled piece of judgement text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFragment {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}

/// Structured extraction result for one judgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub title: String,
    pub texts: Vec<TextFragment>,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
}

impl Record {
    pub fn empty(url: &str) -> Self {
        Self {
            title: String::new(),
            texts: Vec::new(),
            url: url.to_string(),
            timestamp: Utc::now(),
            year: None,
            page: None,
            doc_id: None,
        }
    }

    /// Stamp the work item's metadata onto an extracted record.
    pub fn for_item(mut self, item: &DocumentItem) -> Self {
        self.year = Some(item.year);
        self.page = Some(item.page);
        self.doc_id = Some(item.doc_id.clone());
        self
    }

    /// No text was recovered; treated like a failed fetch.
    pub fn is_incomplete(&self) -> bool {
        self.texts.is_empty()
    }
}
