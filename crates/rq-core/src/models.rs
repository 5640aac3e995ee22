//! # Domain Models
//!
//! These structs represent the core entities of rusty-qsl.
//! A `Card` is never stored as such: the store keeps the image plus one
//! encoded metadata string, and a `Card` is rebuilt from both on every read.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::ContextPayload;

/// Codec key holding the callsign. Kept in French for compatibility with
/// cards already sitting in the store.
pub const CALLSIGN_KEY: &str = "indicatif";
/// Codec key holding the download counter.
pub const DOWNLOADS_KEY: &str = "downloads";

/// The metadata record packed into a card's context string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QslRecord {
    pub callsign: String,
    pub date: String,
    pub time: String,
    pub band: String,
    pub mode: String,
    pub report: String,
    /// Stored unwrapped; wrapping only happens when the panel is rendered.
    pub note: String,
    pub downloads: u64,
    /// Keys written by older variants that this version does not model.
    /// Carried through re-encoding so a counter bump never drops them.
    #[serde(skip)]
    pub extra: BTreeMap<String, String>,
}

impl QslRecord {
    /// Flattens the record into codec fields.
    pub fn to_fields(&self) -> BTreeMap<String, String> {
        let mut fields = self.extra.clone();
        fields.insert(CALLSIGN_KEY.to_string(), self.callsign.clone());
        fields.insert("date".to_string(), self.date.clone());
        fields.insert("time".to_string(), self.time.clone());
        fields.insert("band".to_string(), self.band.clone());
        fields.insert("mode".to_string(), self.mode.clone());
        fields.insert("report".to_string(), self.report.clone());
        fields.insert("note".to_string(), self.note.clone());
        fields.insert(DOWNLOADS_KEY.to_string(), self.downloads.to_string());
        fields
    }

    /// Rebuilds a record from decoded codec fields. Missing keys become empty
    /// strings and an unparsable counter reads as zero.
    pub fn from_fields(mut fields: BTreeMap<String, String>) -> Self {
        let mut take = |key: &str| fields.remove(key).unwrap_or_default();

        let mut callsign = take(CALLSIGN_KEY);
        let legacy = take("callsign");
        if callsign.is_empty() {
            callsign = legacy;
        }

        let date = take("date");
        let time = take("time");
        let band = take("band");
        let mode = take("mode");
        let report = take("report");
        let note = take("note");
        let downloads = take(DOWNLOADS_KEY).trim().parse().unwrap_or(0);

        Self {
            callsign,
            date,
            time,
            band,
            mode,
            report,
            note,
            downloads,
            extra: fields,
        }
    }
}

/// Text fields of the upload form, exactly as submitted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QslForm {
    pub indicatif: String,
    pub date: String,
    pub time: String,
    pub band: String,
    pub mode: String,
    pub report: String,
    pub note: String,
}

impl QslForm {
    /// Normalizes the form into a fresh record with a zero download counter.
    pub fn into_record(self) -> QslRecord {
        QslRecord {
            callsign: self.indicatif.trim().to_uppercase(),
            date: self.date.trim().to_string(),
            time: self.time.trim().to_string(),
            band: self.band.trim().to_string(),
            mode: self.mode.trim().to_string(),
            report: self.report.trim().to_string(),
            note: self.note.trim().to_string(),
            downloads: 0,
            extra: BTreeMap::new(),
        }
    }
}

/// An object as reported by a `CardStore`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAsset {
    pub public_id: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub context: ContextPayload,
}

/// The public view of one generated QSL card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub public_id: String,
    pub url: String,
    pub thumb: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub record: QslRecord,
}

/// Output of a `CardComposer`.
#[derive(Debug, Clone)]
pub struct ComposedCard {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub content_type: &'static str,
}

/// Outcome of the best-effort download counter write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterUpdate {
    /// The new counter value was written back to the store.
    Recorded(u64),
    /// The write failed; the download itself was unaffected.
    Failed(String),
}

/// A card's image bytes ready to be sent as an attachment.
#[derive(Debug, Clone)]
pub struct Download {
    pub public_id: String,
    /// Where the bytes were fetched from; lets the HTTP layer guess a MIME type.
    pub url: String,
    pub bytes: Vec<u8>,
    pub filename: String,
    pub counter: CounterUpdate,
}
