//! SVG markup of the metadata panel.
//!
//! Every user-supplied value goes through `escape_xml` before it is placed in
//! the document.

use std::fmt::Write;

use rq_core::models::QslRecord;
use rq_core::text::{escape_xml, wrap_text};

const FONT_FAMILY: &str = "DejaVu Sans, Liberation Sans, Arial, sans-serif";
const BACKGROUND: &str = "#10243e";
const ACCENT: &str = "#f5b301";
const INK: &str = "#f2f5f8";
const MUTED: &str = "#9fb3c8";

const MARGIN_X: u32 = 28;
const CALLSIGN_BASELINE: u32 = 72;
const FIELDS_TOP: u32 = 150;
const FIELD_STEP: u32 = 38;
const NOTE_GAP: u32 = 24;
const NOTE_STEP: u32 = 28;
const BOTTOM_MARGIN: u32 = 16;

/// A text run of the panel, positioned by its baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelLine {
    pub y: u32,
    pub size: u32,
    pub fill: &'static str,
    pub bold: bool,
    pub text: String,
}

/// Lays out the panel lines top to bottom. Lines whose baseline would fall
/// past the bottom margin are dropped.
pub fn layout(record: &QslRecord, height: u32, wrap_width: usize) -> Vec<PanelLine> {
    let mut lines = vec![
        PanelLine {
            y: CALLSIGN_BASELINE,
            size: 40,
            fill: ACCENT,
            bold: true,
            text: record.callsign.clone(),
        },
        PanelLine {
            y: CALLSIGN_BASELINE + 30,
            size: 16,
            fill: MUTED,
            bold: false,
            text: "eQSL".to_string(),
        },
    ];

    let fields = [
        ("Date", &record.date),
        ("Time", &record.time),
        ("Band", &record.band),
        ("Mode", &record.mode),
        ("Report", &record.report),
    ];
    let mut y = FIELDS_TOP;
    for (label, value) in fields.into_iter().filter(|(_, v)| !v.is_empty()) {
        lines.push(PanelLine {
            y,
            size: 24,
            fill: INK,
            bold: false,
            text: format!("{label}: {value}"),
        });
        y += FIELD_STEP;
    }

    y += NOTE_GAP;
    for text in wrap_text(&record.note, wrap_width) {
        lines.push(PanelLine {
            y,
            size: 20,
            fill: MUTED,
            bold: false,
            text,
        });
        y += NOTE_STEP;
    }

    let limit = height.saturating_sub(BOTTOM_MARGIN);
    lines.retain(|line| line.y <= limit);
    lines
}

/// Renders the full panel document.
pub fn render_svg(record: &QslRecord, width: u32, height: u32, wrap_width: usize) -> String {
    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">"#
    );
    let _ = write!(
        svg,
        r#"<rect width="{width}" height="{height}" fill="{BACKGROUND}"/><rect width="6" height="{height}" fill="{ACCENT}"/>"#
    );

    for line in layout(record, height, wrap_width) {
        let weight = if line.bold { "bold" } else { "normal" };
        let _ = write!(
            svg,
            r#"<text x="{MARGIN_X}" y="{}" font-family="{FONT_FAMILY}" font-size="{}" font-weight="{weight}" fill="{}">{}</text>"#,
            line.y,
            line.size,
            line.fill,
            escape_xml(&line.text)
        );
    }

    svg.push_str("</svg>");
    svg
}
