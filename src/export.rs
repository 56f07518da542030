use anyhow::Result;
use chrono::{Local, TimeZone};
use rust_xlsxwriter::Workbook;

use crate::onebot::MemberRecord;

/// Rendered in place of absent or nonsensical timestamps, matching what the
/// downstream spreadsheet consumers already expect.
pub const EPOCH_PLACEHOLDER: &str = "0000-00-00 00:00:00";

/// xlsx caps sheet names at 31 characters; we stay one under like the
/// exports this replaces.
const SHEET_NAME_MAX: usize = 30;

/// Unix seconds to a local human-readable string. Non-positive values render
/// as the fixed placeholder instead of erroring.
pub fn format_timestamp(ts: i64) -> String {
    if ts <= 0 {
        return EPOCH_PLACEHOLDER.to_string();
    }
    match Local.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => EPOCH_PLACEHOLDER.to_string(),
    }
}

/// Strips control characters the spreadsheet format cannot hold.
pub fn clean_cell_text(text: &str) -> String {
    text.chars().filter(|c| *c as u32 >= 0x20).collect()
}

pub fn truncate_sheet_name(name: &str) -> String {
    name.chars().take(SHEET_NAME_MAX).collect()
}

/// One spreadsheet row, text sanitized and timestamps already formatted.
#[derive(Debug, Clone)]
pub struct ExportRow {
    pub group_id: i64,
    pub user_id: i64,
    pub nickname: String,
    pub card: String,
    pub title: String,
    pub join_time: String,
    pub last_sent_time: String,
    pub title_expire_time: String,
    pub shut_up_timestamp: String,
}

pub fn process_member(m: &MemberRecord) -> ExportRow {
    ExportRow {
        group_id: m.group_id,
        user_id: m.user_id,
        nickname: clean_cell_text(&m.nickname),
        card: clean_cell_text(&m.card),
        title: clean_cell_text(&m.title),
        join_time: format_timestamp(m.join_time),
        last_sent_time: format_timestamp(m.last_sent_time),
        title_expire_time: format_timestamp(m.title_expire_time),
        shut_up_timestamp: format_timestamp(m.shut_up_timestamp),
    }
}

pub fn process_members(members: &[MemberRecord]) -> Vec<ExportRow> {
    members.iter().map(process_member).collect()
}

/// One sheet of a workbook. `group_name` adds an extra column on multi-group
/// exports so rows stay attributable after sheets are merged downstream.
pub struct GroupSheet {
    pub sheet_name: String,
    pub group_name: Option<String>,
    pub rows: Vec<ExportRow>,
}

const HEADERS: [&str; 9] = [
    "group_id",
    "user_id",
    "nickname",
    "card",
    "title",
    "join_time",
    "last_sent_time",
    "title_expire_time",
    "shut_up_timestamp",
];

/// Serializes the sheets into xlsx bytes, one worksheet per group.
pub fn build_workbook(sheets: &[GroupSheet]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();

    for sheet in sheets {
        let ws = workbook.add_worksheet();
        ws.set_name(truncate_sheet_name(&sheet.sheet_name))?;

        for (col, header) in HEADERS.iter().enumerate() {
            ws.write_string(0, col as u16, *header)?;
        }
        if sheet.group_name.is_some() {
            ws.write_string(0, HEADERS.len() as u16, "group_name")?;
        }

        for (i, row) in sheet.rows.iter().enumerate() {
            let r = (i + 1) as u32;
            ws.write_number(r, 0, row.group_id as f64)?;
            ws.write_number(r, 1, row.user_id as f64)?;
            ws.write_string(r, 2, &row.nickname)?;
            ws.write_string(r, 3, &row.card)?;
            ws.write_string(r, 4, &row.title)?;
            ws.write_string(r, 5, &row.join_time)?;
            ws.write_string(r, 6, &row.last_sent_time)?;
            ws.write_string(r, 7, &row.title_expire_time)?;
            ws.write_string(r, 8, &row.shut_up_timestamp)?;
            if let Some(group_name) = &sheet.group_name {
                ws.write_string(r, 9, clean_cell_text(group_name))?;
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}
