use anyhow::Context;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::model::GradeSheet;

pub const ARCHIVE_FORMAT_V1: &str = "gradebook-course-archive-v1";

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Flat CSV of one sheet. Column order is the stored activity order, row
/// order the stored roster order; ungraded cells are empty, `Total` is the
/// cached per-record mean.
pub fn sheet_csv(sheet: &GradeSheet) -> String {
    let mut out = String::new();

    let mut header: Vec<String> = Vec::with_capacity(sheet.activities.len() + 4);
    header.push("Student ID".to_string());
    header.push("Student Name".to_string());
    for activity in &sheet.activities {
        header.push(csv_quote(&activity.name));
    }
    header.push("Total".to_string());
    header.push("Status".to_string());
    out.push_str(&header.join(","));
    out.push('\n');

    for record in &sheet.students {
        let mut row: Vec<String> = Vec::with_capacity(sheet.activities.len() + 4);
        row.push(csv_quote(&record.student_id));
        row.push(csv_quote(&record.name));
        for activity in &sheet.activities {
            match record.grades.get(&activity.id) {
                Some(entry) => row.push(entry.value.to_string()),
                None => row.push(String::new()),
            }
        }
        row.push(record.total.to_string());
        row.push(record.status.as_str().to_string());
        out.push_str(&row.join(","));
        out.push('\n');
    }

    out
}

#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    pub entry_count: usize,
    pub sheet_count: usize,
}

fn sanitize_entry_name(title: &str) -> String {
    let cleaned: String = title
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "sheet".to_string()
    } else {
        cleaned
    }
}

/// One zip per course: `manifest.json`, one `sheets/<title>.csv` per sheet,
/// and a `checksums.txt` with the SHA-256 of each CSV entry so an importer
/// can verify the payload before trusting it.
pub fn export_course_archive(
    course_id: &str,
    sheets: &[GradeSheet],
    out_path: &Path,
) -> anyhow::Result<ArchiveSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    // Duplicate sheet titles get numeric suffixes so no entry is clobbered.
    let mut used: HashSet<String> = HashSet::new();
    let mut entries: Vec<(String, &GradeSheet)> = Vec::with_capacity(sheets.len());
    for sheet in sheets {
        let base = sanitize_entry_name(&sheet.title);
        let mut name = base.clone();
        let mut n = 2;
        while !used.insert(name.clone()) {
            name = format!("{}-{}", base, n);
            n += 1;
        }
        entries.push((format!("sheets/{}.csv", name), sheet));
    }

    let exported_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let manifest = json!({
        "format": ARCHIVE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": exported_at,
        "courseId": course_id,
        "sheets": entries.iter().map(|(entry, sheet)| json!({
            "sheetId": sheet.id,
            "title": sheet.title,
            "gradingPeriod": sheet.grading_period,
            "weightPercentage": sheet.weight_percentage,
            "isPublished": sheet.is_published,
            "file": entry,
        })).collect::<Vec<_>>(),
    });
    zip.start_file("manifest.json", opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    let mut checksums = String::new();
    for (entry, sheet) in &entries {
        let csv = sheet_csv(sheet);
        zip.start_file(entry.as_str(), opts)
            .with_context(|| format!("failed to start entry {}", entry))?;
        zip.write_all(csv.as_bytes())
            .with_context(|| format!("failed to write entry {}", entry))?;
        checksums.push_str(&format!("{:x}  {}\n", Sha256::digest(csv.as_bytes()), entry));
    }

    zip.start_file("checksums.txt", opts)
        .context("failed to start checksums entry")?;
    zip.write_all(checksums.as_bytes())
        .context("failed to write checksums entry")?;

    zip.finish().context("failed to finalize archive")?;

    Ok(ArchiveSummary {
        entry_count: entries.len() + 2,
        sheet_count: entries.len(),
    })
}
