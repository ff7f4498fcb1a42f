//! Table formatting helpers for CLI output.

use comfy_table::{ContentArrangement, Table};

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// One-line summary of a finished copy.
pub fn copy_summary(report: &tagbag_runtime::CopyReport) -> String {
    format!(
        "{} blobs written ({}), {} reused, {} manifests",
        report.blobs_written,
        format_bytes(report.bytes_written),
        report.blobs_reused,
        report.manifests
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn test_copy_summary() {
        let report = tagbag_runtime::CopyReport {
            manifests: 1,
            blobs_written: 2,
            blobs_reused: 3,
            bytes_written: 2048,
        };
        assert_eq!(
            copy_summary(&report),
            "2 blobs written (2.0 KB), 3 reused, 1 manifests"
        );
    }

    #[test]
    fn test_new_table_renders_headers() {
        let table = new_table(&["IMAGE", "BLOBS"]);
        let rendered = table.to_string();
        assert!(rendered.contains("IMAGE"));
        assert!(rendered.contains("BLOBS"));
    }
}
