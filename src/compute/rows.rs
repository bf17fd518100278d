//! Data row counting for input files.

use crate::error::{EngineError, Result};
use std::path::Path;
use tracing::debug;

/// Count the data records of a CSV file, excluding the header.
///
/// Records are counted the way the aggregator reads them: blank lines are
/// skipped and a quoted field may span lines. Field counts are not checked
/// here; a short or long row is reported when its chunk is aggregated.
pub fn count_rows(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Err(EngineError::SourceNotFound(path.to_path_buf()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .buffer_capacity(256 * 1024)
        .from_path(path)?;
    let mut record = csv::ByteRecord::new();
    let mut rows: u64 = 0;

    while reader.read_byte_record(&mut record)? {
        rows += 1;
    }

    debug!("Counted {} data rows in {}", rows, path.display());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_counts_rows_excluding_header() {
        let file = write_file("a,b\n1,2\n3,4\n5,6\n");
        assert_eq!(count_rows(file.path()).unwrap(), 3);
    }

    #[test]
    fn test_counts_last_line_without_newline() {
        let file = write_file("a,b\n1,2\n3,4");
        assert_eq!(count_rows(file.path()).unwrap(), 2);
    }

    #[test]
    fn test_ignores_blank_lines() {
        let file = write_file("a,b\r\n1,2\r\n\r\n3,4\n\n");
        assert_eq!(count_rows(file.path()).unwrap(), 2);
    }

    #[test]
    fn test_quoted_newlines_stay_in_one_record() {
        let file = write_file("a,b\n1,\"first\nsecond\"\n3,4\n");
        assert_eq!(count_rows(file.path()).unwrap(), 2);
    }

    #[test]
    fn test_ragged_rows_are_still_counted() {
        let file = write_file("a,b,c\n1,2,3\n4,5\n6,7,8\n");
        assert_eq!(count_rows(file.path()).unwrap(), 3);
    }

    #[test]
    fn test_empty_and_header_only_files() {
        assert_eq!(count_rows(write_file("").path()).unwrap(), 0);
        assert_eq!(count_rows(write_file("a,b\n").path()).unwrap(), 0);
    }

    #[test]
    fn test_missing_file() {
        let err = count_rows(Path::new("/nonexistent/events.csv")).unwrap_err();
        assert!(matches!(err, EngineError::SourceNotFound(_)));
    }
}
