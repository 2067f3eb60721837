//! Input file lists: one path per line, blank lines and `#` comments skipped.

use std::path::{Path, PathBuf};

use sb_core::{Error, Result};

/// Parse the contents of a file list.
pub fn parse_file_list(text: &str) -> Vec<PathBuf> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(PathBuf::from)
        .collect()
}

/// Read the file list at `path`. An unreadable or empty list is an error.
pub fn read_file_list(path: &Path) -> Result<Vec<PathBuf>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Input(format!("cannot read file list {}: {e}", path.display())))?;
    let files = parse_file_list(&text);
    if files.is_empty() {
        return Err(Error::Input(format!("file list {} contains no input files", path.display())));
    }
    tracing::info!(list = %path.display(), n_files = files.len(), "input file list loaded");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_blank_and_comment_lines() {
        let text = "# sample\n/data/a.parquet\n\n   \n  /data/b.parquet  \n#/data/c.parquet\n";
        assert_eq!(
            parse_file_list(text),
            vec![PathBuf::from("/data/a.parquet"), PathBuf::from("/data/b.parquet")]
        );
    }

    #[test]
    fn empty_list_is_an_error() {
        let dir = std::env::temp_dir().join(format!("sb_io_list_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("empty.txt");
        std::fs::write(&path, "# nothing\n\n").unwrap();
        let err = read_file_list(&path).unwrap_err();
        assert!(err.to_string().contains("no input files"));
        assert!(read_file_list(&dir.join("missing.txt")).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
