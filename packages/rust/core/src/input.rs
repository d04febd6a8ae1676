//! Input files and line selection.

use std::path::{Path, PathBuf};

use tracing::debug;

use versebatch_shared::{Result, VersebatchError};

/// Read `path` as lines, optionally keeping only the selected ones.
///
/// `selection` is a comma-separated list of 1-based line numbers and
/// inclusive ranges, e.g. `"1,3-4,6"`. Lines are returned in selection order.
pub fn read_lines(path: &Path, selection: Option<&str>) -> Result<Vec<String>> {
    let source = std::fs::read_to_string(path).map_err(|e| VersebatchError::io(path, e))?;
    let lines: Vec<String> = source.lines().map(str::to_string).collect();

    let Some(selection) = selection else {
        return Ok(lines);
    };

    let picked = parse_selection(selection, lines.len())?
        .into_iter()
        .map(|n| lines[n].clone())
        .collect::<Vec<_>>();
    debug!(selection, total = lines.len(), picked = picked.len(), "lines selected");
    Ok(picked)
}

/// Resolve a line selection against a file of `total` lines into 0-based
/// indices.
pub fn parse_selection(selection: &str, total: usize) -> Result<Vec<usize>> {
    let mut indices = Vec::new();

    for part in selection.split(',') {
        let part = part.trim();
        match part.split_once('-') {
            Some((start, end)) => {
                let start = parse_line_number(start, part)?;
                let end = parse_line_number(end, part)?;
                if start < 1 || end > total || start > end {
                    return Err(VersebatchError::config(format!("invalid line range: {part}")));
                }
                indices.extend(start - 1..end);
            }
            None => {
                let n = parse_line_number(part, part)?;
                if n < 1 || n > total {
                    return Err(VersebatchError::config(format!("invalid line number: {part}")));
                }
                indices.push(n - 1);
            }
        }
    }

    Ok(indices)
}

fn parse_line_number(text: &str, part: &str) -> Result<usize> {
    text.trim()
        .parse()
        .map_err(|_| VersebatchError::config(format!("invalid line selection: {part}")))
}

/// `*.txt` files in `dir`, sorted by name.
pub fn text_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| VersebatchError::io(dir, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| VersebatchError::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "txt") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Item id for a file: its name without the `.txt` extension.
pub fn file_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vb-input-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn selects_numbers_and_ranges() {
        assert_eq!(parse_selection("1,3-4,6", 6).unwrap(), vec![0, 2, 3, 5]);
        assert_eq!(parse_selection("2-2", 3).unwrap(), vec![1]);
        assert_eq!(parse_selection(" 3 , 1 ", 3).unwrap(), vec![2, 0]);
    }

    #[test]
    fn rejects_bad_selections() {
        for bad in ["0", "7", "4-2", "1-9", "a", "1-b", ""] {
            let err = parse_selection(bad, 6).unwrap_err();
            assert!(err.is_fatal(), "{bad} should be a config error");
        }
    }

    #[test]
    fn reads_selected_lines() {
        let dir = temp_dir();
        let path = dir.join("input.txt");
        std::fs::write(&path, "one\ntwo\nthree\nfour\n").unwrap();

        assert_eq!(read_lines(&path, None).unwrap().len(), 4);
        assert_eq!(
            read_lines(&path, Some("2-3")).unwrap(),
            vec!["two".to_string(), "three".to_string()]
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn lists_text_files_sorted() {
        let dir = temp_dir();
        std::fs::write(dir.join("b.txt"), "").unwrap();
        std::fs::write(dir.join("a.txt"), "").unwrap();
        std::fs::write(dir.join("notes.md"), "").unwrap();

        let files = text_files(&dir).unwrap();
        let ids: Vec<String> = files.iter().map(|p| file_id(p)).collect();
        assert_eq!(ids, vec!["a", "b"]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_lines(Path::new("/definitely/not/here.txt"), None).unwrap_err();
        assert!(matches!(err, VersebatchError::Io { .. }));
    }
}
