//! Small helpers shared by targets and the test runner

use rand::Rng;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const PREFIX_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// `<result_dir>/<parts...>`, created if missing
pub fn result_dir_subdirectory(result_dir: &Path, parts: &[&str]) -> std::io::Result<PathBuf> {
    let mut dir = result_dir.to_path_buf();
    for part in parts {
        dir.push(part);
    }
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Write `lines` to `path`, one per line, creating parent directories
pub fn save_text_file(path: &Path, lines: &[String]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut content = lines.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    fs::write(path, content)?;
    debug!("saved {} lines to {}", lines.len(), path.display());
    Ok(())
}

/// Random string of uppercase letters and digits
pub fn random_prefix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(PREFIX_ALPHABET[rng.gen_range(0..PREFIX_ALPHABET.len())]))
        .collect()
}

/// `base` overlaid with `overrides`; override values win
pub fn merge_environment(
    base: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = base.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Quote `value` for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | ','))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_subdirectory_created() {
        let dir = tempfile::tempdir().unwrap();
        let sub = result_dir_subdirectory(dir.path(), &["ScreenshotTests", "test_red"]).unwrap();
        assert!(sub.is_dir());
        assert!(sub.ends_with("ScreenshotTests/test_red"));
    }

    #[test]
    fn test_save_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/out.txt");
        save_text_file(&path, &["one".to_string(), "two".to_string()]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");

        save_text_file(&path, &[]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_random_prefix() {
        let prefix = random_prefix(10);
        assert_eq!(prefix.len(), 10);
        assert!(prefix.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_merge_environment() {
        let base = BTreeMap::from([
            ("DISPLAY".to_string(), ":0".to_string()),
            ("LANG".to_string(), "C".to_string()),
        ]);
        let overrides = BTreeMap::from([("LANG".to_string(), "en_US.UTF-8".to_string())]);
        let merged = merge_environment(&base, &overrides);
        assert_eq!(merged["DISPLAY"], ":0");
        assert_eq!(merged["LANG"], "en_US.UTF-8");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/opt/ramses/bin"), "/opt/ramses/bin");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
