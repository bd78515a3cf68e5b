use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{Local, SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use walkdir::{DirEntry, WalkDir};

pub const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

pub fn now_utc_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Local wall-clock stamp used for log, collection and summary names.
pub fn run_timestamp() -> String {
    Local::now().format(RUN_TIMESTAMP_FORMAT).to_string()
}

pub fn ensure_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let data = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize json: {}", path.display()))?;

    let mut file = File::create(path)
        .with_context(|| format!("failed to create json file: {}", path.display()))?;
    file.write_all(&data)
        .with_context(|| format!("failed to write json file: {}", path.display()))?;
    file.write_all(b"\n")
        .with_context(|| format!("failed to finalize json file: {}", path.display()))?;

    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// Recursively copies `src` into `dest`, creating `dest` and any parents.
pub fn copy_dir_all(src: &Path, dest: &Path) -> Result<()> {
    ensure_directory(dest)?;

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", src.display()))?;
        let path = entry.path();
        let relative = path
            .strip_prefix(src)
            .with_context(|| format!("{} is outside {}", path.display(), src.display()))?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            ensure_directory(&target)?;
        } else {
            fs::copy(path, &target).with_context(|| {
                format!("failed to copy {} to {}", path.display(), target.display())
            })?;
        }
    }

    Ok(())
}

pub fn remove_dir_if_exists(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_dir_all(path).with_context(|| format!("failed to remove {}", path.display()))?;
    Ok(true)
}

/// Every regular file below `root`, sorted by path. A missing root is empty.
pub fn walk_files(root: &Path) -> Result<Vec<PathBuf>> {
    walk(root, |entry| entry.file_type().is_file())
}

/// Every directory below `root` (excluding `root`), sorted by path.
pub fn walk_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    walk(root, |entry| entry.file_type().is_dir())
}

fn walk(root: &Path, keep: impl Fn(&DirEntry) -> bool) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if keep(&entry) {
            paths.push(entry.into_path());
        }
    }
    paths.sort();
    Ok(paths)
}

pub fn modified_time(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Picks the most recently modified path; ties go to the lexicographically last name.
pub fn newest_path(paths: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    paths
        .into_iter()
        .map(|path| (modified_time(&path), path))
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, path)| path)
}

pub fn path_segments(path: &Path) -> Vec<String> {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect()
}

pub fn shell_join(parts: &[String]) -> String {
    parts
        .iter()
        .map(|part| shell_quote(part))
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value.chars().all(|character| {
            character.is_ascii_alphanumeric() || "-_./:=@%+,#".contains(character)
        });
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\"'\"'"))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{copy_dir_all, newest_path, shell_join, walk_dirs, walk_files};

    #[test]
    fn shell_join_quotes_only_unsafe_parts() {
        let parts = vec![
            "RDBMS=tidb".to_string(),
            "./ci/build.sh".to_string(),
            "-Pdb.dialect=org.hibernate.dialect.MySQLDialect".to_string(),
            "it's here".to_string(),
        ];
        assert_eq!(
            shell_join(&parts),
            "RDBMS=tidb ./ci/build.sh -Pdb.dialect=org.hibernate.dialect.MySQLDialect 'it'\"'\"'s here'"
        );
    }

    #[test]
    fn copy_dir_all_preserves_nested_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("a/b")).expect("mkdir");
        fs::write(src.join("a/b/file.xml"), "<x/>").expect("write");
        fs::write(src.join("top.txt"), "top").expect("write");

        let dest = dir.path().join("dest");
        copy_dir_all(&src, &dest).expect("copy");

        let copied = walk_files(&dest).expect("walk");
        assert_eq!(copied, vec![dest.join("a/b/file.xml"), dest.join("top.txt")]);
    }

    #[test]
    fn walks_report_sorted_entries_and_tolerate_a_missing_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        fs::create_dir_all(root.join("b/target")).expect("mkdir");
        fs::create_dir_all(root.join("a")).expect("mkdir");
        fs::write(root.join("b/target/TEST-x.xml"), "<x/>").expect("write");
        fs::write(root.join("a/one.txt"), "1").expect("write");

        assert_eq!(
            walk_files(root).expect("files"),
            vec![root.join("a/one.txt"), root.join("b/target/TEST-x.xml")]
        );
        assert_eq!(
            walk_dirs(root).expect("dirs"),
            vec![root.join("a"), root.join("b"), root.join("b/target")]
        );
        assert!(walk_files(&root.join("absent")).expect("missing").is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn copy_dir_all_fails_on_a_dangling_link() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("src");
        fs::create_dir_all(&src).expect("mkdir");
        std::os::unix::fs::symlink(dir.path().join("gone"), src.join("link.xml"))
            .expect("symlink");

        let err = copy_dir_all(&src, &dir.path().join("dest")).expect_err("must fail");
        assert!(format!("{err:#}").contains("link.xml"));
    }

    #[test]
    fn newest_path_breaks_ties_by_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = dir.path().join("a.json");
        let second = dir.path().join("b.json");
        fs::write(&first, "{}").expect("write");
        fs::write(&second, "{}").expect("write");
        let same = fs::metadata(&first).and_then(|meta| meta.modified()).expect("mtime");
        fs::File::options()
            .write(true)
            .open(&second)
            .and_then(|file| file.set_modified(same))
            .expect("set mtime");

        assert_eq!(newest_path(vec![first, second.clone()]), Some(second));
    }
}
