//! Image folder layout for a scenario.
//!
//! Every scenario owns `{imgdir}/{scenario}` with fixed subfolders:
//! - `base/` recorded baselines, kept across runs
//! - `test/` captures compared against a baseline in this run
//! - `diff/` diff images for captures that differ from their baseline
//! - `fail/` snapshot taken when the scenario fails
//! - `finish/` snapshot taken when the scenario ends, if enabled

use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const BASE_DIR: &str = "base";
const TEST_DIR: &str = "test";
const DIFF_DIR: &str = "diff";
const FAIL_DIR: &str = "fail";
const FINISH_DIR: &str = "finish";

const METADATA_FILE: &str = ".scenario.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioFolder {
    pub name: String,
    pub dir: PathBuf,
}

#[derive(Serialize)]
struct FolderMetadata<'a> {
    scenario: &'a str,
    url: &'a str,
    updated: String,
    rebase: bool,
}

impl ScenarioFolder {
    pub fn new(imgdir: impl AsRef<Path>, scenario: &str) -> Self {
        Self {
            name: scenario.to_string(),
            dir: imgdir.as_ref().join(sanitize_name(scenario)),
        }
    }

    pub fn base_dir(&self) -> PathBuf {
        self.dir.join(BASE_DIR)
    }

    pub fn test_dir(&self) -> PathBuf {
        self.dir.join(TEST_DIR)
    }

    pub fn diff_dir(&self) -> PathBuf {
        self.dir.join(DIFF_DIR)
    }

    pub fn fail_dir(&self) -> PathBuf {
        self.dir.join(FAIL_DIR)
    }

    pub fn finish_dir(&self) -> PathBuf {
        self.dir.join(FINISH_DIR)
    }

    pub fn base_path(&self, file: &str) -> PathBuf {
        self.base_dir().join(png(file))
    }

    pub fn test_path(&self, file: &str) -> PathBuf {
        self.test_dir().join(png(file))
    }

    pub fn diff_path(&self, file: &str) -> PathBuf {
        self.diff_dir().join(png(file))
    }

    pub fn fail_path(&self, file: &str) -> PathBuf {
        self.fail_dir().join(png(file))
    }

    pub fn finish_path(&self, file: &str) -> PathBuf {
        self.finish_dir().join(png(file))
    }

    /// Reset the folder for a new run.
    ///
    /// `rebase` wipes everything, baselines included. Otherwise only the
    /// artifacts of the previous run (`test/`, `diff/`, `fail/`, `finish/`)
    /// are removed. Subfolders are created when a file is first written to them.
    pub fn prepare(&self, rebase: bool, url: &str) -> io::Result<()> {
        if rebase {
            remove_dir_if_exists(&self.dir)?;
        } else {
            for dir in [self.test_dir(), self.diff_dir(), self.fail_dir(), self.finish_dir()] {
                remove_dir_if_exists(&dir)?;
            }
        }
        fs::create_dir_all(&self.dir)?;

        let metadata = FolderMetadata {
            scenario: &self.name,
            url,
            updated: chrono::Utc::now().to_rfc3339(),
            rebase,
        };
        fs::write(
            self.dir.join(METADATA_FILE),
            serde_json::to_string_pretty(&metadata)?,
        )?;
        Ok(())
    }

    /// Baseline PNGs currently recorded, sorted by name
    pub fn list_baselines(&self) -> io::Result<Vec<PathBuf>> {
        let dir = self.base_dir();
        let mut captures = Vec::new();
        if dir.exists() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "png") {
                    captures.push(path);
                }
            }
        }
        captures.sort();
        Ok(captures)
    }
}

fn png(file: &str) -> String {
    format!("{file}.png")
}

fn remove_dir_if_exists(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Make a name safe to use as a single path component.
///
/// `.` and `..` become underscores so a name never points at the parent folder.
pub fn sanitize_name(name: &str) -> String {
    if matches!(name, "." | "..") {
        return "_".repeat(name.len());
    }
    name.chars()
        .map(|c| match c {
            c if c.is_whitespace() => '_',
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect()
}
