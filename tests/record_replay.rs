//! Cassette replay integration tests, with zero network I/O.
//!
//! Every test sets `IMAGEFUSE_REPLAY` so the binary never contacts a live
//! provider, and no API key is needed.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;

const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

fn cmd(cassette: &str) -> Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("imagefuse");
    cmd.env("IMAGEFUSE_REPLAY", fixtures_dir().join(cassette).to_str().unwrap())
        .env("IMAGEFUSE_CONFIG", "/nonexistent/imagefuse.toml")
        .env_remove("GEMINI_API_KEY")
        .env_remove("FAL_KEY");
    cmd
}

/// Absolute path to the `test_fixtures` directory.
fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_fixtures")
}

fn persona() -> String {
    fixtures_dir().join("persona.png").to_string_lossy().into_owned()
}

/// Fresh empty scratch directory.
fn work_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(name);
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn edit_happy_path_creates_png() {
    let dir = work_dir("imagefuse_test_edit_happy");
    let out = dir.join("hat.png");

    cmd("gemini_edit.cassette.yaml")
        .args(["edit", &persona(), "add a hat", "--output", out.to_str().unwrap()])
        .assert()
        .success()
        .stderr(predicate::str::contains("Saved:"));

    let data = std::fs::read(&out).unwrap();
    assert_eq!(&data[..8], &PNG_MAGIC, "output should be the provider's PNG bytes");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn edit_variants_get_numbered_files() {
    let dir = work_dir("imagefuse_test_edit_variants");
    let out = dir.join("hat.png");

    cmd("gemini_edit.cassette.yaml")
        .args(["edit", &persona(), "add a hat", "-n", "2", "-o", out.to_str().unwrap()])
        .assert()
        .success();

    assert_eq!(file_names(&dir), vec!["hat-1.png", "hat-2.png"]);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn auto_filename_uses_kebab_case_with_timestamp() {
    let dir = work_dir("imagefuse_test_autofile");

    cmd("gemini_edit.cassette.yaml")
        .args(["edit", &persona(), "Add a Hat!"])
        .current_dir(&dir)
        .assert()
        .success();

    let names = file_names(&dir);
    assert_eq!(names.len(), 1, "exactly one file should be created");
    assert!(names[0].starts_with("add-a-hat-"), "got: {}", names[0]);
    assert!(names[0].ends_with(".png"), "got: {}", names[0]);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn comic_writes_four_panels() {
    let dir = work_dir("imagefuse_test_comic");
    let out = dir.join("strip.png");

    cmd("gemini_comic.cassette.yaml")
        .args([
            "comic",
            &persona(),
            "--style",
            "noir",
            "--panel",
            "wakes up",
            "--panel",
            "drinks coffee",
            "--panel",
            "writes code",
            "--panel",
            "ships it",
            "-o",
            out.to_str().unwrap(),
        ])
        .assert()
        .success();

    assert_eq!(file_names(&dir), vec!["strip-1.png", "strip-2.png", "strip-3.png", "strip-4.png"]);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn recorded_fal_failure_is_reported() {
    let dir = work_dir("imagefuse_test_fal_failed");

    cmd("fal_failed.cassette.yaml")
        .args(["edit", &persona(), "add a hat", "--provider", "fal"])
        .current_dir(&dir)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed with status 'failed'"));

    assert!(file_names(&dir).is_empty());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn exhausted_cassette_is_an_error() {
    let dir = work_dir("imagefuse_test_exhausted");

    cmd("gemini_edit.cassette.yaml")
        .args(["edit", &persona(), "add a hat", "-n", "3"])
        .current_dir(&dir)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cassette exhausted"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn fal_blend_notes_degraded_output() {
    let dir = work_dir("imagefuse_test_fal_blend");
    let cassette = dir.join("fal_blend.cassette.yaml");
    let png = std::fs::read(fixtures_dir().join("persona.png")).unwrap();
    let b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &png);
    std::fs::write(
        &cassette,
        format!(
            "name: fal-blend\nrecorded_at: \"2026-03-02T11:00:00Z\"\ncommit: test\ninteractions:\n  \
             - seq: 0\n    provider: fal\n    method: edit\n    output:\n      Ok:\n        \
             bytes: {b64}\n        mime: image/png\n"
        ),
    )
    .unwrap();
    let out = dir.join("fused.png");

    let mut command = assert_cmd::cargo::cargo_bin_cmd!("imagefuse");
    command
        .env("IMAGEFUSE_REPLAY", cassette.to_str().unwrap())
        .env("IMAGEFUSE_CONFIG", "/nonexistent/imagefuse.toml")
        .args([
            "blend",
            &persona(),
            &persona(),
            "marble texture",
            "--provider",
            "fal",
            "-o",
            out.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("edits the first image only"));

    assert!(out.exists());
    let _ = std::fs::remove_dir_all(&dir);
}
