//! CLI test cases.
//!
//! These tests never talk to a real OCR provider. Tests which need Poppler
//! or a real API key are ignored by default.

use std::{fs, path::Path, process::Command};

use assert_cmd::prelude::*;
use predicates::prelude::*;

/// Create a new `Command` with our binary, isolated from any `.env` file or
/// credentials in the environment.
fn cmd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("nama-ocr").unwrap();
    cmd.current_dir(dir)
        .env_remove("GEMINI_API_KEY")
        .env_remove("GEMINI_API_BASE")
        .env("RUST_LOG", "warn");
    cmd
}

#[test]
fn test_help() {
    let dir = tempfile::tempdir().unwrap();
    cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("GEMINI_API_KEY"));
}

#[test]
fn test_version() {
    let dir = tempfile::tempdir().unwrap();
    cmd(dir.path()).arg("--version").assert().success();
}

#[test]
fn test_subcommand_help() {
    let dir = tempfile::tempdir().unwrap();
    cmd(dir.path())
        .args(["pages", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--start-page"))
        .stdout(predicate::str::contains("--rate-limit-cooldown"))
        .stdout(predicate::str::contains("--typeface"));
    cmd(dir.path())
        .args(["document", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dpi"))
        .stdout(predicate::str::contains("--project"));
}

#[test]
fn test_pages_requires_api_key() {
    let dir = tempfile::tempdir().unwrap();
    let images = dir.path().join("images");
    fs::create_dir(&images).unwrap();
    fs::write(images.join("page_001.png"), b"").unwrap();

    cmd(dir.path())
        .args(["pages", "images", "-o", "out"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("GEMINI_API_KEY"));
    assert!(!dir.path().join("out").exists());
}

#[test]
fn test_pages_requires_input_dir() {
    let dir = tempfile::tempdir().unwrap();
    cmd(dir.path())
        .env("GEMINI_API_KEY", "test-key")
        .args(["pages", "missing", "-o", "out"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot find image directory"));
    assert!(!dir.path().join("out").exists());
}

#[test]
fn test_pages_fails_on_empty_dir() {
    let dir = tempfile::tempdir().unwrap();
    let images = dir.path().join("images");
    fs::create_dir(&images).unwrap();
    fs::write(images.join("notes.txt"), b"not a page").unwrap();

    cmd(dir.path())
        .env("GEMINI_API_KEY", "test-key")
        // Nothing should be sent, but make sure of it.
        .env("GEMINI_API_BASE", "http://127.0.0.1:9")
        .args(["pages", "images", "-o", "out"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no page images found"));
    assert!(!dir.path().join("out").exists());
}

#[test]
fn test_pages_range_outside_images_fails() {
    let dir = tempfile::tempdir().unwrap();
    let images = dir.path().join("images");
    fs::create_dir(&images).unwrap();
    fs::write(images.join("page_001.png"), b"").unwrap();
    fs::write(images.join("page_002.png"), b"").unwrap();

    cmd(dir.path())
        .env("GEMINI_API_KEY", "test-key")
        .env("GEMINI_API_BASE", "http://127.0.0.1:9")
        .args(["pages", "images", "-o", "out", "--start-page", "5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no page images found"));
    assert!(!dir.path().join("out").exists());
}

#[test]
fn test_document_requires_input_file() {
    let dir = tempfile::tempdir().unwrap();
    cmd(dir.path())
        .env("GEMINI_API_KEY", "test-key")
        .args(["document", "missing.pdf"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot find document"));
    assert!(!dir.path().join("ocr_output").exists());
}

#[test]
fn test_document_requires_api_key() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("scan.png"), b"").unwrap();
    cmd(dir.path())
        .args(["document", "scan.png"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("GEMINI_API_KEY"));
    assert!(!dir.path().join("ocr_output").exists());
}

#[test]
fn test_schema() {
    let dir = tempfile::tempdir().unwrap();
    cmd(dir.path())
        .args(["schema", "RunLog"])
        .assert()
        .success()
        .stdout(predicate::str::contains("retry_later"));
    cmd(dir.path())
        .args(["schema", "ProofreadingTemplate", "-o", "proofreading.schema.json"])
        .assert()
        .success();
    let schema = fs::read_to_string(dir.path().join("proofreading.schema.json")).unwrap();
    assert!(schema.contains("corrected_text"));
}

#[test]
#[ignore = "Requires poppler-utils"]
fn test_split() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/two_pages.pdf");
    cmd(dir.path())
        .arg("split")
        .arg(&pdf)
        .args(["-o", "pages", "--dpi", "72"])
        .assert()
        .success();
    assert!(dir.path().join("pages/page_001.png").exists());
    assert!(dir.path().join("pages/page_002.png").exists());
}

#[test]
#[ignore = "Needs GEMINI_API_KEY and poppler-utils"]
fn test_document_gemini() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/two_pages.pdf");
    let api_key = std::env::var("GEMINI_API_KEY").unwrap();
    cmd(dir.path())
        .env("GEMINI_API_KEY", api_key)
        .arg("document")
        .arg(&pdf)
        .args(["-o", "out", "--dpi", "100", "--delay", "1"])
        .assert()
        .success();
    let out = dir.path().join("out");
    assert!(out.join("two_pages_ocr.json").exists());
    assert!(out.join("two_pages_ocr.txt").exists());
    assert!(out.join("two_pages_proofreading.json").exists());
    assert!(out.join("ocr_log.json").exists());
    assert!(out.join("images/two_pages_page_001.png").exists());
    assert!(out.join("text/2.txt").exists());
}
