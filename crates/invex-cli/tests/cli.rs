use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const TABLE_TEXT: &str = "Invoice No: INV-100\n\
Description  Qty  Unit Price  Total\n\
Widget A     2    10.00       20.00\n\
Gadget B     1    5.50        5.50\n";

const ACME_TEMPLATE: &str = r#"{
  "id": "acme_v1",
  "name": "ACME Trading LLC",
  "company_key": "acme",
  "detection_patterns": ["ACME Trading LLC", "(?i)tax invoice"],
  "field_patterns": {"invoice_number": "Invoice #\\s*(\\S+)"}
}"#;

/// A command isolated from the user's config directory and API key.
fn invex(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("invex").unwrap();
    cmd.env("XDG_CONFIG_HOME", home.path())
        .env("HOME", home.path())
        .env_remove("OPENAI_API_KEY");
    cmd
}

fn write(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path.display().to_string()
}

#[test]
fn test_parse_table_json() {
    let home = TempDir::new().unwrap();
    let input = write(home.path(), "invoice.txt", TABLE_TEXT);

    invex(&home)
        .args(["parse", &input])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"parser_name\": \"table_aware\""))
        .stdout(predicate::str::contains("\"LINE_ITEM\""))
        .stdout(predicate::str::contains("INV-100"));
}

#[test]
fn test_parse_text_format_to_file() {
    let home = TempDir::new().unwrap();
    let input = write(home.path(), "invoice.txt", TABLE_TEXT);
    let output = home.path().join("out.txt");

    invex(&home)
        .args(["parse", &input, "--format", "text", "-o"])
        .arg(&output)
        .assert()
        .success();

    let written = fs::read_to_string(&output).unwrap();
    assert!(written.contains("Parser: table_aware"));
    assert!(written.contains("Items (2):"));
    assert!(written.contains("Widget A"));
}

#[test]
fn test_parse_unrecognized_text_fails() {
    let home = TempDir::new().unwrap();
    let input = write(home.path(), "note.txt", "lorem ipsum\n");

    invex(&home)
        .args(["parse", &input])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no parser could handle this content"));
}

#[test]
fn test_parse_single_strategy() {
    let home = TempDir::new().unwrap();
    let input = write(home.path(), "invoice.txt", TABLE_TEXT);

    invex(&home)
        .args(["parse", &input, "--parser", "vision"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no image provided"));
}

#[test]
fn test_parse_missing_input() {
    let home = TempDir::new().unwrap();

    invex(&home)
        .args(["parse", "does-not-exist.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Input file not found"));
}

#[test]
fn test_templates_list_and_detect() {
    let home = TempDir::new().unwrap();
    let templates = home.path().join("templates");
    fs::create_dir(&templates).unwrap();
    write(&templates, "acme.json", ACME_TEMPLATE);
    let input = write(
        home.path(),
        "acme.txt",
        "ACME Trading LLC\nTAX INVOICE\nInvoice # A-7\n",
    );

    invex(&home)
        .args(["templates", "list", "--templates"])
        .arg(&templates)
        .assert()
        .success()
        .stdout(predicate::str::contains("acme_v1"));

    invex(&home)
        .args(["templates", "detect", &input, "--templates"])
        .arg(&templates)
        .assert()
        .success()
        .stdout(predicate::str::contains("Matched acme_v1"));
}

#[test]
fn test_templates_require_directory() {
    let home = TempDir::new().unwrap();

    invex(&home)
        .args(["templates", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No template directory configured"));
}

#[test]
fn test_config_init_and_show() {
    let home = TempDir::new().unwrap();
    let path = home.path().join("invex.json");

    invex(&home)
        .args(["config", "init", "-o"])
        .arg(&path)
        .assert()
        .success();
    assert!(path.exists());

    invex(&home)
        .args(["config", "init", "-o"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    invex(&home)
        .arg("-c")
        .arg(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"confidence_threshold\": 0.75"));
}
