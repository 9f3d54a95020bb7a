//! Integration tests for the `folio` binary.
//!
//! Every test gets its own HOME so no user config file leaks in.

use assert_cmd::Command;
use folio_markdown::fixture::{DocxBuilder, PNG_BYTES, write_corrupt_docx};
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    fn new() -> Self {
        let root = std::env::temp_dir().join(format!("folio-cli-test-{}", uuid::Uuid::now_v7()));
        fs::create_dir_all(root.join("home")).unwrap();
        fs::create_dir_all(root.join("docs")).unwrap();
        Self { root }
    }

    fn docs(&self) -> PathBuf {
        self.root.join("docs")
    }

    fn cli(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_folio"));
        cmd.env("HOME", self.root.join("home"))
            .env_remove("FOLIO_CONFIG")
            .env_remove("RUST_LOG");
        cmd
    }

    fn write_doc(&self, name: &str, title: &str) -> PathBuf {
        let path = self.docs().join(name);
        DocxBuilder::new()
            .heading(1, title)
            .paragraph("Body text.")
            .write(&path)
            .unwrap();
        path
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn converted_line(source: &Path) -> String {
    format!("Converted `{}` to Markdown.\n", source.display())
}

#[test]
fn empty_folder_exits_zero_with_notice() {
    let sb = Sandbox::new();
    fs::write(sb.docs().join("notes.txt"), "x").unwrap();

    sb.cli()
        .args(["convert", "--engine", "builtin", "--input"])
        .arg(sb.docs())
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("No .docx files found"));
}

#[test]
fn missing_input_folder_exits_two() {
    let sb = Sandbox::new();

    sb.cli()
        .args(["convert", "--input"])
        .arg(sb.root.join("nope"))
        .assert()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("config error"));
}

#[test]
fn missing_converter_exits_three_and_writes_nothing() {
    let sb = Sandbox::new();
    sb.write_doc("a.docx", "A");

    sb.cli()
        .args(["convert", "--converter", "folio-test-no-such-converter", "--input"])
        .arg(sb.docs())
        .assert()
        .code(3)
        .stderr(predicate::str::contains("dependency missing"));

    assert!(!sb.docs().join("a.md").exists());
}

#[test]
fn missing_converter_exits_three_even_without_sources() {
    let sb = Sandbox::new();

    sb.cli()
        .args(["convert", "--converter", "folio-test-no-such-converter", "--input"])
        .arg(sb.docs())
        .assert()
        .code(3);
}

#[test]
fn builtin_engine_converts_and_reports_on_stdout() {
    let sb = Sandbox::new();
    let source = sb.write_doc("report.v2.docx", "Report");

    sb.cli()
        .args(["convert", "--engine", "builtin", "--input"])
        .arg(sb.docs())
        .assert()
        .success()
        .stdout(converted_line(&source));

    let md = fs::read_to_string(sb.docs().join("report.v2.md")).unwrap();
    assert_eq!(md, "# Report\n\nBody text.\n");
}

#[test]
fn corrupt_file_fails_but_others_convert() {
    let sb = Sandbox::new();
    sb.write_doc("good.docx", "Good");
    let bad = sb.docs().join("bad.docx");
    write_corrupt_docx(&bad).unwrap();

    sb.cli()
        .args(["convert", "--engine", "builtin", "--input"])
        .arg(sb.docs())
        .assert()
        .code(1)
        .stderr(predicate::str::contains(format!("Failed to convert `{}`", bad.display())));

    assert!(sb.docs().join("good.md").is_file());
    assert!(!sb.docs().join("bad.md").exists());
}

#[test]
fn abort_policy_exits_one_and_notes_remaining() {
    let sb = Sandbox::new();
    write_corrupt_docx(&sb.docs().join("a.docx")).unwrap();
    write_corrupt_docx(&sb.docs().join("b.docx")).unwrap();

    sb.cli()
        .args(["convert", "--engine", "builtin", "--on-error", "abort", "--input"])
        .arg(sb.docs())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("1 file(s) not attempted"));
}

#[test]
fn zero_jobs_is_a_config_error() {
    let sb = Sandbox::new();

    sb.cli()
        .args(["convert", "--engine", "builtin", "--jobs", "0", "--input"])
        .arg(sb.docs())
        .assert()
        .code(2);
}

#[test]
fn parallel_jobs_convert_everything() {
    let sb = Sandbox::new();
    for i in 0..4 {
        sb.write_doc(&format!("doc{i}.docx"), &format!("Doc {i}"));
    }

    sb.cli()
        .args(["convert", "--engine", "builtin", "--jobs", "3", "--input"])
        .arg(sb.docs())
        .assert()
        .success()
        .stdout(predicate::str::contains("to Markdown.").count(4));

    for i in 0..4 {
        assert!(sb.docs().join(format!("doc{i}.md")).is_file());
    }
}

#[test]
fn config_file_selects_engine() {
    let sb = Sandbox::new();
    let source = sb.write_doc("a.docx", "A");
    let config = sb.root.join("folio.toml");
    fs::write(&config, "[converter]\nengine = \"builtin\"\n").unwrap();

    sb.cli()
        .arg("--config")
        .arg(&config)
        .args(["convert", "--input"])
        .arg(sb.docs())
        .assert()
        .success()
        .stdout(converted_line(&source));
}

#[test]
fn missing_explicit_config_exits_two() {
    let sb = Sandbox::new();

    sb.cli()
        .arg("--config")
        .arg(sb.root.join("absent.toml"))
        .args(["config", "show"])
        .assert()
        .code(2);
}

#[test]
fn render_prints_markdown_and_extracts_media() {
    let sb = Sandbox::new();
    let source = sb.docs().join("figs.docx");
    DocxBuilder::new()
        .heading(2, "Figures")
        .image("image1.png", PNG_BYTES, "plot")
        .write(&source)
        .unwrap();
    let out = sb.docs().join("figs.md");

    sb.cli()
        .args(["render", "--engine", "builtin"])
        .arg(&source)
        .arg("--output")
        .arg(&out)
        .assert()
        .success()
        .stdout(converted_line(&source));

    assert_eq!(
        fs::read_to_string(&out).unwrap(),
        "## Figures\n\n![plot](media/figs/image1.png)\n"
    );
    assert!(sb.docs().join("media/figs/image1.png").is_file());
}

#[test]
fn render_to_stdout() {
    let sb = Sandbox::new();
    let source = sb.write_doc("one.docx", "One");

    sb.cli()
        .args(["render", "--engine", "builtin"])
        .arg(&source)
        .assert()
        .success()
        .stdout("# One\n\nBody text.\n");
}

#[test]
fn check_builtin_prints_identity() {
    let sb = Sandbox::new();

    sb.cli()
        .args(["check", "--engine", "builtin"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("folio builtin DOCX reader"));
}

#[test]
fn check_missing_converter_exits_three() {
    let sb = Sandbox::new();

    sb.cli()
        .args(["check", "--converter", "folio-test-no-such-converter"])
        .assert()
        .code(3);
}

#[test]
fn config_commands_default_to_home_folder() {
    let sb = Sandbox::new();

    sb.cli().args(["config", "init"]).assert().success();
    let path = sb.root.join("home").join(".folio").join("folio.toml");
    assert!(path.is_file());

    fs::write(&path, "[run]\njobs = 3\n").unwrap();
    sb.cli()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("jobs = 3"));
}

#[test]
fn config_init_then_show_round_trips() {
    let sb = Sandbox::new();
    let config = sb.root.join("cfg").join("folio.toml");

    sb.cli()
        .arg("--config")
        .arg(&config)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config initialized at"));

    sb.cli()
        .arg("--config")
        .arg(&config)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[converter]"))
        .stdout(predicate::str::contains("program = \"pandoc\""))
        .stdout(predicate::str::contains("[run]"));
}
