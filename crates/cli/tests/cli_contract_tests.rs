// Integration tests for the pqstep shell and MCP contract.
//
// Each test gets its own config directory so the user's settings and the
// keychain are never read.
//
// Run with: cargo test -p pqstep-cli --test cli_contract_tests -- --nocapture

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

const FORMULA: &str = "let\n    Source = Excel.CurrentWorkbook(){[Name=\"Table1\"]}[Content],\n    #\"Changed Type\" = Table.TransformColumnTypes(Source,{{\"Sales\", Int64.Type}})\nin\n    #\"Changed Type\"";

const MARGIN: &str = "Table.AddColumn(#\"Changed Type\", \"Margin\", each [Sales] * 0.1)";

fn pqstep(config_dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_pqstep"));
    cmd.env("PQSTEP_CONFIG_DIR", config_dir)
        .env_remove("PQSTEP_DOCUMENT_PATH")
        .env_remove("PQSTEP_QUERY_NAME")
        .env_remove("PQSTEP_DEFAULT_PROMPT")
        .env("RUST_LOG", "off");
    cmd
}

fn run_with_stdin(mut cmd: Command, input: &str) -> Output {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn pqstep");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(input.as_bytes())
        .expect("write stdin");
    child.wait_with_output().expect("wait pqstep")
}

fn write_document(dir: &Path) -> PathBuf {
    let path = dir.join("book.pq");
    let text = format!("section Section1;\n\nshared Table1 = {};\n\nshared Rates = 1;\n", FORMULA);
    fs::write(&path, text).unwrap();
    path
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// ===========================================================================
// pqstep splice
// ===========================================================================

#[test]
fn splice_writes_patched_formula() {
    let config = TempDir::new().unwrap();
    let mut cmd = pqstep(config.path());
    cmd.args(["splice", "--step", "Added_Margin", "--fragment", MARGIN]);

    let output = run_with_stdin(cmd, FORMULA);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let expected = format!(
        "let\n    Source = Excel.CurrentWorkbook(){{[Name=\"Table1\"]}}[Content],\n    #\"Changed Type\" = Table.TransformColumnTypes(Source,{{{{\"Sales\", Int64.Type}}}}),\n    #\"Added_Margin\" = {}\nin\n    #\"Added_Margin\"",
        MARGIN
    );
    assert_eq!(stdout(&output), expected);
}

#[test]
fn splice_json_reports_status() {
    let config = TempDir::new().unwrap();
    let mut cmd = pqstep(config.path());
    cmd.args(["splice", "--step", "#\"Added_Margin\"", "--fragment", MARGIN, "--json"]);

    let output = run_with_stdin(cmd, FORMULA);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let val: serde_json::Value = serde_json::from_str(stdout(&output).trim()).expect("valid JSON");
    assert_eq!(val["status"], "success");
    assert!(val["formula"].as_str().unwrap().ends_with("in\n    #\"Added_Margin\""));
}

#[test]
fn splice_twice_is_noop() {
    let config = TempDir::new().unwrap();
    let mut first = pqstep(config.path());
    first.args(["splice", "--step", "Added_Margin", "--fragment", MARGIN]);
    let once = stdout(&run_with_stdin(first, FORMULA));

    let mut second = pqstep(config.path());
    second.args(["splice", "--step", "Added_Margin", "--fragment", MARGIN, "--json"]);
    let output = run_with_stdin(second, &once);

    assert_eq!(output.status.code(), Some(3));
    let val: serde_json::Value = serde_json::from_str(stdout(&output).trim()).unwrap();
    assert_eq!(val, serde_json::json!({"status": "no_op"}));
}

#[test]
fn splice_without_in_is_malformed() {
    let config = TempDir::new().unwrap();
    let mut cmd = pqstep(config.path());
    cmd.args(["splice", "--step", "Added_Margin", "--fragment", MARGIN]);

    let output = run_with_stdin(cmd, "let\n    Source = 1");
    assert_eq!(output.status.code(), Some(4));
    assert!(stdout(&output).is_empty());
    assert!(stderr(&output).starts_with("error: "));
}

// ===========================================================================
// pqstep add-column / list-queries
// ===========================================================================

#[test]
fn add_column_with_fragment_updates_document() {
    let config = TempDir::new().unwrap();
    let docs = TempDir::new().unwrap();
    let path = write_document(docs.path());

    let output = pqstep(config.path())
        .args(["add-column", "Margin", "--fragment", MARGIN, "--document"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "Column 'Margin' added as step #\"Added_Margin\".");

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains(&format!("    #\"Added_Margin\" = {}\nin\n    #\"Added_Margin\";", MARGIN)));
    assert!(text.ends_with("shared Rates = 1;\n"));
    assert!(!path.with_extension("pq.lock").exists());

    let again = pqstep(config.path())
        .args(["add-column", "Margin", "--fragment", MARGIN, "--document"])
        .arg(&path)
        .output()
        .unwrap();
    assert_eq!(again.status.code(), Some(3));
    assert_eq!(stdout(&again).trim(), "No changes made. Formula is already up to date.");
    assert_eq!(fs::read_to_string(&path).unwrap(), text);
}

#[test]
fn add_column_dry_run_leaves_document() {
    let config = TempDir::new().unwrap();
    let docs = TempDir::new().unwrap();
    let path = write_document(docs.path());
    let before = fs::read_to_string(&path).unwrap();

    let output = pqstep(config.path())
        .args(["add-column", "Margin", "--fragment", MARGIN, "--dry-run", "--json", "--document"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let val: serde_json::Value = serde_json::from_str(stdout(&output).trim()).unwrap();
    assert_eq!(val["status"], "added");
    assert_eq!(val["step"], "Added_Margin");
    assert_eq!(val["saved"], false);
    assert_eq!(fs::read_to_string(&path).unwrap(), before);
}

#[test]
fn add_column_unknown_query() {
    let config = TempDir::new().unwrap();
    let docs = TempDir::new().unwrap();
    let path = write_document(docs.path());

    let output = pqstep(config.path())
        .args(["add-column", "Margin", "--fragment", MARGIN, "--query", "Orders", "--document"])
        .arg(&path)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(23));
    assert!(stderr(&output).contains("Available queries: Table1, Rates"));
}

#[test]
fn add_column_missing_document() {
    let config = TempDir::new().unwrap();
    let docs = TempDir::new().unwrap();

    let output = pqstep(config.path())
        .args(["add-column", "Margin", "--fragment", MARGIN, "--document"])
        .arg(docs.path().join("missing.pq"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(20));
}

#[test]
fn add_column_without_configured_document() {
    let config = TempDir::new().unwrap();

    let output = pqstep(config.path())
        .args(["add-column", "Margin", "--fragment", MARGIN])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("hint:  pass --document <path>"));
}

#[test]
fn list_queries_json() {
    let config = TempDir::new().unwrap();
    let docs = TempDir::new().unwrap();
    let path = write_document(docs.path());

    let output = pqstep(config.path())
        .args(["list-queries", "--json", "--document"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let val: serde_json::Value = serde_json::from_str(stdout(&output).trim()).unwrap();
    assert_eq!(val["queries"], serde_json::json!(["Table1", "Rates"]));
}

#[test]
fn settings_file_supplies_document() {
    let config = TempDir::new().unwrap();
    let docs = TempDir::new().unwrap();
    let path = write_document(docs.path());
    let settings = serde_json::json!({ "document.path": path, "ai": { "provider": "none" } });
    fs::write(config.path().join("settings.json"), settings.to_string()).unwrap();

    let output = pqstep(config.path()).args(["list-queries"]).output().unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "Table1\nRates\n");
}

// ===========================================================================
// pqstep ai doctor
// ===========================================================================

#[test]
fn ai_doctor_disabled_provider() {
    let config = TempDir::new().unwrap();
    fs::write(config.path().join("settings.json"), r#"{ "ai": { "provider": "none" } }"#).unwrap();

    let output = pqstep(config.path()).args(["ai", "doctor", "--json"]).output().unwrap();
    assert_eq!(output.status.code(), Some(10));

    let val: serde_json::Value = serde_json::from_str(stdout(&output).trim()).unwrap();
    assert_eq!(val["schema_version"], 1);
    assert_eq!(val["status"], "disabled");
    assert_eq!(val["key"], "missing");
}

// ===========================================================================
// pqstep serve
// ===========================================================================

#[test]
fn serve_initialize_and_list_tools() {
    let config = TempDir::new().unwrap();
    let mut cmd = pqstep(config.path());
    cmd.arg("serve");

    let input = concat!(
        r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{}}}"#,
        "\n",
        r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
        "\n",
    );
    let output = run_with_stdin(cmd, input);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let out = stdout(&output);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 2, "notifications get no reply: {}", out);

    let init: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(init["id"], 1);
    assert_eq!(init["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(init["result"]["serverInfo"]["name"], "pqstep");

    let tools: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
    let names: Vec<&str> = tools["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["add_query_column", "list_queries"]);
}

#[test]
fn serve_tool_call_patches_document() {
    let config = TempDir::new().unwrap();
    let docs = TempDir::new().unwrap();
    let path = write_document(docs.path());
    let settings = serde_json::json!({ "document.path": path, "ai": { "provider": "none" } });
    fs::write(config.path().join("settings.json"), settings.to_string()).unwrap();

    let call = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 7,
        "method": "tools/call",
        "params": { "name": "add_query_column", "arguments": { "prompt": "Margin" } }
    });
    let mut cmd = pqstep(config.path());
    cmd.arg("serve");
    let output = run_with_stdin(cmd, &format!("{}\n", call));
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    // Without a provider the call fails as a tool result, not a protocol error
    let reply: serde_json::Value = serde_json::from_str(stdout(&output).trim()).unwrap();
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["result"]["isError"], true);
    assert!(reply["result"]["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains("AI not configured"));
    assert!(fs::read_to_string(&path).unwrap().contains("shared Table1 = let"));
}
