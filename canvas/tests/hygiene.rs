//! Hygiene: source-level rules for the canvas crate, checked at test time.
//!
//! Each rule has a budget of zero. The crate runs inside a browser tab and a
//! headless client alike, so a panic takes the whole view down, and wall-clock
//! reads panic on `wasm32-unknown-unknown`. Time comes in as `now_ms`.

use std::fs;
use std::path::Path;

struct SourceFile {
    path: String,
    content: String,
}

/// (pattern, what it means)
const FORBIDDEN: &[(&str, &str)] = &[
    // Panics.
    (".unwrap()", "unwrap"),
    (".expect(", "expect"),
    ("panic!(", "panic"),
    ("unreachable!(", "unreachable"),
    ("todo!(", "todo"),
    ("unimplemented!(", "unimplemented"),
    // Silent loss.
    ("let _ =", "discarded result"),
    (".ok()", "discarded error"),
    // Style.
    ("#[allow(dead_code)]", "dead code"),
    ("println!(", "stdout print; use tracing"),
    ("eprintln!(", "stderr print; use tracing"),
    // Wall clock.
    ("Instant::now", "wall clock; take now_ms"),
    ("SystemTime::now", "wall clock; take now_ms"),
];

/// Production `.rs` files under `src/`, test files excluded.
fn source_files() -> Vec<SourceFile> {
    let mut files = Vec::new();
    collect_rs_files(Path::new("src"), &mut files);
    assert!(!files.is_empty(), "no sources found; run from the canvas crate root");
    files
}

fn collect_rs_files(dir: &Path, out: &mut Vec<SourceFile>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rs_files(&path, out);
            continue;
        }
        let path_str = path.to_string_lossy().to_string();
        if !path_str.ends_with(".rs") || path_str.ends_with("_test.rs") {
            continue;
        }
        if let Ok(content) = fs::read_to_string(&path) {
            out.push(SourceFile { path: path_str, content });
        }
    }
}

fn hits(files: &[SourceFile], pattern: &str) -> Vec<String> {
    files
        .iter()
        .flat_map(|file| {
            file.content
                .lines()
                .enumerate()
                .filter(|(_, line)| line.contains(pattern))
                .map(|(n, line)| format!("  {}:{}: {}", file.path, n + 1, line.trim()))
        })
        .collect()
}

#[test]
fn forbidden_patterns_are_absent() {
    let files = source_files();
    let mut report = Vec::new();
    for (pattern, meaning) in FORBIDDEN {
        let found = hits(&files, pattern);
        if !found.is_empty() {
            report.push(format!("{pattern} ({meaning}):\n{}", found.join("\n")));
        }
    }
    assert!(report.is_empty(), "hygiene violations:\n{}", report.join("\n"));
}

#[test]
fn every_module_with_logic_has_sibling_tests() {
    let files = source_files();
    let missing: Vec<&str> = files
        .iter()
        .filter(|f| !f.path.ends_with("lib.rs") && !f.path.ends_with("consts.rs"))
        .filter(|f| {
            let test = f.path.replace(".rs", "_test.rs");
            !Path::new(&test).exists()
        })
        .map(|f| f.path.as_str())
        .collect();
    assert!(missing.is_empty(), "modules without a sibling _test.rs: {missing:?}");
}
