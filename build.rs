use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories holding this crate's own Rust sources. Anything else under the
// package root (reference material, build output) is not policed.
const SOURCE_DIRS: [&str; 4] = ["landmark", "cli", "tests", "benches"];

// Collects every matching line of one file so a single error can list them all.
struct ViolationCollector {
    violations: Vec<String>,
    file_path: PathBuf,
    skip_comments_and_strings: bool,
}

impl ViolationCollector {
    fn new(file_path: &Path, skip_comments_and_strings: bool) -> Self {
        Self {
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
            skip_comments_and_strings,
        }
    }

    fn check_and_get_error_message(&self, rule: &str, advice: &str) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            rule,
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n⚠️ {advice}\n"));
        Some(error_msg)
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();

        if self.skip_comments_and_strings {
            let is_pure_comment = line_text.trim_start().starts_with("//");
            // Odd-indexed segments of a quote split sit inside string literals.
            let is_in_string = line_text
                .split('"')
                .enumerate()
                .any(|(i, part)| i % 2 == 1 && part.contains('_'));
            if is_pure_comment || is_in_string {
                return Ok(true);
            }
        }

        self.violations.push(format!("{line_number}:{line_text}"));
        Ok(true)
    }
}

fn rust_sources() -> Vec<PathBuf> {
    SOURCE_DIRS
        .iter()
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn scan(
    pattern: &str,
    skip_comments_and_strings: bool,
    rule: &str,
    advice: &str,
) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(pattern)?;
    let mut searcher = Searcher::new();

    for path in rust_sources() {
        let mut collector = ViolationCollector::new(&path, skip_comments_and_strings);
        searcher.search_path(&matcher, &path, &mut collector)?;
        if let Some(error_message) = collector.check_and_get_error_message(rule, advice) {
            return Err(error_message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    let checks = [
        (
            r"\b(_[a-zA-Z0-9_]+)\b",
            true,
            "underscore-prefixed variables",
            "Underscore-prefixed variable names are not allowed in this project. Use the value or remove it.",
        ),
        (
            r"(//|/\*).*\b(?:FIXED|CORRECTED|FIX|FIXES|CHANGED|MODIFIED|UPDATED)\b",
            false,
            "change-log comments",
            "Comments describe the code as it is, not how it came to be.",
        ),
        (
            r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
            false,
            "#[allow(dead_code)] attributes",
            "#[allow(dead_code)] attributes are STRICTLY FORBIDDEN in this project. Use the code or remove it.",
        ),
    ];

    for (pattern, skip_comments_and_strings, rule, advice) in checks {
        if let Err(e) = scan(pattern, skip_comments_and_strings, rule, advice) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
