//! Source checks standing in for a device compiler on the host backend.
//!
//! The host backend never generates code, but a program still has to "build"
//! so that broken sources fail the same way they would on a device: with a
//! status, the options used and a compiler-style log.
//!
//! Checks, per fragment:
//! - `#error` directives
//! - balanced `()`, `[]` and `{}` outside comments and literals
//! - `kernel`/`__kernel` declarations returning `void`, unique per program
//!
//! and per program: a non-empty source, at least one entry point, and build
//! options that look like options.

use crate::program::ProgramSource;

/// Result of a successful check.
#[derive(Debug)]
pub(crate) struct CompiledUnit {
    pub entry_points: Vec<String>,
    /// Warnings only; empty when the source was clean.
    pub log: String,
}

#[derive(Default)]
struct BuildLog {
    lines: Vec<String>,
    errors: usize,
    warnings: usize,
}

impl BuildLog {
    fn error_at(&mut self, file: &str, line: usize, col: usize, msg: impl AsRef<str>) {
        self.lines.push(format!("{file}:{line}:{col}: error: {}", msg.as_ref()));
        self.errors += 1;
    }

    fn note_at(&mut self, file: &str, line: usize, col: usize, msg: impl AsRef<str>) {
        self.lines.push(format!("{file}:{line}:{col}: note: {}", msg.as_ref()));
    }

    fn error(&mut self, msg: impl AsRef<str>) {
        self.lines.push(format!("error: {}", msg.as_ref()));
        self.errors += 1;
    }

    fn warning(&mut self, msg: impl AsRef<str>) {
        self.lines.push(format!("warning: {}", msg.as_ref()));
        self.warnings += 1;
    }

    fn finish(mut self) -> String {
        if self.errors > 0 {
            self.lines.push(format!("{} error(s) generated.", self.errors));
        } else if self.warnings > 0 {
            self.lines.push(format!("{} warning(s) generated.", self.warnings));
        }
        self.lines.join("\n")
    }
}

/// Check a program. `has_host_impl` tells which entry points can run.
///
/// Returns the build log as the error on failure.
pub(crate) fn compile(
    source: &ProgramSource,
    options: &str,
    has_host_impl: impl Fn(&str) -> bool,
) -> Result<CompiledUnit, String> {
    let mut log = BuildLog::default();
    check_options(options, &mut log);

    if source.is_empty() {
        log.error("program source is empty");
        return Err(log.finish());
    }

    let mut entry_points: Vec<String> = Vec::new();
    for fragment in source.fragments() {
        let cleaned = blank_comments_and_literals(&fragment.text);
        check_directives(&fragment.name, &fragment.text, &cleaned, &mut log);
        check_delimiters(&fragment.name, &cleaned, &mut log);

        let tokens = tokenize(&cleaned);
        for (name, line, col) in entry_point_decls(&fragment.name, &tokens, &mut log) {
            if entry_points.contains(&name) {
                log.error_at(&fragment.name, line, col, format!("redefinition of kernel '{name}'"));
            } else {
                entry_points.push(name);
            }
        }
    }

    if log.errors == 0 && entry_points.is_empty() {
        log.error("no kernel entry points found in program");
    }
    if log.errors > 0 {
        return Err(log.finish());
    }

    for name in entry_points.iter().filter(|n| !has_host_impl(n.as_str())) {
        log.warning(format!("kernel '{name}' has no host implementation; dispatching it will fail"));
    }
    Ok(CompiledUnit { entry_points, log: log.finish() })
}

fn check_options(options: &str, log: &mut BuildLog) {
    let mut tokens = options.split_whitespace();
    while let Some(tok) = tokens.next() {
        match tok {
            // Options taking a separate value.
            "-D" | "-I" => {
                if tokens.next().is_none() {
                    log.error(format!("missing argument to '{tok}'"));
                }
            }
            t if t.starts_with('-') => {}
            t => log.error(format!("invalid build option '{t}'")),
        }
    }
}

/// Replace comments and the contents of string/char literals with spaces,
/// keeping newlines so line and column numbers stay valid.
fn blank_comments_and_literals(text: &str) -> String {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Code,
        LineComment,
        BlockComment,
        Literal(char),
    }

    let mut out = String::with_capacity(text.len());
    let mut state = State::Code;
    let mut chars = text.chars().peekable();
    let blank = |c: char| if c == '\n' { '\n' } else { ' ' };

    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::BlockComment;
                }
                '"' | '\'' => {
                    out.push(c);
                    state = State::Literal(c);
                }
                _ => out.push(c),
            },
            State::LineComment => {
                out.push(blank(c));
                if c == '\n' {
                    state = State::Code;
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    state = State::Code;
                } else {
                    out.push(blank(c));
                }
            }
            State::Literal(quote) => {
                if c == '\\' {
                    out.push(' ');
                    if let Some(escaped) = chars.next() {
                        out.push(blank(escaped));
                    }
                } else if c == quote {
                    out.push(c);
                    state = State::Code;
                } else if c == '\n' {
                    // unterminated literal ends at the line
                    out.push('\n');
                    state = State::Code;
                } else {
                    out.push(' ');
                }
            }
        }
    }
    out
}

fn check_directives(file: &str, original: &str, cleaned: &str, log: &mut BuildLog) {
    for (idx, (orig, clean)) in original.lines().zip(cleaned.lines()).enumerate() {
        let trimmed = clean.trim_start();
        let Some(directive) = trimmed.strip_prefix('#') else {
            continue;
        };
        let Some(rest) = directive.trim_start().strip_prefix("error") else {
            continue;
        };
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            let col = clean.chars().count() - trimmed.chars().count() + 1;
            log.error_at(file, idx + 1, col, orig.trim());
        }
    }
}

fn closing(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn check_delimiters(file: &str, cleaned: &str, log: &mut BuildLog) {
    let mut stack: Vec<(char, usize, usize)> = Vec::new();
    let mut last_line = 1;

    for (idx, line) in cleaned.lines().enumerate() {
        last_line = idx + 1;
        for (col, c) in line.chars().enumerate() {
            match c {
                '(' | '[' | '{' => stack.push((c, idx + 1, col + 1)),
                ')' | ']' | '}' => match stack.pop() {
                    Some((open, ..)) if closing(open) == c => {}
                    Some((open, ol, oc)) => {
                        log.error_at(file, idx + 1, col + 1, format!("expected '{}'", closing(open)));
                        log.note_at(file, ol, oc, format!("to match this '{open}'"));
                        return;
                    }
                    None => {
                        log.error_at(file, idx + 1, col + 1, format!("extraneous closing '{c}'"));
                        return;
                    }
                },
                _ => {}
            }
        }
    }

    if let Some((open, ol, oc)) = stack.pop() {
        log.error_at(
            file,
            last_line,
            1,
            format!("expected '{}' at end of input", closing(open)),
        );
        log.note_at(file, ol, oc, format!("to match this '{open}'"));
    }
}

#[derive(Debug)]
struct Token<'a> {
    text: &'a str,
    line: usize,
    col: usize,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_ident(text: &str) -> bool {
    text.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_')
}

/// Identifiers and single-character punctuation. Preprocessor lines are skipped.
fn tokenize(cleaned: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    for (idx, line) in cleaned.lines().enumerate() {
        if line.trim_start().starts_with('#') {
            continue;
        }
        let mut chars = line.char_indices().enumerate().peekable();
        while let Some((col, (start, c))) = chars.next() {
            if is_ident_char(c) {
                let mut end = start + c.len_utf8();
                while let Some(&(_, (i, n))) = chars.peek() {
                    if !is_ident_char(n) {
                        break;
                    }
                    end = i + n.len_utf8();
                    chars.next();
                }
                tokens.push(Token { text: &line[start..end], line: idx + 1, col: col + 1 });
            } else if !c.is_whitespace() {
                tokens.push(Token {
                    text: &line[start..start + c.len_utf8()],
                    line: idx + 1,
                    col: col + 1,
                });
            }
        }
    }
    tokens
}

/// Index just past a parenthesized group starting at `at`, or `at` itself.
fn skip_group(tokens: &[Token<'_>], at: usize) -> usize {
    if tokens.get(at).map(|t| t.text) != Some("(") {
        return at;
    }
    let mut depth = 0usize;
    for (i, tok) in tokens.iter().enumerate().skip(at) {
        match tok.text {
            "(" => depth += 1,
            ")" => {
                depth -= 1;
                if depth == 0 {
                    return i + 1;
                }
            }
            _ => {}
        }
    }
    tokens.len()
}

/// `(name, line, col)` of every kernel declaration.
fn entry_point_decls(file: &str, tokens: &[Token<'_>], log: &mut BuildLog) -> Vec<(String, usize, usize)> {
    let mut found = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if !matches!(tokens[i].text, "kernel" | "__kernel") {
            i += 1;
            continue;
        }

        let mut j = i + 1;
        while tokens.get(j).is_some_and(|t| t.text == "__attribute__") {
            j = skip_group(tokens, j + 1);
        }

        match (tokens.get(j), tokens.get(j + 1), tokens.get(j + 2)) {
            (Some(ret), Some(name), Some(paren))
                if ret.text == "void" && is_ident(name.text) && paren.text == "(" =>
            {
                found.push((name.text.to_string(), name.line, name.col));
            }
            (Some(ret), ..) if ret.text != "void" => {
                log.error_at(file, ret.line, ret.col, "kernel functions must return void");
            }
            (Some(tok), ..) => {
                log.error_at(file, tok.line, tok.col, "expected kernel function name");
            }
            (None, ..) => {
                let tok = &tokens[i];
                log.error_at(file, tok.line, tok.col, "expected kernel function declaration");
            }
        }
        i = j + 1;
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(src: &str) -> Result<CompiledUnit, String> {
        compile(&ProgramSource::with_source("test.cl", src), "", |_| true)
    }

    #[test]
    fn test_builtin_histogram_compiles() {
        let unit = compile(&ProgramSource::builtin_histogram(), "", |_| true).unwrap();
        assert_eq!(unit.entry_points, ["createHist", "blelloch", "applyHistogram"]);
        assert!(unit.log.is_empty());
    }

    #[test]
    fn test_empty_source() {
        let log = build("   \n").unwrap_err();
        assert!(log.contains("error: program source is empty"));
    }

    #[test]
    fn test_missing_brace_reports_position() {
        let log = build("kernel void f(global int* x) {\n  x[0] = 1;\n").unwrap_err();
        assert!(log.contains("test.cl:2:1: error: expected '}' at end of input"), "{log}");
        assert!(log.contains("test.cl:1:30: note: to match this '{'"), "{log}");
        assert!(log.ends_with("1 error(s) generated."));
    }

    #[test]
    fn test_mismatched_delimiter() {
        let log = build("kernel void f(global int* x) {\n  x[0) = 1;\n}\n").unwrap_err();
        assert!(log.contains("test.cl:2:6: error: expected ']'"), "{log}");
    }

    #[test]
    fn test_braces_in_comments_and_strings_ignored() {
        let src = "// {\n/* ( */ kernel void f(global int* x) { x[0] = '}'; }\n";
        assert_eq!(build(src).unwrap().entry_points, ["f"]);
    }

    #[test]
    fn test_error_directive() {
        let log = build("#error unsupported device\nkernel void f() {}\n").unwrap_err();
        assert!(log.contains("test.cl:1:1: error: #error unsupported device"), "{log}");
    }

    #[test]
    fn test_no_entry_points() {
        let log = build("int helper(int x) { return x; }\n").unwrap_err();
        assert!(log.contains("no kernel entry points"));
    }

    #[test]
    fn test_non_void_kernel() {
        let log = build("kernel int f() { return 0; }\n").unwrap_err();
        assert!(log.contains("test.cl:1:8: error: kernel functions must return void"), "{log}");
    }

    #[test]
    fn test_attribute_and_duplicates() {
        let src = "__kernel __attribute__((reqd_work_group_size(64, 1, 1))) void g() {}\n\
                   kernel void g() {}\n";
        let log = build(src).unwrap_err();
        assert!(log.contains("redefinition of kernel 'g'"), "{log}");
    }

    #[test]
    fn test_unknown_kernels_warn() {
        let src = ProgramSource::with_source("k.cl", "kernel void other() {}");
        let unit = compile(&src, "", |name| name != "other").unwrap();
        assert!(unit.log.contains("warning: kernel 'other' has no host implementation"));
    }

    #[test]
    fn test_build_options() {
        let src = ProgramSource::builtin_vector();
        assert!(compile(&src, "-D BINS=256 -cl-fast-relaxed-math", |_| true).is_ok());
        let log = compile(&src, "fast", |_| true).unwrap_err();
        assert!(log.contains("invalid build option 'fast'"));
        assert!(compile(&src, "-D", |_| true).is_err());
    }
}
