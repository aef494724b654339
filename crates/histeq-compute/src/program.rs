//! Program units: kernel source fragments and build diagnostics.
//!
//! A [`ProgramSource`] is an ordered list of named fragments. Backends build
//! the fragments together as one program; the fragment names only matter
//! for diagnostics. Build options are a plain string handed to the
//! backend's compiler unchanged.

use std::fmt;
use std::path::Path;

use crate::{ComputeError, ComputeResult};

const HISTOGRAM_CL: &str = include_str!("../kernels/histogram.cl");
const VECTOR_CL: &str = include_str!("../kernels/vector.cl");

/// One named piece of kernel source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFragment {
    pub name: String,
    pub text: String,
}

/// Ordered kernel source fragments making up one program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramSource {
    fragments: Vec<SourceFragment>,
}

impl ProgramSource {
    /// Empty program. Building it fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// Program with a single in-memory fragment.
    pub fn with_source(name: impl Into<String>, text: impl Into<String>) -> Self {
        let mut src = Self::new();
        src.add_source(name, text);
        src
    }

    /// Append an in-memory fragment.
    pub fn add_source(&mut self, name: impl Into<String>, text: impl Into<String>) -> &mut Self {
        self.fragments.push(SourceFragment { name: name.into(), text: text.into() });
        self
    }

    /// Append the contents of a file. The fragment is named after the path.
    pub fn add_file(&mut self, path: impl AsRef<Path>) -> ComputeResult<&mut Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ComputeError::SourceRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.add_source(path.display().to_string(), text))
    }

    /// Program built from several files, in order.
    pub fn from_files<I, P>(paths: I) -> ComputeResult<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut src = Self::new();
        for path in paths {
            src.add_file(path)?;
        }
        Ok(src)
    }

    /// The embedded `createHist` / `blelloch` / `applyHistogram` kernels.
    pub fn builtin_histogram() -> Self {
        Self::with_source("histogram.cl", HISTOGRAM_CL)
    }

    /// The embedded `add` / `mult` kernels.
    pub fn builtin_vector() -> Self {
        Self::with_source("vector.cl", VECTOR_CL)
    }

    pub fn fragments(&self) -> &[SourceFragment] {
        &self.fragments
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.iter().all(|f| f.text.trim().is_empty())
    }

    /// All fragments joined with newlines, as handed to a single-source compiler.
    pub fn concatenated(&self) -> String {
        self.fragments
            .iter()
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Fragment texts in order, for multi-source compilers.
    pub fn texts(&self) -> Vec<&str> {
        self.fragments.iter().map(|f| f.text.as_str()).collect()
    }
}

/// Build outcome reported by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Success,
    Error,
    InProgress,
    None,
    /// Status code outside the known set, or a runtime error code when the
    /// program object could not be created at all.
    Other(i32),
}

impl BuildStatus {
    /// Map an OpenCL `CL_BUILD_*` code.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Success,
            -1 => Self::None,
            -2 => Self::Error,
            -3 => Self::InProgress,
            other => Self::Other(other),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Error => f.write_str("error"),
            Self::InProgress => f.write_str("in progress"),
            Self::None => f.write_str("none"),
            Self::Other(code) => write!(f, "status {code}"),
        }
    }
}

/// Status, options and log of one program build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDiagnostics {
    pub status: BuildStatus,
    pub options: String,
    pub log: String,
}

impl BuildDiagnostics {
    /// First line of the log that reports an error, or the first non-empty line.
    pub fn summary(&self) -> &str {
        let mut lines = self.log.lines().map(str::trim).filter(|l| !l.is_empty());
        let first = lines.clone().next();
        lines.find(|l| l.contains("error")).or(first).unwrap_or("no build log")
    }

    /// Full multi-line report: status, options, then the log.
    pub fn report(&self) -> String {
        let options = if self.options.is_empty() { "<none>" } else { &self.options };
        format!("Build status: {}\nBuild options: {}\nBuild log:\n{}", self.status, options, self.log)
    }
}

impl fmt::Display for BuildDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.summary(), self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn test_builtin_sources_name_their_kernels() {
        let hist = ProgramSource::builtin_histogram().concatenated();
        for name in ["createHist", "blelloch", "applyHistogram"] {
            assert!(hist.contains(name), "{name}");
        }
        let vec = ProgramSource::builtin_vector().concatenated();
        assert!(vec.contains("kernel void add"));
        assert!(vec.contains("kernel void mult"));
    }

    #[test]
    fn test_fragments_keep_order() {
        let mut src = ProgramSource::with_source("a.cl", "// a");
        src.add_source("b.cl", "// b");
        assert_eq!(src.concatenated(), "// a\n// b");
        assert_eq!(src.fragments()[1].name, "b.cl");
        assert!(ProgramSource::new().is_empty());
    }

    #[test]
    fn test_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extra.cl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "kernel void extra(global int* x) {{ x[0] = 1; }}").unwrap();

        let src = ProgramSource::from_files([&path]).unwrap();
        assert_eq!(src.fragments().len(), 1);
        assert!(src.concatenated().contains("extra"));
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = ProgramSource::from_files(["/nonexistent/kernels.cl"]).unwrap_err();
        match err {
            ComputeError::SourceRead { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/kernels.cl"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(BuildStatus::from_code(0), BuildStatus::Success);
        assert_eq!(BuildStatus::from_code(-2), BuildStatus::Error);
        assert_eq!(BuildStatus::from_code(-11), BuildStatus::Other(-11));
    }

    #[test]
    fn test_summary_prefers_error_line() {
        let diag = BuildDiagnostics {
            status: BuildStatus::Error,
            options: String::new(),
            log: "a.cl:1:1: warning: unused\na.cl:2:5: error: expected ';'\n".into(),
        };
        assert_eq!(diag.summary(), "a.cl:2:5: error: expected ';'");
        assert!(diag.report().contains("Build options: <none>"));
    }
}
