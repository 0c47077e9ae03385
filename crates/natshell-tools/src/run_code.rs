//! `run_code`: executes a snippet in one of ten languages. Interpreted
//! languages run directly; compiled languages compile into a
//! `tempfile::tempdir()` first. The `TempDir` guard is dropped (and so its
//! directory removed) on every return path, success or failure.

use crate::ToolError;
use std::io::Write;
use std::process::Command;
use std::time::Duration;
use wait_timeout::ChildExt;

const RUN_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    JavaScript,
    Bash,
    Ruby,
    Perl,
    Php,
    C,
    Cpp,
    Rust,
    Go,
}

impl Language {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name.to_lowercase().as_str() {
            "python" | "python3" | "py" => Self::Python,
            "javascript" | "js" | "node" => Self::JavaScript,
            "bash" | "sh" | "shell" => Self::Bash,
            "ruby" | "rb" => Self::Ruby,
            "perl" | "pl" => Self::Perl,
            "php" => Self::Php,
            "c" => Self::C,
            "cpp" | "c++" => Self::Cpp,
            "rust" | "rs" => Self::Rust,
            "go" | "golang" => Self::Go,
            _ => return None,
        })
    }

    fn source_extension(self) -> &'static str {
        match self {
            Self::Python => "py",
            Self::JavaScript => "js",
            Self::Bash => "sh",
            Self::Ruby => "rb",
            Self::Perl => "pl",
            Self::Php => "php",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Rust => "rs",
            Self::Go => "go",
        }
    }

    fn is_compiled(self) -> bool {
        matches!(self, Self::C | Self::Cpp | Self::Rust | Self::Go)
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

pub fn run_code(language: &str, source: &str) -> Result<RunOutcome, ToolError> {
    let lang = Language::parse(language)
        .ok_or_else(|| ToolError::Validation(format!("unsupported language: {language}")))?;

    let workdir = tempfile::tempdir().map_err(|e| ToolError::Execution(e.to_string()))?;
    let source_path = workdir.path().join(format!("snippet.{}", lang.source_extension()));
    std::fs::write(&source_path, source).map_err(|e| ToolError::Execution(e.to_string()))?;

    let outcome = if lang.is_compiled() {
        run_compiled(lang, &source_path, workdir.path())
    } else {
        run_interpreted(lang, &source_path, workdir.path())
    };
    // `workdir` is dropped here regardless of outcome, removing every temp
    // artifact the run produced.
    outcome
}

fn run_interpreted(
    lang: Language,
    source_path: &std::path::Path,
    workdir: &std::path::Path,
) -> Result<RunOutcome, ToolError> {
    let mut command = match lang {
        Language::Python => {
            let mut c = Command::new("python3");
            c.arg(source_path);
            c
        }
        Language::JavaScript => {
            let mut c = Command::new("node");
            c.arg(source_path);
            c
        }
        Language::Bash => {
            let mut c = Command::new("bash");
            c.arg(source_path);
            c
        }
        Language::Ruby => {
            let mut c = Command::new("ruby");
            c.arg(source_path);
            c
        }
        Language::Perl => {
            let mut c = Command::new("perl");
            c.arg(source_path);
            c
        }
        Language::Php => {
            let mut c = Command::new("php");
            c.arg(source_path);
            c
        }
        _ => unreachable!("compiled languages handled separately"),
    };
    command.current_dir(workdir);
    run_with_timeout(command)
}

fn run_compiled(
    lang: Language,
    source_path: &std::path::Path,
    workdir: &std::path::Path,
) -> Result<RunOutcome, ToolError> {
    let binary_path = workdir.join("snippet.out");
    let compile = match lang {
        Language::C => {
            let mut c = Command::new("cc");
            c.arg(source_path).arg("-o").arg(&binary_path);
            c
        }
        Language::Cpp => {
            let mut c = Command::new("c++");
            c.arg(source_path).arg("-o").arg(&binary_path);
            c
        }
        Language::Rust => {
            let mut c = Command::new("rustc");
            c.arg(source_path).arg("-o").arg(&binary_path);
            c
        }
        Language::Go => {
            let mut c = Command::new("go");
            c.arg("build").arg("-o").arg(&binary_path).arg(source_path);
            c
        }
        _ => unreachable!("interpreted languages handled separately"),
    };

    let compile_outcome = run_with_timeout(compile)?;
    if compile_outcome.exit_code != Some(0) {
        return Ok(RunOutcome {
            exit_code: compile_outcome.exit_code,
            stdout: compile_outcome.stdout,
            stderr: format!("compile failed:\n{}", compile_outcome.stderr),
            timed_out: compile_outcome.timed_out,
        });
    }

    let mut run = Command::new(&binary_path);
    run.current_dir(workdir);
    run_with_timeout(run)
}

fn run_with_timeout(mut command: Command) -> Result<RunOutcome, ToolError> {
    command.stdout(std::process::Stdio::piped());
    command.stderr(std::process::Stdio::piped());
    command.stdin(std::process::Stdio::null());

    let mut child = command.spawn().map_err(|e| ToolError::Execution(e.to_string()))?;
    match child
        .wait_timeout(RUN_TIMEOUT)
        .map_err(|e| ToolError::Execution(e.to_string()))?
    {
        Some(status) => {
            let output = child.wait_with_output().map_err(|e| ToolError::Execution(e.to_string()))?;
            Ok(RunOutcome {
                exit_code: status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                timed_out: false,
            })
        }
        None => {
            let _ = child.kill();
            let output = child.wait_with_output().map_err(|e| ToolError::Execution(e.to_string()))?;
            Ok(RunOutcome {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                timed_out: true,
            })
        }
    }
}

#[allow(dead_code)]
fn write_stdin(child: &mut std::process::Child, data: &[u8]) -> std::io::Result<()> {
    if let Some(stdin) = child.stdin.as_mut() {
        stdin.write_all(data)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_language_aliases() {
        assert_eq!(Language::parse("py"), Some(Language::Python));
        assert_eq!(Language::parse("PYTHON3"), Some(Language::Python));
        assert_eq!(Language::parse("fortran"), None);
    }

    #[test]
    fn runs_a_python_snippet() {
        let outcome = run_code("python", "print('hi from snippet')").unwrap();
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.stdout.contains("hi from snippet"));
    }

    #[test]
    fn runs_a_bash_snippet() {
        let outcome = run_code("bash", "echo hi").unwrap();
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.stdout.contains("hi"));
    }

    #[test]
    fn unsupported_language_is_rejected() {
        let err = run_code("cobol", "DISPLAY 'HI'").unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }

    #[test]
    fn temp_directory_is_cleaned_up_after_run() {
        let workdir = tempfile::tempdir().unwrap();
        let path = workdir.path().to_path_buf();
        drop(workdir);
        assert!(!path.exists());
    }
}
