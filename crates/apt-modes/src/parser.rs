//! Mode Parser: turns a `.mode` descriptor file into a [`ParsedMode`], the
//! ordered list of process-launch specifications the pipeline crate spawns.

use std::path::{Path, PathBuf};

use apt_core::GatewayError;
use apt_process::CommandSpec;

/// The result of parsing a mode descriptor: an immutable, ordered chain of
/// commands. Cached per pair on first use by the pool, since parsing
/// touches the filesystem and re-parsing on every pipeline spawn would be
/// wasted work.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedMode {
    pub stages: Vec<CommandSpec>,
}

impl ParsedMode {
    /// Parse `mode_path`. The descriptor's working directory is resolved
    /// relative to the mode file's own parent directory, and any `%s`
    /// placeholder in an argument is substituted with that directory,
    /// matching the convention installed mode trees use to stay relocatable.
    pub fn parse(mode_path: &Path) -> Result<Self, GatewayError> {
        let raw = std::fs::read_to_string(mode_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GatewayError::ModeNotFound(mode_path.display().to_string())
            } else {
                GatewayError::Io(e)
            }
        })?;

        let cwd = mode_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let line = raw
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#'))
            .ok_or_else(|| GatewayError::ParseError {
                path: mode_path.display().to_string(),
                reason: "no command line found in mode descriptor".into(),
            })?;

        let commands = split_pipeline(line);
        if commands.is_empty() {
            return Err(GatewayError::ParseError {
                path: mode_path.display().to_string(),
                reason: "empty pipeline".into(),
            });
        }

        let mut stages = Vec::with_capacity(commands.len());
        for raw_cmd in commands {
            let substituted = raw_cmd.replace("%s", &cwd.display().to_string());
            let mut argv = shlex::split(&substituted).ok_or_else(|| GatewayError::ParseError {
                path: mode_path.display().to_string(),
                reason: format!("unbalanced quoting in command: {raw_cmd}"),
            })?;
            if argv.is_empty() {
                return Err(GatewayError::ParseError {
                    path: mode_path.display().to_string(),
                    reason: "empty command in pipeline".into(),
                });
            }
            let program = argv.remove(0);
            stages.push(CommandSpec::new(program, argv, cwd.clone()));
        }

        Ok(Self { stages })
    }

    /// Apply spawn-time stage options. `deformat`/`reformat` bracket the
    /// chain with a formatter stage selected by *type* (`html`, `txt`, ...),
    /// matching the `apertium-des<type>`/`apertium-re<type>` program naming
    /// convention; `nosplit` removes the input-side sentence splitter
    /// (modelled as the `apertium-splitmod` convention: the second stage in
    /// a deformat-bracketed chain, or the first stage otherwise, if that
    /// program's name contains "splitmod"). These choices are spawn-time,
    /// not per-request: each distinct combination of options yields a
    /// distinct cached `ParsedMode`.
    pub fn with_options(&self, opts: &ModeOptions) -> Vec<CommandSpec> {
        let mut stages = self.stages.clone();

        if opts.nosplit {
            if let Some(idx) = stages
                .iter()
                .position(|s| s.program.contains("splitmod"))
            {
                stages.remove(idx);
            }
        }

        if let Some(kind) = &opts.deformat {
            if let Some(first) = stages.first() {
                stages.insert(
                    0,
                    CommandSpec::new(formatter_stage("apertium-des", kind), vec![], first.cwd.clone()),
                );
            }
        }

        if let Some(kind) = &opts.reformat {
            if let Some(last) = stages.last() {
                stages.push(CommandSpec::new(formatter_stage("apertium-re", kind), vec![], last.cwd.clone()));
            }
        }

        stages
    }
}

/// Build a formatter program name from a requested type, e.g. `("apertium-des",
/// "html")` -> `"apertium-deshtml"`. A caller that already passed the full
/// program name (it contains `prefix`) is taken as-is.
fn formatter_stage(prefix: &str, kind: &str) -> String {
    if kind.contains(prefix) {
        kind.to_string()
    } else {
        format!("{prefix}{kind}")
    }
}

/// Per-pipeline spawn options. Two requests for the same pair with
/// different options are served by distinct cached pipelines.
/// `deformat`/`reformat` name the formatter *type* to bracket the chain
/// with (`None` means no formatter stage is inserted at all).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ModeOptions {
    pub deformat: Option<String>,
    pub reformat: Option<String>,
    pub nosplit: bool,
}

/// Split a shell-style pipeline on top-level `|` characters, leaving `|`
/// inside single or double quotes untouched.
fn split_pipeline(line: &str) -> Vec<String> {
    let mut commands = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;

    for c in line.chars() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(c);
            }
            '|' if !in_single && !in_double => {
                commands.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        commands.push(current.trim().to_string());
    }
    commands.into_iter().filter(|c| !c.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::write;
    use tempfile::tempdir;

    #[test]
    fn split_pipeline_respects_quoting() {
        let parts = split_pipeline(r#"cat | echo "a|b" | wc -l"#);
        assert_eq!(parts, vec!["cat", r#"echo "a|b""#, "wc -l"]);
    }

    #[test]
    fn parses_single_stage_identity_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idn-idn.mode");
        write(&path, "cat\n").unwrap();

        let parsed = ParsedMode::parse(&path).unwrap();
        assert_eq!(parsed.stages.len(), 1);
        assert_eq!(parsed.stages[0].program, "cat");
    }

    #[test]
    fn parses_multi_stage_chain_with_arguments() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("eng-spa.mode");
        write(&path, "lt-proc %s/eng-spa.automorf.bin | apertium-tagger -g %s/eng-spa.prob\n").unwrap();

        let parsed = ParsedMode::parse(&path).unwrap();
        assert_eq!(parsed.stages.len(), 2);
        assert_eq!(parsed.stages[0].program, "lt-proc");
        assert!(parsed.stages[0].args[0].ends_with("eng-spa.automorf.bin"));
        assert_eq!(parsed.stages[1].program, "apertium-tagger");
    }

    #[test]
    fn missing_mode_file_is_reported_as_not_found() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.mode");
        let err = ParsedMode::parse(&path).unwrap_err();
        assert!(matches!(err, GatewayError::ModeNotFound(_)));
    }

    #[test]
    fn with_options_brackets_deformat_and_reformat_stages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idn-idn.mode");
        write(&path, "cat\n").unwrap();
        let parsed = ParsedMode::parse(&path).unwrap();

        let stages = parsed.with_options(&ModeOptions {
            deformat: Some("html".to_string()),
            reformat: Some("html".to_string()),
            nosplit: false,
        });
        assert_eq!(stages.len(), 3);
        assert_eq!(stages[0].program, "apertium-deshtml");
        assert_eq!(stages[2].program, "apertium-rehtml");
    }

    #[test]
    fn with_options_picks_stage_by_requested_type() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idn-idn.mode");
        write(&path, "cat\n").unwrap();
        let parsed = ParsedMode::parse(&path).unwrap();

        let stages = parsed.with_options(&ModeOptions {
            deformat: Some("txt".to_string()),
            reformat: Some("txt".to_string()),
            nosplit: false,
        });
        assert_eq!(stages[0].program, "apertium-destxt");
        assert_eq!(stages[2].program, "apertium-retxt");
    }

    #[test]
    fn with_options_does_not_double_prefix_a_full_program_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idn-idn.mode");
        write(&path, "cat\n").unwrap();
        let parsed = ParsedMode::parse(&path).unwrap();

        let stages = parsed.with_options(&ModeOptions {
            deformat: Some("apertium-deshtml".to_string()),
            reformat: None,
            nosplit: false,
        });
        assert_eq!(stages[0].program, "apertium-deshtml");
    }

    #[test]
    fn nosplit_removes_splitter_stage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("eng-spa.mode");
        write(&path, "apertium-splitmod | lt-proc foo\n").unwrap();
        let parsed = ParsedMode::parse(&path).unwrap();

        let stages = parsed.with_options(&ModeOptions {
            deformat: None,
            reformat: None,
            nosplit: true,
        });
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].program, "lt-proc");
    }
}
