use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::classfile;
use crate::model::{Capability, TransformOutput, TransformPayload};
use crate::process::ProcessLauncher;
use crate::services::registry::{default_validation, dex_validation, Backend, BackendError, TransformRequest};
use crate::services::scheduler::CancellationToken;
use crate::settings::BackendSettings;

/// Where an external tool leaves its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOutput {
    /// The result is whatever the tool prints.
    Stdout,
    /// The tool writes files below `{outdir}`.
    OutDir,
}

/// What an external tool accepts as input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Validated per capability (class files for decompilers/disassemblers).
    ByCapability,
    Dex,
}

/// Command template for one external tool.
///
/// Arguments may contain the placeholders `{input}`, `{outdir}` and
/// `{classpath}`; an argument that is exactly `{settings}` expands to the
/// resolved settings' arguments.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    output: ToolOutput,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>, output: ToolOutput) -> Self {
        Self { program: program.into(), args: Vec::new(), working_dir: None, output }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn output(&self) -> ToolOutput {
        self.output
    }

    fn needs_classpath(&self) -> bool {
        self.args.iter().any(|a| a.contains("{classpath}"))
    }

    fn expand(&self, input: &Path, outdir: &Path, classpath: &Path, settings: &BackendSettings) -> Vec<OsString> {
        let mut argv = Vec::with_capacity(self.args.len() + settings.args().len());
        for arg in &self.args {
            if arg == "{settings}" {
                argv.extend(settings.args().iter().map(OsString::from));
                continue;
            }
            let expanded = arg
                .replace("{input}", &input.to_string_lossy())
                .replace("{outdir}", &outdir.to_string_lossy())
                .replace("{classpath}", &classpath.to_string_lossy());
            argv.push(OsString::from(expanded));
        }
        argv
    }
}

/// Backend that runs an external tool through the [`ProcessLauncher`].
///
/// Cancelling the task destroys the tool's process.
#[derive(Debug, Clone)]
pub struct ExternalToolBackend {
    tool: String,
    command: Option<ToolCommand>,
    hint: String,
    input: InputKind,
    defaults: Vec<String>,
    launcher: ProcessLauncher,
}

impl ExternalToolBackend {
    pub fn new(tool: impl Into<String>, command: ToolCommand, launcher: ProcessLauncher) -> Self {
        Self {
            tool: tool.into(),
            command: Some(command),
            hint: String::new(),
            input: InputKind::ByCapability,
            defaults: Vec::new(),
            launcher,
        }
    }

    /// A backend whose tool is not installed; every invocation explains how to configure it.
    pub fn unconfigured(tool: impl Into<String>, hint: impl Into<String>, launcher: ProcessLauncher) -> Self {
        Self {
            tool: tool.into(),
            command: None,
            hint: hint.into(),
            input: InputKind::ByCapability,
            defaults: Vec::new(),
            launcher,
        }
    }

    pub fn with_input(mut self, input: InputKind) -> Self {
        self.input = input;
        self
    }

    /// Arguments present before any setting is applied.
    pub fn with_default_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.defaults = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.command.is_some()
    }
}

impl Backend for ExternalToolBackend {
    fn default_settings(&self) -> BackendSettings {
        BackendSettings::with_args(self.defaults.iter().cloned())
    }

    fn accepts(&self, capability: Capability, input: &[u8]) -> Result<(), String> {
        match self.input {
            InputKind::ByCapability => default_validation(capability, input),
            InputKind::Dex => dex_validation(capability, input),
        }
    }

    fn transform(
        &self,
        request: &TransformRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<TransformOutput, BackendError> {
        let command = self.command.as_ref().ok_or_else(|| BackendError::ToolNotConfigured {
            tool: self.tool.clone(),
            hint: self.hint.clone(),
        })?;

        let scratch = tempfile::Builder::new().prefix("helios-").tempdir()?;
        let input_dir = scratch.path().join("in");
        let outdir = scratch.path().join("out");
        let classpath_dir = scratch.path().join("cp");
        fs::create_dir_all(&input_dir)?;
        fs::create_dir_all(&outdir)?;

        let input = input_dir.join(input_file_name(request.member));
        fs::write(&input, request.input)?;
        if command.needs_classpath() {
            materialize_classpath(&classpath_dir, request)?;
        }
        let argv = command.expand(&input, &outdir, &classpath_dir, request.settings);

        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        let handle = self.launcher.launch(&command.program, &argv, command.working_dir.as_deref())?;
        let killer = handle.killer();
        cancel.on_cancel(move || killer.destroy());
        tracing::debug!(tool = %self.tool, pid = handle.pid(), member = %request.member, "running external tool");

        let result = self.launcher.read_all(handle);
        if cancel.is_cancelled() || result.destroyed {
            return Err(BackendError::Cancelled);
        }

        let stdout = result.stdout_lossy();
        let stderr = result.stderr_lossy();
        if !result.success() {
            tracing::debug!(tool = %self.tool, code = ?result.exit_code, "external tool failed");
            let mut stderr = stderr;
            stderr.push_str(&format!("\n{} exited with {}", self.tool, exit_description(result.exit_code)));
            return Ok(TransformOutput::default().with_transcript(stdout, stderr));
        }

        let success = match command.output {
            ToolOutput::Stdout if stdout.trim().is_empty() => BTreeMap::new(),
            ToolOutput::Stdout => {
                let mut map = BTreeMap::new();
                map.insert(request.name.to_string(), TransformPayload::Text(stdout.clone()));
                map
            }
            ToolOutput::OutDir => collect_outputs(&outdir, request.name)?,
        };
        Ok(TransformOutput { success, stdout, stderr })
    }
}

fn exit_description(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

fn input_file_name(member: &str) -> String {
    member
        .rsplit('/')
        .find(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .unwrap_or("input")
        .to_string()
}

/// Canonical name -> relative path, rejecting names that would escape the root.
fn safe_relative(name: &str) -> Option<PathBuf> {
    let path = Path::new(name);
    if path.components().all(|c| matches!(c, Component::Normal(_))) {
        Some(path.to_path_buf())
    } else {
        None
    }
}

fn materialize_classpath(root: &Path, request: &TransformRequest<'_>) -> io::Result<()> {
    fs::create_dir_all(root)?;
    for (name, bytes) in request.classpath.iter() {
        if !classfile::has_class_magic(bytes) {
            continue;
        }
        let Some(relative) = safe_relative(name) else {
            tracing::debug!(entry = %name, "skipping classpath entry with unsafe name");
            continue;
        };
        let target = root.join(relative).with_extension("class");
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, bytes)?;
    }
    Ok(())
}

fn walk(dir: &Path, root: &Path, out: &mut Vec<(String, Vec<u8>)>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk(&path, root, out)?;
        } else {
            let relative = path.strip_prefix(root).unwrap_or(path.as_path());
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            out.push((key, fs::read(&path)?));
        }
    }
    Ok(())
}

fn payload(bytes: Vec<u8>) -> TransformPayload {
    match String::from_utf8(bytes) {
        Ok(text) => TransformPayload::Text(text),
        Err(e) => TransformPayload::Bytes(e.into_bytes()),
    }
}

fn strip_extension(path: &str) -> &str {
    let file_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[file_start..].rfind('.') {
        Some(dot) if dot > 0 => &path[..file_start + dot],
        _ => path,
    }
}

/// Gather the files a tool wrote below `outdir`, keyed so `name` is found when possible.
///
/// A single file is keyed by `name`. Several files are keyed by their path
/// without extension; if none of them matches `name` and all are text, they
/// are concatenated under `name`.
fn collect_outputs(outdir: &Path, name: &str) -> io::Result<BTreeMap<String, TransformPayload>> {
    let mut files = Vec::new();
    walk(outdir, outdir, &mut files)?;
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut success = BTreeMap::new();
    if files.len() == 1 {
        if let Some((_, bytes)) = files.pop() {
            success.insert(name.to_string(), payload(bytes));
        }
        return Ok(success);
    }

    let by_path: Vec<(String, TransformPayload)> =
        files.into_iter().map(|(path, bytes)| (path, payload(bytes))).collect();
    if by_path.iter().any(|(path, _)| strip_extension(path) == name)
        || by_path.iter().any(|(_, p)| matches!(p, TransformPayload::Bytes(_)))
    {
        for (path, payload) in by_path {
            success.insert(strip_extension(&path).to_string(), payload);
        }
        return Ok(success);
    }

    if !by_path.is_empty() {
        let mut combined = String::new();
        for (path, payload) in &by_path {
            combined.push_str(&format!("// ---- {path} ----\n"));
            combined.push_str(&payload.to_display_string());
            if !combined.ends_with('\n') {
                combined.push('\n');
            }
        }
        success.insert(name.to_string(), TransformPayload::Text(combined));
    }
    Ok(success)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_expand_and_settings_splice() {
        let command = ToolCommand::new("java", ToolOutput::Stdout)
            .args(["-jar", "cfr.jar", "{input}", "--extraclasspath", "{classpath}", "{settings}"]);
        let mut settings = BackendSettings::new();
        settings.push_arg("--decodeenumswitch");
        settings.push_arg("true");
        let argv = command.expand(Path::new("/w/in/A.class"), Path::new("/w/out"), Path::new("/w/cp"), &settings);
        let argv: Vec<String> = argv.into_iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            argv,
            vec!["-jar", "cfr.jar", "/w/in/A.class", "--extraclasspath", "/w/cp", "--decodeenumswitch", "true"]
        );
        assert!(command.needs_classpath());
    }

    #[test]
    fn input_names_come_from_the_last_segment() {
        assert_eq!(input_file_name("com/x/A.class"), "A.class");
        assert_eq!(input_file_name("dir/"), "dir");
        assert_eq!(input_file_name(""), "input");
        assert!(safe_relative("com/x/A").is_some());
        assert!(safe_relative("../evil").is_none());
        assert!(safe_relative("/abs").is_none());
    }

    #[test]
    fn outputs_are_keyed_for_the_requested_member() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("com/x")).unwrap();
        fs::write(dir.path().join("com/x/A.java"), "class A {}").unwrap();
        fs::write(dir.path().join("com/x/A$1.java"), "class A$1 {}").unwrap();
        let map = collect_outputs(dir.path(), "com/x/A").unwrap();
        assert_eq!(map["com/x/A"], TransformPayload::Text("class A {}".into()));
        assert!(map.contains_key("com/x/A$1"));

        let single = tempfile::tempdir().unwrap();
        fs::write(single.path().join("out.jar"), [0xff, 0x00]).unwrap();
        let map = collect_outputs(single.path(), "classes.dex").unwrap();
        assert_eq!(map["classes.dex"], TransformPayload::Bytes(vec![0xff, 0x00]));
    }

    #[test]
    fn unrelated_text_outputs_are_combined() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.smali"), ".class La;\n").unwrap();
        fs::write(dir.path().join("b.smali"), ".class Lb;\n").unwrap();
        let map = collect_outputs(dir.path(), "classes.dex").unwrap();
        let TransformPayload::Text(text) = &map["classes.dex"] else { panic!("expected text") };
        assert!(text.contains("// ---- a.smali ----\n.class La;"));
        assert!(text.contains("// ---- b.smali ----\n.class Lb;"));
    }

    #[test]
    fn unconfigured_tools_explain_themselves() {
        let backend = ExternalToolBackend::unconfigured("CFR", "HELIOS_CFR_JAR", ProcessLauncher::new());
        let classpath = Default::default();
        let settings = BackendSettings::new();
        let request = TransformRequest {
            name: "A",
            member: "A.class",
            input: b"",
            classpath: &classpath,
            settings: &settings,
        };
        let err = backend.transform(&request, &CancellationToken::new()).unwrap_err();
        assert_eq!(err.to_string(), "CFR is not configured (set HELIOS_CFR_JAR)");
    }

    #[cfg(unix)]
    #[test]
    fn stdout_tools_produce_text_and_failures_keep_transcripts() {
        let launcher = ProcessLauncher::new();
        let ok = ExternalToolBackend::new(
            "fake",
            ToolCommand::new("/bin/sh", ToolOutput::Stdout).args(["-c", "echo decompiled $0", "{input}"]),
            launcher.clone(),
        );
        let classpath = Default::default();
        let settings = BackendSettings::new();
        let request = TransformRequest {
            name: "com/x/A",
            member: "com/x/A.class",
            input: b"\xCA\xFE\xBA\xBE",
            classpath: &classpath,
            settings: &settings,
        };
        let output = ok.transform(&request, &CancellationToken::new()).unwrap();
        let TransformPayload::Text(text) = &output.success["com/x/A"] else { panic!("expected text") };
        assert!(text.starts_with("decompiled "));
        assert!(text.trim_end().ends_with("A.class"));

        let failing = ExternalToolBackend::new(
            "fake",
            ToolCommand::new("/bin/sh", ToolOutput::Stdout).args(["-c", "echo partial; echo broken >&2; exit 3"]),
            launcher,
        );
        let output = failing.transform(&request, &CancellationToken::new()).unwrap();
        assert!(output.success.is_empty());
        assert_eq!(output.stdout.trim(), "partial");
        assert!(output.stderr.contains("broken"));
        assert!(output.stderr.contains("fake exited with status 3"));
    }

    #[cfg(unix)]
    #[test]
    fn cancelling_destroys_the_tool() {
        use std::sync::Arc;
        use std::time::Duration;

        let launcher = ProcessLauncher::new();
        let backend = Arc::new(ExternalToolBackend::new(
            "sleepy",
            ToolCommand::new("/bin/sh", ToolOutput::Stdout).args(["-c", "exec sleep 30"]),
            launcher.clone(),
        ));
        let token = CancellationToken::new();
        let worker_token = token.clone();
        let worker = std::thread::spawn(move || {
            let classpath = Default::default();
            let settings = BackendSettings::new();
            let request = TransformRequest {
                name: "A",
                member: "A",
                input: b"x",
                classpath: &classpath,
                settings: &settings,
            };
            backend.transform(&request, &worker_token)
        });
        while launcher.tracked_count() == 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
        token.cancel();
        assert!(matches!(worker.join().unwrap(), Err(BackendError::Cancelled)));
    }
}
