//! Built-in transformation backends.
//!
//! Most of them drive an external tool through [`ExternalToolBackend`]; the
//! hex viewer runs in-process. [`default_registry`] registers all of them in
//! a fixed order so "first available" choices are stable across runs.

mod external;
pub mod hex;

pub use external::{ExternalToolBackend, InputKind, ToolCommand, ToolOutput};
pub use hex::HexViewer;

use std::path::{Path, PathBuf};

use crate::db::{self, ToolPaths};
use crate::model::Capability;
use crate::process::ProcessLauncher;
use crate::services::registry::{RegistryError, Transformer, TransformerRegistry};
use crate::settings::{Setting, SettingValue, TriState};

/// Boolean setting that adds `flag` when enabled.
pub fn switch(param: &str, desc: &str, default: bool, flag: &str) -> Setting {
    let flag = flag.to_string();
    Setting::boolean(param, desc, default).with_apply(move |settings, value| {
        if *value == SettingValue::Bool(true) {
            settings.push_arg(flag.clone());
        }
    })
}

/// Free-form arguments appended after every other setting's flags.
pub fn extra_args() -> Setting {
    Setting::text("~extra-args", "Additional command-line arguments", "").with_apply(|settings, value| {
        if let SettingValue::Text(text) = value {
            for arg in text.split_whitespace() {
                settings.push_arg(arg);
            }
        }
    })
}

fn api_level(desc: &str) -> Setting {
    Setting::integer("api-level", desc, 15, 1, 34, 1).as_flag("--api")
}

/// External tool backend, or an unconfigured stand-in when the tool's path is missing.
fn tool(
    launcher: &ProcessLauncher,
    name: &str,
    location: Option<&PathBuf>,
    env: &str,
    build: impl FnOnce(&Path) -> ToolCommand,
) -> ExternalToolBackend {
    match location {
        Some(path) => ExternalToolBackend::new(name, build(path), launcher.clone()),
        None => ExternalToolBackend::unconfigured(name, env, launcher.clone()),
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Registry with every built-in transformer.
pub fn default_registry(tools: &ToolPaths, launcher: &ProcessLauncher) -> Result<TransformerRegistry, RegistryError> {
    let java = tools.java_or_default();
    let python = tools.python_or_default();
    let mut registry = TransformerRegistry::new();

    let cfr = tool(launcher, "CFR", tools.cfr_jar.as_ref(), db::ENV_CFR_JAR, |jar| {
        ToolCommand::new(&java, ToolOutput::Stdout)
            .args(["-jar".to_string(), display(jar)])
            .args(["{input}", "--extraclasspath", "{classpath}", "{settings}"])
    });
    registry.register(Transformer::new("cfr", "CFR", Capability::Decompiler, cfr)?.with_settings([
        Setting::boolean("decodeenumswitch", "Decode enum switches", true).as_flag("--decodeenumswitch"),
        Setting::boolean("decodestringswitch", "Decode string switches", true).as_flag("--decodestringswitch"),
        Setting::boolean("sugarasserts", "Re-sugar assert calls", true).as_flag("--sugarasserts"),
        Setting::boolean("hidebridgemethods", "Hide bridge methods", true).as_flag("--hidebridgemethods"),
        Setting::boolean("showversion", "Show the CFR version banner", false).as_flag("--showversion"),
        Setting::tri_state("removeinnerclasssynthetics", "Remove inner class synthetics", TriState::Default)
            .as_flag("--removeinnerclasssynthetics"),
        extra_args(),
    ])?)?;

    let procyon = tool(launcher, "Procyon", tools.procyon_jar.as_ref(), db::ENV_PROCYON_JAR, |jar| {
        ToolCommand::new(&java, ToolOutput::Stdout)
            .args(["-jar".to_string(), display(jar)])
            .args(["{settings}", "{input}"])
    });
    registry.register(Transformer::new("procyon", "Procyon", Capability::Decompiler, procyon)?.with_settings([
        switch("show-synthetic", "Show synthetic members", false, "--show-synthetic"),
        switch("unicode", "Emit unicode characters unescaped", false, "--unicode"),
        switch("exclude-nested", "Exclude nested types", false, "--exclude-nested"),
        extra_args(),
    ])?)?;

    let krakatau_decompiler = tool(launcher, "Krakatau", tools.krakatau_dir.as_ref(), db::ENV_KRAKATAU_DIR, |dir| {
        ToolCommand::new(&python, ToolOutput::OutDir)
            .arg(display(&dir.join("decompile.py")))
            .args(["-skip", "-nauto", "-path", "{classpath}", "-out", "{outdir}", "{settings}", "{input}"])
            .working_dir(dir)
    });
    registry.register(
        Transformer::new("krakatau-decompiler", "Krakatau Decompiler", Capability::Decompiler, krakatau_decompiler)?
            .with_settings([switch("magic-throw", "Assume any method may throw", false, "-xmagicthrow"), extra_args()])?,
    )?;

    let javap = ExternalToolBackend::new(
        "javap",
        ToolCommand::new(tools.javap_or_default(), ToolOutput::Stdout).args(["{settings}", "{input}"]),
        launcher.clone(),
    );
    registry.register(Transformer::new("javap", "javap", Capability::Disassembler, javap)?.with_settings([
        switch("verbose", "Print constant pool and stack maps", true, "-v"),
        switch("private", "Show all members", true, "-p"),
        switch("line-numbers", "Print line and local variable tables", false, "-l"),
        switch("constants", "Show final constants", false, "-constants"),
        extra_args(),
    ])?)?;

    let krakatau_disassembler = tool(launcher, "Krakatau", tools.krakatau_dir.as_ref(), db::ENV_KRAKATAU_DIR, |dir| {
        ToolCommand::new(&python, ToolOutput::OutDir)
            .arg(display(&dir.join("disassemble.py")))
            .args(["-out", "{outdir}", "{settings}", "{input}"])
            .working_dir(dir)
    });
    registry.register(
        Transformer::new(
            "krakatau-disassembler",
            "Krakatau Disassembler",
            Capability::Disassembler,
            krakatau_disassembler,
        )?
        .with_settings([switch("roundtrip", "Emit round-trippable output", false, "-roundtrip"), extra_args()])?,
    )?;

    let baksmali = tool(launcher, "Baksmali", tools.baksmali_jar.as_ref(), db::ENV_BAKSMALI_JAR, |jar| {
        ToolCommand::new(&java, ToolOutput::OutDir)
            .args(["-jar".to_string(), display(jar)])
            .args(["d", "{input}", "-o", "{outdir}", "{settings}"])
    })
    .with_input(InputKind::Dex);
    registry.register(Transformer::new("baksmali", "Baksmali", Capability::Disassembler, baksmali)?.with_settings([
        api_level("Android API level of the dex file"),
        switch("code-offsets", "Annotate instructions with code offsets", false, "--code-offsets"),
        Setting::tri_state("debug-info", "Emit debug directives", TriState::Default).with_apply(|settings, value| {
            if *value == SettingValue::Tri(TriState::Off) {
                settings.push_arg("--debug-info");
                settings.push_arg("false");
            }
        }),
        extra_args(),
    ])?)?;

    let krakatau_assembler = tool(launcher, "Krakatau", tools.krakatau_dir.as_ref(), db::ENV_KRAKATAU_DIR, |dir| {
        ToolCommand::new(&python, ToolOutput::OutDir)
            .arg(display(&dir.join("assemble.py")))
            .args(["-out", "{outdir}", "{settings}", "{input}"])
            .working_dir(dir)
    });
    registry.register(
        Transformer::new("krakatau-assembler", "Krakatau Assembler", Capability::Assembler, krakatau_assembler)?
            .with_settings([extra_args()])?,
    )?;

    let smali = tool(launcher, "Smali", tools.smali_jar.as_ref(), db::ENV_SMALI_JAR, |jar| {
        ToolCommand::new(&java, ToolOutput::OutDir)
            .args(["-jar".to_string(), display(jar)])
            .args(["a", "{input}", "-o", "{outdir}/classes.dex", "{settings}"])
    });
    registry.register(
        Transformer::new("smali", "Smali", Capability::Assembler, smali)?
            .with_settings([api_level("Android API level to target"), extra_args()])?,
    )?;

    let dex2jar = tool(launcher, "dex2jar", tools.dex2jar_dir.as_ref(), db::ENV_DEX2JAR_DIR, |dir| {
        ToolCommand::new(dir.join("d2j-dex2jar.sh"), ToolOutput::OutDir)
            .args(["{input}", "-o", "{outdir}/converted.jar", "--force", "{settings}"])
    })
    .with_input(InputKind::Dex);
    registry.register(Transformer::new("dex2jar", "dex2jar", Capability::Converter, dex2jar)?.with_settings([
        switch("skip-exceptions", "Skip methods that fail to convert", false, "--skip-exceptions"),
        extra_args(),
    ])?)?;

    let enjarify = tool(launcher, "Enjarify", tools.enjarify_dir.as_ref(), db::ENV_ENJARIFY_DIR, |dir| {
        ToolCommand::new(&python, ToolOutput::OutDir)
            .args(["-O", "-m", "enjarify.main", "{input}", "-o", "{outdir}/converted.jar", "-f", "{settings}"])
            .working_dir(dir)
    })
    .with_input(InputKind::Dex);
    registry.register(
        Transformer::new("enjarify", "Enjarify", Capability::Converter, enjarify)?
            .with_settings([switch("fast", "Skip optimizations", false, "--fast"), extra_args()])?,
    )?;

    registry.register(Transformer::new("hex", "Hex Viewer", Capability::Viewer, HexViewer)?.with_settings([
        Setting::integer(hex::BYTES_PER_ROW, "Bytes shown per row", 16, 4, 64, 4),
        Setting::boolean(hex::SHOW_ASCII, "Show the ASCII column", true),
        Setting::boolean(hex::UPPERCASE, "Use uppercase hex digits", false),
    ])?)?;

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{BackendSettings, MemoryConfigStore};

    #[test]
    fn builtins_register_in_a_fixed_order() {
        let registry = default_registry(&ToolPaths::default(), &ProcessLauncher::new()).unwrap();
        let ids: Vec<&str> = registry.all(|_| true).map(|t| t.id()).collect();
        assert_eq!(
            ids,
            vec![
                "cfr",
                "procyon",
                "krakatau-decompiler",
                "javap",
                "krakatau-disassembler",
                "baksmali",
                "krakatau-assembler",
                "smali",
                "dex2jar",
                "enjarify",
                "hex"
            ]
        );
        assert_eq!(registry.first(Capability::Decompiler).map(|t| t.id()), Some("cfr"));
    }

    #[test]
    fn extra_args_apply_after_flags() {
        let registry = default_registry(&ToolPaths::default(), &ProcessLauncher::new()).unwrap();
        let javap = registry.get_by_id("javap").unwrap();
        let store = MemoryConfigStore::new();
        javap.settings().update(javap.id(), "~extra-args", "-c -s", &store).unwrap();
        let resolved = javap.settings().resolve(javap.id(), BackendSettings::new(), &store).unwrap();
        assert_eq!(resolved.args(), &["-p", "-v", "-c", "-s"]);
    }
}
