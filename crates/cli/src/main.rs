use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use helios::commands::{
    export_command, init_workspace_command, list_transformers_command, open_command,
    settings_command, transform_command, TransformArgs,
};
use helios::init_tracing;
use helios_core::model::Capability;

/// Java bytecode workbench CLI.
///
/// This CLI is a thin wrapper around `helios-core` (exposed in code as `helios_core`).
/// All substantive logic lives in the library so it can be tested thoroughly
/// and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "helios",
    version,
    about = "Open class/jar/apk/dex files and run decompilers, disassemblers and converters over them",
    long_about = None
)]
struct Cli {
    /// Log at debug level (overridden by HELIOS_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize a Helios workspace at the given root.
    ///
    /// This will:
    /// - Create a `.helios` metadata directory and an `exports` directory.
    /// - Write a `.helios/config.json` config file.
    /// - Create the `.helios/settings.db` settings database.
    Init {
        /// Workspace root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Optional workspace name. If omitted, the name is derived from the root directory.
        #[arg(long)]
        name: Option<String>,
    },

    /// Open a file and print its entries as a compacted tree.
    Open {
        /// Class, jar, apk, zip or dex file.
        file: PathBuf,

        #[arg(long, default_value = ".")]
        root: String,

        /// Emit JSON instead of human-readable output.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List registered transformers in registration order.
    Transformers {
        /// Only list transformers with this capability (decompiler, disassembler, ...).
        #[arg(long)]
        capability: Option<Capability>,

        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show a transformer's settings, optionally updating some first.
    ///
    /// Settings persist in the workspace database when `--root` is an
    /// initialized workspace.
    Settings {
        /// Transformer id or display name.
        transformer: String,

        /// Store a value, e.g. `--set verbose=false`. May be repeated.
        #[arg(long = "set", value_name = "PARAM=VALUE")]
        assignments: Vec<String>,

        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Run a transformer over one entry of a file and print the result.
    ///
    /// Exits with status 1 when the transformer reports a diagnostic and 130
    /// when the run is aborted.
    Transform {
        /// File to open.
        file: PathBuf,

        /// Entry path inside the file, e.g. `com/example/Foo.class`.
        member: String,

        /// Transformer id or display name. Defaults to the workspace's preferred decompiler.
        #[arg(long = "with")]
        transformer: Option<String>,

        /// Additional files whose entries form the classpath. May be repeated.
        #[arg(long)]
        classpath: Vec<PathBuf>,

        /// Let earlier-opened files shadow the target on the classpath.
        #[arg(long, default_value_t = false)]
        open_order: bool,

        /// Abort the run after this many seconds.
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Write the result to a file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,

        #[arg(long, default_value = ".")]
        root: String,
    },

    /// Run a transformer over every eligible entry and bundle the results into a zip.
    Export {
        /// File to export.
        file: PathBuf,

        /// Transformer id or display name. Defaults to the workspace's preferred decompiler.
        #[arg(long = "with")]
        transformer: Option<String>,

        /// Bundle path. Defaults to `exports/<file>.<transformer>.zip` under the root.
        #[arg(long)]
        out: Option<PathBuf>,

        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Init { root, name } => init_workspace_command(&root, name)?,
        Command::Open { file, root, json } => open_command(&root, &file, json)?,
        Command::Transformers { capability, root, json } => {
            list_transformers_command(&root, capability, json)?
        }
        Command::Settings { transformer, assignments, root, json } => {
            settings_command(&root, &transformer, &assignments, json)?
        }
        Command::Transform { file, member, transformer, classpath, open_order, timeout, out, root } => {
            let status = transform_command(&TransformArgs {
                root,
                file,
                member,
                transformer,
                classpath,
                open_order,
                timeout_secs: timeout,
                out,
            })?;
            if status != 0 {
                std::process::exit(status);
            }
        }
        Command::Export { file, transformer, out, root, json } => {
            export_command(&root, &file, transformer.as_deref(), out, json)?
        }
    }

    Ok(())
}
