mod common;

use std::fs::File;
use std::io::Read;
use std::sync::Arc;

use helios_core::archive::Workspace;
use helios_core::model::{Capability, TransformOutput, TransformPayload};
use helios_core::services::export::{export_sources, FAILURES_FILE};
use helios_core::services::{
    Backend, BackendError, CancellationToken, Dispatcher, Scheduler, TransformRequest, Transformer,
};
use helios_core::settings::MemoryConfigStore;
use tempfile::tempdir;
use zip::ZipArchive;

use common::{minimal_class, write_jar};

/// Pretends to decompile; refuses classes whose name contains "Broken".
struct FakeDecompiler;

impl Backend for FakeDecompiler {
    fn transform(
        &self,
        request: &TransformRequest<'_>,
        _cancel: &CancellationToken,
    ) -> Result<TransformOutput, BackendError> {
        if request.name.contains("Broken") {
            return Ok(TransformOutput::default().with_transcript("", "unsupported construct"));
        }
        let source = format!("class {} {{}}\n", request.name.replace('/', "."));
        Ok(TransformOutput::single(request.name, TransformPayload::Text(source)))
    }
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> String {
    let mut text = String::new();
    archive.by_name(name).expect(name).read_to_string(&mut text).unwrap();
    text
}

#[test]
fn export_bundles_sources_and_lists_failures() {
    let dir = tempdir().unwrap();
    let a = minimal_class("com/x/A");
    let b = minimal_class("com/x/sub/B");
    let broken = minimal_class("com/x/Broken");
    let jar = write_jar(
        dir.path(),
        "app.jar",
        &[
            ("com/x/A.class", &a),
            ("com/x/sub/B.class", &b),
            ("com/x/Broken.class", &broken),
            ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n"),
        ],
    );

    let workspace = Arc::new(Workspace::new());
    let artifact = workspace.open(&jar).unwrap();
    let dispatcher = Dispatcher::new(workspace, Scheduler::new(), Arc::new(MemoryConfigStore::new()));
    let fake = Arc::new(Transformer::new("fake", "Fake", Capability::Decompiler, FakeDecompiler).unwrap());
    let out = dir.path().join("exports").join("app.jar.fake.zip");

    let report = export_sources(&dispatcher, &artifact, &fake, &out).expect("export");

    assert_eq!(report.skipped, 1);
    assert_eq!(report.written.len(), 2);
    assert_eq!(report.written["com/x/A.class"], "com/x/A.java");
    assert!(report.failures.contains_key("com/x/Broken.class"));
    assert!(report.aborted.is_empty());

    let mut archive = ZipArchive::new(File::open(&out).unwrap()).unwrap();
    assert_eq!(archive.len(), 3);
    assert_eq!(read_entry(&mut archive, "com/x/sub/B.java"), "class com.x.sub.B {}\n");
    let failures = read_entry(&mut archive, FAILURES_FILE);
    assert!(failures.starts_with("== com/x/Broken.class\nFake produced no output for com/x/Broken"));
    assert!(failures.contains("unsupported construct"));
}

#[test]
fn clean_exports_have_no_failures_file() {
    let dir = tempdir().unwrap();
    let a = minimal_class("A");
    let jar = write_jar(dir.path(), "one.jar", &[("A.class", &a)]);

    let workspace = Arc::new(Workspace::new());
    let artifact = workspace.open(&jar).unwrap();
    let dispatcher = Dispatcher::new(workspace, Scheduler::new(), Arc::new(MemoryConfigStore::new()));
    let fake = Arc::new(Transformer::new("fake", "Fake", Capability::Decompiler, FakeDecompiler).unwrap());
    let out = dir.path().join("one.zip");

    let report = export_sources(&dispatcher, &artifact, &fake, &out).unwrap();
    assert!(report.failures.is_empty());

    let mut archive = ZipArchive::new(File::open(&out).unwrap()).unwrap();
    assert_eq!(archive.len(), 1);
    assert!(archive.by_name(FAILURES_FILE).is_err());
    assert_eq!(read_entry(&mut archive, "A.java"), "class A {}\n");
}
