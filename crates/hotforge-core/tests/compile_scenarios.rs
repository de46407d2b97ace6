//! End-to-end compilation scenarios against the real host toolchain.
//!
//! These tests exercise the full facade: batch submission, diagnostic
//! collection, artifact persistence and loader swaps.

use hotforge_core::{
    CompilationBatch, CompilationUnit, CompileMode, CompilerConfig, Error, ScriptCompiler,
    Severity, SymbolHandle,
};

const COUNTER_V1: &str = r#"
#[no_mangle]
pub extern "C" fn current() -> i32 { 1 }
"#;

const COUNTER_V2: &str = r#"
#[no_mangle]
pub extern "C" fn current() -> i32 { 2 }
"#;

const BROKEN: &str = "pub fn fine() {}\npub fn broken() -> undefined_symbol {}";

fn compiler_in(temp: &tempfile::TempDir) -> ScriptCompiler {
    let config = CompilerConfig {
        build_dir: temp.path().join("build"),
        modules_dir: temp.path().join("modules"),
        ..CompilerConfig::development()
    };
    ScriptCompiler::new(config).expect("host toolchain should be available")
}

fn call_i32(handle: &SymbolHandle, name: &str) -> i32 {
    unsafe {
        handle
            .get::<unsafe extern "C" fn() -> i32>(name)
            .expect("exported function")()
    }
}

#[test]
fn production_compile_resolves_and_runs() {
    let temp = tempfile::TempDir::new().unwrap();
    let compiler = compiler_in(&temp);

    let (handle, diagnostics) = compiler
        .compile_single("scripts.counter", COUNTER_V1, CompileMode::Production)
        .unwrap();

    assert!(diagnostics.is_empty());
    assert_eq!(call_i32(&handle, "current"), 1);

    // Resolvable again through the production loader.
    let resolved = compiler.resolve("scripts.counter").unwrap();
    assert_eq!(call_i32(&resolved, "current"), 1);
}

#[test]
fn failed_compile_reports_diagnostics_and_loads_nothing() {
    let temp = tempfile::TempDir::new().unwrap();
    let compiler = compiler_in(&temp);

    let err = compiler
        .compile_single("scripts.broken", BROKEN, CompileMode::Production)
        .unwrap_err();

    match err {
        Error::Compilation { symbols, diagnostics } => {
            assert_eq!(symbols, vec!["scripts.broken".to_string()]);
            // Positions point into the submitted source, not the wrapped
            // text handed to the compiler.
            assert!(diagnostics.iter().any(|d| {
                d.severity == Severity::Error
                    && d.message.contains("undefined_symbol")
                    && d.position.is_some_and(|p| p.line == 2)
            }));
        }
        other => panic!("expected Compilation error, got {other:?}"),
    }

    // Nothing became resolvable and nothing was persisted.
    assert!(matches!(
        compiler.resolve("scripts.broken"),
        Err(Error::NotFound(_))
    ));
    assert_eq!(
        std::fs::read_dir(temp.path().join("modules")).unwrap().count(),
        0
    );
}

#[test]
fn batch_failure_is_all_or_nothing() {
    let temp = tempfile::TempDir::new().unwrap();
    let compiler = compiler_in(&temp);

    let batch = CompilationBatch::new(CompileMode::Production)
        .with_unit(CompilationUnit::new("scripts.good", COUNTER_V1))
        .with_unit(CompilationUnit::new("scripts.bad", BROKEN));

    assert!(matches!(
        compiler.compile(batch),
        Err(Error::Compilation { .. })
    ));

    // The good unit compiled before the bad one failed; it must still not
    // be visible anywhere.
    assert!(matches!(
        compiler.resolve("scripts.good"),
        Err(Error::NotFound(_))
    ));
    assert_eq!(
        std::fs::read_dir(temp.path().join("modules")).unwrap().count(),
        0
    );
}

#[test]
fn recompile_swaps_production_atomically() {
    let temp = tempfile::TempDir::new().unwrap();
    let compiler = compiler_in(&temp);

    let (v1, _) = compiler
        .compile_single("scripts.counter", COUNTER_V1, CompileMode::Production)
        .unwrap();
    assert_eq!(call_i32(&v1, "current"), 1);

    let (v2, _) = compiler
        .compile_single("scripts.counter", COUNTER_V2, CompileMode::Production)
        .unwrap();
    assert_eq!(call_i32(&v2, "current"), 2);

    // New resolutions observe the replacement.
    let resolved = compiler.resolve("scripts.counter").unwrap();
    assert_eq!(call_i32(&resolved, "current"), 2);

    // The handle taken before the swap keeps its own library alive.
    assert_eq!(call_i32(&v1, "current"), 1);
}

#[test]
fn test_compile_leaves_no_trace() {
    let temp = tempfile::TempDir::new().unwrap();
    let compiler = compiler_in(&temp);

    let (handle, diagnostics) = compiler
        .compile_single("scripts.probe", COUNTER_V1, CompileMode::Test)
        .unwrap();

    assert!(diagnostics.is_empty());
    // The handle stays usable even though its loader is already gone.
    assert_eq!(call_i32(&handle, "current"), 1);

    // Never published to the production loader or the modules directory.
    assert!(matches!(
        compiler.resolve("scripts.probe"),
        Err(Error::NotFound(_))
    ));
    assert_eq!(
        std::fs::read_dir(temp.path().join("modules")).unwrap().count(),
        0
    );
    // Batch scratch is cleaned up as well.
    assert_eq!(
        std::fs::read_dir(temp.path().join("build")).unwrap().count(),
        0
    );
}

#[test]
fn warnings_survive_successful_compile() {
    let temp = tempfile::TempDir::new().unwrap();
    let compiler = compiler_in(&temp);

    let noisy = r#"
#[no_mangle]
pub extern "C" fn noisy() -> i32 { let x = 1; 2 }
"#;
    let (handle, diagnostics) = compiler
        .compile_single("scripts.noisy", noisy, CompileMode::Test)
        .unwrap();

    assert_eq!(call_i32(&handle, "noisy"), 2);
    assert!(diagnostics
        .iter()
        .any(|d| d.severity == Severity::Warning && d.message.contains("unused")));
}

#[test]
fn capability_requirement_met_by_export() {
    let temp = tempfile::TempDir::new().unwrap();
    let compiler = compiler_in(&temp);

    let batch = CompilationBatch::new(CompileMode::Test)
        .with_unit(CompilationUnit::new("scripts.task", COUNTER_V1))
        .require_capability("scripts.task", "current");

    let outcome = compiler.compile(batch).unwrap();
    let handle = &outcome.handles["scripts.task"];
    assert!(handle.has_capability("current"));
    assert!(!handle.has_capability("shutdown"));
}

#[test]
fn unmet_capability_fails_the_batch() {
    let temp = tempfile::TempDir::new().unwrap();
    let compiler = compiler_in(&temp);

    let batch = CompilationBatch::new(CompileMode::Test)
        .with_unit(CompilationUnit::new("scripts.task", COUNTER_V1))
        .require_capability("scripts.task", "shutdown");

    match compiler.compile(batch) {
        Err(Error::CapabilityMismatch { symbol, capability }) => {
            assert_eq!(symbol, "scripts.task");
            assert_eq!(capability, "shutdown");
        }
        other => panic!("expected CapabilityMismatch, got {other:?}"),
    }
}

#[test]
fn dependency_chain_symbols_are_not_capabilities() {
    let temp = tempfile::TempDir::new().unwrap();
    let compiler = compiler_in(&temp);

    let (handle, _) = compiler
        .compile_single("scripts.task", COUNTER_V1, CompileMode::Test)
        .unwrap();

    assert!(handle.has_capability("current"));
    // Resolvable through the module's dependency chain (libc), but not
    // exported by the module itself.
    assert!(!handle.has_capability("shutdown"));
    assert!(!handle.has_capability("malloc"));
}

#[test]
fn capability_mismatch_keeps_prior_production_loader() {
    let temp = tempfile::TempDir::new().unwrap();
    let compiler = compiler_in(&temp);

    compiler
        .compile_single("scripts.counter", COUNTER_V1, CompileMode::Production)
        .unwrap();
    // Materialize through the active loader before the failing attempt.
    let before = compiler.resolve("scripts.counter").unwrap();
    assert_eq!(call_i32(&before, "current"), 1);

    let batch = CompilationBatch::new(CompileMode::Production)
        .with_unit(CompilationUnit::new("scripts.counter", COUNTER_V2))
        .require_capability("scripts.counter", "shutdown");
    assert!(matches!(
        compiler.compile(batch),
        Err(Error::CapabilityMismatch { .. })
    ));

    // The verified-but-rejected replacement was never swapped in.
    let after = compiler.resolve("scripts.counter").unwrap();
    assert_eq!(call_i32(&after, "current"), 1);
}

#[test]
fn rejected_batch_preserves_persisted_artifact() {
    let temp = tempfile::TempDir::new().unwrap();

    {
        let compiler = compiler_in(&temp);
        compiler
            .compile_single("scripts.counter", COUNTER_V1, CompileMode::Production)
            .unwrap();

        let batch = CompilationBatch::new(CompileMode::Production)
            .with_unit(CompilationUnit::new("scripts.counter", COUNTER_V2))
            .require_capability("scripts.counter", "shutdown");
        assert!(matches!(
            compiler.compile(batch),
            Err(Error::CapabilityMismatch { .. })
        ));
    }

    // A restarted process re-indexes from disk; it must serve the version
    // that passed verification, not the rejected one.
    let compiler = compiler_in(&temp);
    let handle = compiler.resolve("scripts.counter").unwrap();
    assert_eq!(call_i32(&handle, "current"), 1);
}

#[test]
fn multi_unit_batch_with_cross_reference() {
    let temp = tempfile::TempDir::new().unwrap();
    let compiler = compiler_in(&temp);

    let batch = CompilationBatch::new(CompileMode::Production)
        .with_unit(CompilationUnit::new(
            "scripts.base",
            "pub fn seven() -> i32 { 7 }",
        ))
        .with_unit(CompilationUnit::new(
            "scripts.user",
            r#"
extern crate scripts_base;

#[no_mangle]
pub extern "C" fn fourteen() -> i32 { scripts_base::seven() * 2 }
"#,
        ));

    let outcome = compiler.compile(batch).unwrap();
    assert_eq!(outcome.handles.len(), 2);
    assert_eq!(call_i32(&outcome.handles["scripts.user"], "fourteen"), 14);
}
