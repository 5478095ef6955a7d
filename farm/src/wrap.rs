//! Generation of the self-contained python scripts executed by farm
//! workers.

use crate::pycheck::{self, PyCheckError};
use std::{env, path::Path};

/// Options for wrapping a python payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct WrapOpts<'a> {
    /// Scene to load on startup (headless DCC jobs).
    pub scene: Option<&'a Path>,
    /// Apply maya standalone bootstrapping and maya-style failure exit.
    pub maya: bool,
    /// Log a formatted traceback on error (normally redundant - the
    /// scheduler/shell already prints one).
    pub print_traceback: bool,
}

/// Wrap a python payload with pipeline init and error handling.
///
/// The payload is syntax-checked before wrapping and the generated text is
/// checked again after, so a malformed script fails here rather than on a
/// farm machine. The payload is re-indented by a literal four-space
/// prefix per line; callers must supply consistently-indented code.
pub fn wrap_py(
    py: &str,
    name: &str,
    py_file: &Path,
    opts: &WrapOpts,
) -> Result<String, PyCheckError> {
    pycheck::check(py)?;

    let init_py = env::var("PINI_DEADLINE_INIT_PY").ok();
    let mut lines: Vec<String> = Vec::new();
    let mut add = |text: &str| lines.push(text.to_string());

    // Header
    add("import logging");
    add("import inspect");
    add("import sys");
    add("import traceback");
    add("");
    if opts.maya {
        add("from maya import cmds");
        add("");
    }
    add("_LOGGER = logging.getLogger(\"task\")");
    add("_FILE = inspect.getfile(lambda: None)");
    add("");
    add("");

    // Init pipeline
    add("def _init_pipeline():");
    add("    \"\"\"Set up the pipeline.\"\"\"");
    add("");
    if opts.maya {
        add("    # Initialize maya standalone");
        add("    try:");
        add("        from maya import standalone");
        add("        standalone.initialize()");
        add("    except RuntimeError:");
        add("        pass");
        add("");
    }
    if let Some(init_py) = &init_py {
        add("    # Run $PINI_DEADLINE_INIT_PY code");
        add(&format!("    {}", reindent(init_py, "    ")));
        add("");
    }
    add("    # Setup logging");
    add("    from pini import testing");
    add("    testing.setup_logging()");
    add(&format!(
        "    _LOGGER.info(\"RUNNING {} {}\")",
        name,
        py_file.display()
    ));
    add("    _LOGGER.info(\" - FILE %s\", _FILE)");
    add("");
    if opts.maya {
        if let Some(scene) = opts.scene {
            add("    # Load scene (the scheduler manages this but needed for standalone)");
            add("    from pini import dcc");
            add(&format!(
                "    dcc.load(\"{}\", lazy=True, force=True)",
                scene.display()
            ));
            add("");
        }
    }
    add("");

    // Task payload
    add("def _exec_task():");
    add("    \"\"\"Execute this task.\"\"\"");
    add("");
    add(&format!("    {}", reindent(py, "    ")));
    add("");
    add("");

    // Main
    add("if __name__ == \"__main__\":");
    add("");
    add("    _init_pipeline()");
    add("");
    add("    # Execute task");
    add("    try:");
    add("        _exec_task()");
    add("    except Exception as _exc:");
    add("        _LOGGER.info(\" - ERRORED %s\", _exc)");
    if opts.print_traceback {
        add("        _LOGGER.info(\"TRACEBACK:\\n%s\", traceback.format_exc())");
    }
    if opts.maya {
        // Maya does not propagate a raised exception into an exit code,
        // so force a non-zero quit for farm failure detection
        add("        cmds.quit(exitCode=1, force=True)");
    } else {
        add("        raise _exc");
    }
    add("");
    add("    _LOGGER.info(\"COMPLETE\")");
    add("");

    let wrapped = lines.join("\n");
    pycheck::check(&wrapped)?;
    Ok(wrapped)
}

/// Naive re-indentation: join lines with a fixed indent prefix. Embedded
/// multi-line strings come through verbatim, which python accepts as long
/// as the payload's own indentation is consistent.
fn reindent(py: &str, indent: &str) -> String {
    let sep = format!("\n{indent}");
    py.trim_end().split('\n').collect::<Vec<&str>>().join(&sep)
}

#[cfg(test)]
mod wrap_test {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn wraps_payload_into_task_function() {
        let py_file = PathBuf::from("/tmp/Py_Test.py");
        let wrapped = wrap_py(
            "print('hello')\nprint('world')",
            "test",
            &py_file,
            &WrapOpts::default(),
        )
        .unwrap();
        assert!(wrapped.contains("def _init_pipeline():"));
        assert!(wrapped.contains("def _exec_task():"));
        assert!(wrapped.contains("    print('hello')\n    print('world')"));
        assert!(wrapped.contains("raise _exc"));
        assert!(!wrapped.contains("standalone.initialize"));
    }

    #[test]
    fn maya_mode_forces_exit_code() {
        let py_file = PathBuf::from("/tmp/MayaPy_Test.py");
        let scene = PathBuf::from("/jobs/test/empty.mb");
        let opts = WrapOpts {
            scene: Some(&scene),
            maya: true,
            print_traceback: false,
        };
        let wrapped = wrap_py("print('hi')", "test", &py_file, &opts).unwrap();
        assert!(wrapped.contains("standalone.initialize()"));
        assert!(wrapped.contains("cmds.quit(exitCode=1, force=True)"));
        assert!(wrapped.contains("dcc.load(\"/jobs/test/empty.mb\""));
        assert!(!wrapped.contains("raise _exc"));
    }

    #[test]
    fn bad_payload_fails_before_wrapping() {
        let py_file = PathBuf::from("/tmp/Py_Bad.py");
        assert!(wrap_py("x = 'oops", "bad", &py_file, &WrapOpts::default()).is_err());
        assert!(wrap_py("def f():", "bad", &py_file, &WrapOpts::default()).is_err());
    }
}
