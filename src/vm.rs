//! The seam between this substrate and the rest of the engine.
//!
//! Everything outside the GC and the shape DAG — the interpreter, the
//! parser, QML bindings — is out of scope (spec §1). This module holds
//! only the handful of types the in-scope subsystems need to talk about
//! that outside world: a captured stack frame (consumed by [`crate::errors`])
//! and the [`crate::heap::collector::VmBinding`] trait an embedder
//! implements to supply intrinsic GC roots.

/// One frame of a captured JS call stack (spec §4.8).
#[derive(Clone, Debug)]
pub struct StackFrame {
    pub function: String,
    pub source: String,
    /// Negative means "unknown"; the `stack` getter omits `:line` in that
    /// case (spec §4.8 `stack` getter: "`function@source[:line]`").
    pub line: i32,
    pub column: i32,
}

impl StackFrame {
    pub fn new(function: impl Into<String>, source: impl Into<String>, line: i32, column: i32) -> StackFrame {
        StackFrame {
            function: function.into(),
            source: source.into(),
            line,
            column,
        }
    }
}

/// Anything that can answer "what does the current call stack look
/// like", used by [`crate::errors::ErrorObject::new`] to capture a trace
/// at construction time.
pub trait StackTraceSource {
    fn stack_trace(&self) -> Vec<StackFrame>;
}
