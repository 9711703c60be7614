//! C8: the Error object family — the concrete client that exercises both
//! the shape DAG (C7) and, via its `ManagedVtable`, the GC's header
//! contract (C4). Grounded on `original_source/qv4errorobject.cpp`, which
//! spec.md's §4.8 distills; the exact property-install order below
//! (`stack` first, then `message` only if provided, then `name`, then
//! `fileName`/`lineNumber` from frame 0 only if any frame exists) and the
//! explicit-location constructor's "prepend a synthetic frame before
//! reading frame 0" behavior both come from reading that source, since
//! spec.md's prose alone leaves the ordering ambiguous.

use crate::address::HeapPtr;
use crate::heap::collector::Tracer;
use crate::heap::header::ManagedVtable;
use crate::shape::identifier::IdentifierTable;
use crate::shape::internal_class::{InternalClass, PropertyAttributes};
use crate::vm::StackFrame;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ErrorKind {
    Error,
    EvalError,
    RangeError,
    ReferenceError,
    SyntaxError,
    TypeError,
    UriError,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::Error,
        ErrorKind::EvalError,
        ErrorKind::RangeError,
        ErrorKind::ReferenceError,
        ErrorKind::SyntaxError,
        ErrorKind::TypeError,
        ErrorKind::UriError,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::EvalError => "EvalError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::UriError => "URIError",
        }
    }
}

static ERROR_VTABLE: ManagedVtable = ManagedVtable {
    name: "Error",
    mark: error_object_mark,
    destroy: None,
};

/// `vtable.markObjects`: marks whatever outgoing managed references the
/// object holds. This substrate's `ErrorObject` keeps its captured stack
/// as a plain (non-managed) `Rc<String>` rather than a GC'd string value
/// — see DESIGN.md — so there is nothing beyond the header to forward
/// here; the hook exists to satisfy the vtable contract (spec §6) and is
/// where a full value representation would mark the cached stack value.
unsafe fn error_object_mark(_ptr: HeapPtr<()>, _tracer: &mut Tracer) {}

/// Per-kind shape roots and prototypes. One instance lives on the engine
/// (spec §4.8: "Each has its own shape root and prototype object").
pub struct ErrorShapes {
    empty: [InternalClass; 7],
}

impl ErrorShapes {
    pub fn new() -> ErrorShapes {
        let make = || InternalClass::empty(&ERROR_VTABLE);
        ErrorShapes {
            empty: [
                make(),
                make(),
                make(),
                make(),
                make(),
                make(),
                make(),
            ],
        }
    }

    fn empty_for(&self, kind: ErrorKind) -> &InternalClass {
        &self.empty[kind as usize]
    }
}

impl Default for ErrorShapes {
    fn default() -> Self {
        ErrorShapes::new()
    }
}

/// An instance of the Error family (spec §4.8). Not itself placed behind
/// a `HeapPtr` by this crate's tests — see DESIGN.md for the scope note
/// — but built entirely through the C7 shape API and the `stack`/
/// `toString` algorithms exactly as specified.
pub struct ErrorObject {
    pub kind: ErrorKind,
    pub shape: InternalClass,
    name: Option<String>,
    message: Option<String>,
    file_name: Option<String>,
    line_number: Option<i32>,
    frames: Vec<StackFrame>,
    cached_stack: RefCell<Option<Rc<String>>>,
}

impl ErrorObject {
    /// `message = None` models "no argument or argument is undefined"
    /// (spec §4.8: "if a message argument is provided and not
    /// undefined, install data property message"). `explicit_location`
    /// models the constructor overload that takes an explicit
    /// fileName/line/column: that frame is prepended to the stack trace
    /// *before* fileName/lineNumber are derived from "frame 0", so it
    /// wins over whatever the engine's real call stack would have
    /// supplied (a detail only visible by reading `qv4errorobject.cpp`
    /// directly).
    pub fn new(
        kind: ErrorKind,
        shapes: &ErrorShapes,
        ids: &mut IdentifierTable,
        message: Option<String>,
        mut frames: Vec<StackFrame>,
        explicit_location: Option<(String, i32, i32)>,
    ) -> ErrorObject {
        if let Some((file, line, column)) = explicit_location {
            frames.insert(0, StackFrame::new("", file, line, column));
        }

        let mut shape = shapes.empty_for(kind).clone();

        // `stack` is always installed first, as an accessor.
        shape = shape.add_member(ids.identifier("stack"), PropertyAttributes::accessor(false, true));

        if message.is_some() {
            shape = shape.add_member(ids.identifier("message"), PropertyAttributes::data(true, false, true));
        }

        shape = shape.add_member(ids.identifier("name"), PropertyAttributes::data(true, false, true));

        let (file_name, line_number) = if let Some(frame0) = frames.first() {
            shape = shape.add_member(ids.identifier("fileName"), PropertyAttributes::data(true, false, true));
            shape = shape.add_member(ids.identifier("lineNumber"), PropertyAttributes::data(true, false, true));
            (Some(frame0.source.clone()), Some(frame0.line))
        } else {
            (None, None)
        };

        ErrorObject {
            kind,
            shape,
            name: Some(kind.display_name().to_string()),
            message,
            file_name,
            line_number,
            frames,
            cached_stack: RefCell::new(None),
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn line_number(&self) -> Option<i32> {
        self.line_number
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    pub fn set_message(&mut self, message: Option<String>) {
        self.message = message;
    }

    /// The `stack` getter: lazily joins frames with `\n`, each formatted
    /// `function@source[:line]` (omitting `:line` when `line < 0`, per
    /// spec §4.8), and caches the result on the instance.
    pub fn stack(&self) -> Rc<String> {
        if let Some(cached) = self.cached_stack.borrow().clone() {
            return cached;
        }
        let text = self
            .frames
            .iter()
            .map(|f| {
                if f.line >= 0 {
                    format!("{}@{}:{}", f.function, f.source, f.line)
                } else {
                    format!("{}@{}", f.function, f.source)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        let rc = Rc::new(text);
        *self.cached_stack.borrow_mut() = Some(rc.clone());
        rc
    }

    pub fn to_string_value(&self) -> String {
        to_string_value(self.name.as_deref(), self.message.as_deref())
    }
}

/// `Error.prototype.toString` (spec §4.8): `name` falls back to
/// `"Error"` when absent; `message` falls back to empty. Returns `name`
/// alone if `message` is empty, `message` alone if `name` is empty, and
/// `"name: message"` otherwise.
pub fn to_string_value(name: Option<&str>, message: Option<&str>) -> String {
    let name = name.unwrap_or("Error");
    let message = message.unwrap_or("");
    if name.is_empty() {
        message.to_string()
    } else if message.is_empty() {
        name.to_string()
    } else {
        format!("{name}: {message}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_formats_frames_with_line_numbers() {
        let mut ids = IdentifierTable::new();
        let shapes = ErrorShapes::new();
        let frames = vec![
            StackFrame::new("f", "a.js", 3, 0),
            StackFrame::new("g", "b.js", 7, 0),
        ];
        let err = ErrorObject::new(ErrorKind::Error, &shapes, &mut ids, None, frames, None);
        assert_eq!(*err.stack(), "f@a.js:3\ng@b.js:7");
    }

    #[test]
    fn stack_omits_line_when_negative() {
        let mut ids = IdentifierTable::new();
        let shapes = ErrorShapes::new();
        let frames = vec![StackFrame::new("f", "a.js", -1, 0)];
        let err = ErrorObject::new(ErrorKind::Error, &shapes, &mut ids, None, frames, None);
        assert_eq!(*err.stack(), "f@a.js");
    }

    #[test]
    fn to_string_combines_name_and_message() {
        assert_eq!(to_string_value(Some("TypeError"), Some("bad")), "TypeError: bad");
        assert_eq!(to_string_value(Some(""), Some("bad")), "bad");
        assert_eq!(to_string_value(Some("TypeError"), Some("")), "TypeError");
        assert_eq!(to_string_value(None, None), "Error");
    }

    #[test]
    fn construction_installs_filename_and_line_from_frame_zero() {
        let mut ids = IdentifierTable::new();
        let shapes = ErrorShapes::new();
        let frames = vec![StackFrame::new("f", "a.js", 3, 0)];
        let err = ErrorObject::new(
            ErrorKind::TypeError,
            &shapes,
            &mut ids,
            Some("bad".to_string()),
            frames,
            None,
        );
        assert_eq!(err.file_name(), Some("a.js"));
        assert_eq!(err.line_number(), Some(3));
        // stack (accessor, 2 slots), message, name, fileName, lineNumber
        assert_eq!(err.shape.size(), 6);
    }

    #[test]
    fn explicit_location_is_prepended_before_deriving_frame_zero() {
        let mut ids = IdentifierTable::new();
        let shapes = ErrorShapes::new();
        let frames = vec![StackFrame::new("caller", "real.js", 10, 0)];
        let err = ErrorObject::new(
            ErrorKind::Error,
            &shapes,
            &mut ids,
            None,
            frames,
            Some(("synthetic.js".to_string(), 99, 0)),
        );
        assert_eq!(err.file_name(), Some("synthetic.js"));
        assert_eq!(err.line_number(), Some(99));
    }

    #[test]
    fn absent_message_skips_message_property() {
        let mut ids = IdentifierTable::new();
        let shapes = ErrorShapes::new();
        let err = ErrorObject::new(ErrorKind::Error, &shapes, &mut ids, None, Vec::new(), None);
        // stack (accessor, 2 slots) + name only: no message, no
        // fileName/lineNumber (no frames)
        assert_eq!(err.shape.size(), 3);
    }
}
