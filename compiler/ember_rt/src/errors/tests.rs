use super::*;
use pretty_assertions::assert_eq;

#[test]
fn factory_message_matches_kind() {
    let err = object_already_deleted("Socket", "connect");
    assert_eq!(err.message, err.kind.to_string());
    assert_eq!(
        err.message,
        "object already deleted: cannot access connect of class Socket"
    );
    assert!(err.is_object_deleted());
}

#[test]
fn double_delete_names_class() {
    let err = double_delete("File");
    assert_eq!(
        err.kind,
        RuntimeErrorKind::DoubleDelete {
            class: "File".to_string()
        }
    );
    assert!(!err.is_object_deleted());
}

#[test]
fn custom_error_uses_message() {
    let err = RuntimeError::new("socket closed");
    assert_eq!(err.to_string(), "socket closed");
    assert_eq!(
        err.kind,
        RuntimeErrorKind::Custom {
            message: "socket closed".to_string()
        }
    );
}

#[test]
fn display_includes_backtrace() {
    let err = call_depth_exceeded(3).with_backtrace(vec![CallRecord {
        function: "f".to_string(),
        line: 4,
        endline: 6,
        file: "main.em".to_string(),
        kind: crate::CallKind::User,
    }]);
    assert_eq!(
        err.to_string(),
        "maximum call depth exceeded (limit: 3)\n  0: f at main.em:4"
    );
}

#[test]
fn sink_accumulates_in_order() {
    let mut sink = ErrorSink::new();
    assert!(sink.is_empty());
    sink.raise(RuntimeError::new("first"));
    assert_eq!(sink.absorb::<()>(Err(RuntimeError::new("second"))), None);
    assert_eq!(sink.absorb(Ok(7)), Some(7));
    assert_eq!(sink.len(), 2);
    let messages: Vec<_> = sink.errors().iter().map(|e| e.message.clone()).collect();
    assert_eq!(messages, vec!["first".to_string(), "second".to_string()]);
}

#[test]
fn sink_into_result_reports_first() {
    let mut sink = ErrorSink::new();
    sink.raise(RuntimeError::new("first"));
    sink.raise(RuntimeError::new("second"));
    let err = sink.into_result().unwrap_err();
    assert_eq!(err.message, "first");
    assert!(ErrorSink::new().into_result().is_ok());
}

#[test]
fn sink_take_drains() {
    let mut sink = ErrorSink::new();
    sink.raise(double_delete("A"));
    assert_eq!(sink.take().len(), 1);
    assert!(sink.is_empty());
}
