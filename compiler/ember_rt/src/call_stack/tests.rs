use super::*;
use crate::errors::RuntimeErrorKind;
use pretty_assertions::assert_eq;

fn node(name: &str, line: u32) -> CallNode {
    CallNode::new(name, CallKind::User, SourceLocation::new("main.em", line, line + 1))
}

#[test]
fn guard_pops_its_frame() {
    let registry = CallStackRegistry::new();
    let stack = registry.register(ThreadId::new(1), None);
    {
        let _outer = stack.push(node("outer", 1)).unwrap();
        {
            let _inner = stack.push(node("inner", 2)).unwrap();
            assert_eq!(stack.depth(), 2);
            assert_eq!(stack.current().map(|n| n.name.to_string()), Some("inner".to_string()));
        }
        assert_eq!(stack.depth(), 1);
    }
    assert_eq!(stack.depth(), 0);
    assert!(stack.current().is_none());
}

#[test]
fn call_stack_walks_tail_to_head() {
    let registry = CallStackRegistry::new();
    let stack = registry.register(ThreadId::new(1), None);
    let _a = stack.push(node("main", 1)).unwrap();
    let _b = stack.push(node("helper", 10)).unwrap();
    let names: Vec<_> = stack
        .get_call_stack()
        .into_iter()
        .map(|r| r.function)
        .collect();
    assert_eq!(names, vec!["helper".to_string(), "main".to_string()]);
}

#[test]
fn depth_limit_rejects_push() {
    let registry = CallStackRegistry::new();
    let stack = registry.register(ThreadId::new(1), Some(2));
    let _a = stack.push(node("a", 1)).unwrap();
    let _b = stack.push(node("b", 2)).unwrap();
    let err = stack.push(node("c", 3)).unwrap_err();
    assert_eq!(err.kind, RuntimeErrorKind::StackOverflow { depth: 2 });
    assert_eq!(err.backtrace.as_ref().map(Vec::len), Some(2));
    assert_eq!(stack.depth(), 2);
}

#[test]
fn snapshot_covers_every_registered_thread() {
    let registry = CallStackRegistry::new();
    let first = registry.register(ThreadId::new(1), None);
    let second = registry.register(ThreadId::new(2), None);
    let _f = first.push(node("run", 4)).unwrap();
    let _s = second
        .push(CallNode::new("<thread>", CallKind::NewThread, SourceLocation::native()))
        .unwrap();

    let snapshot = registry.snapshot_all_stacks();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(
        snapshot[&ThreadId::new(1)],
        vec![CallRecord {
            function: "run".to_string(),
            line: 4,
            endline: 5,
            file: "main.em".to_string(),
            kind: CallKind::User,
        }]
    );
    assert_eq!(snapshot[&ThreadId::new(2)][0].kind, CallKind::NewThread);

    second.unregister();
    assert_eq!(registry.thread_count(), 1);
}

#[test]
fn records_serialize_with_host_field_names() {
    let record = CallRecord {
        function: "spawn".to_string(),
        line: 1,
        endline: 2,
        file: "a.em".to_string(),
        kind: CallKind::NewThread,
    };
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "function": "spawn",
            "line": 1,
            "endline": 2,
            "file": "a.em",
            "type": "new-thread",
        })
    );
    assert_eq!(
        serde_json::to_value(CallKind::Builtin).unwrap(),
        serde_json::json!("builtin")
    );
}

#[test]
fn concurrent_pushes_and_snapshots() {
    let registry = CallStackRegistry::new();
    let stacks: Vec<_> = (1..=4)
        .map(|n| registry.register(ThreadId::new(n), None))
        .collect();
    std::thread::scope(|scope| {
        for stack in &stacks {
            scope.spawn(move || {
                for i in 0..200 {
                    let _frame = stack.push(node("work", i)).unwrap();
                    let _nested = stack.push(node("leaf", i)).unwrap();
                }
            });
        }
        for _ in 0..50 {
            for records in registry.snapshot_all_stacks().values() {
                assert!(records.len() <= 2);
            }
        }
    });
    assert!(stacks.iter().all(|s| s.depth() == 0));
}
