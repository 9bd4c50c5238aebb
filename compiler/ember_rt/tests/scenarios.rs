//! Cross-thread scenarios for the runtime core.
//!
//! Each test drives real OS threads through a fixed choreography with
//! crossbeam channels, so the interleaving being checked is the one named
//! in the test rather than whatever the scheduler picks.

#![allow(clippy::unwrap_used, clippy::expect_used, reason = "Tests can panic")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::channel::{bounded, unbounded};
use pretty_assertions::assert_eq;

use ember_rt::{
    CallKind, Class, ClassId, ClosureTemplate, Object, ObjectStatus, PrivateDataHooks, Program,
    Runtime, RuntimeErrorKind, SourceLocation, Value, VarId,
};

fn counted_class(id: u32, name: &str, destructed: &Arc<AtomicUsize>) -> Arc<Class> {
    let destructed = Arc::clone(destructed);
    Arc::new(Class::new(ClassId::new(id), name).with_destructor(move |_, _| {
        destructed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }))
}

// Delete vs dispatch

#[test]
fn delete_lands_inside_running_dispatch() {
    let runtime = Runtime::default();
    let destructed = Arc::new(AtomicUsize::new(0));
    let obj = Object::new(counted_class(1, "Session", &destructed), None);
    let shared = Arc::clone(obj.as_arc());
    let (entered_tx, entered_rx) = bounded::<()>(0);
    let (deleted_tx, deleted_rx) = bounded::<()>(0);

    std::thread::scope(|scope| {
        let dispatcher = scope.spawn(|| {
            let mut ctx = runtime.attach_thread("dispatcher");
            let this = Arc::clone(&shared);
            shared.dispatch(&mut ctx, "touch", SourceLocation::native(), |ctx| {
                this.set_member(ctx, "hits", Value::Int(1))?;
                entered_tx.send(()).unwrap();
                deleted_rx.recv().unwrap();
                this.set_member(ctx, "hits", Value::Int(2))
            })
        });

        let deleter = scope.spawn(|| {
            let mut ctx = runtime.attach_thread("deleter");
            entered_rx.recv().unwrap();
            let result = shared.delete(&mut ctx);
            deleted_tx.send(()).unwrap();
            result
        });

        assert!(deleter.join().unwrap().is_ok());
        let err = dispatcher.join().unwrap().unwrap_err();
        assert_eq!(
            err.kind,
            RuntimeErrorKind::ObjectAlreadyDeleted {
                class: "Session".to_string(),
                member: "hits".to_string(),
            }
        );
    });

    assert_eq!(destructed.load(Ordering::SeqCst), 1);
    assert_eq!(shared.status(), ObjectStatus::Destroyed);
    // The lock is free again: accessors answer instead of blocking.
    assert!(shared.member_names().unwrap_err().is_object_deleted());
    drop(obj);
}

#[test]
fn racing_delete_and_dispatch_never_wedge() {
    let runtime = Runtime::default();
    for round in 0..50 {
        let destructed = Arc::new(AtomicUsize::new(0));
        let obj = Object::new(counted_class(1, "Target", &destructed), None);
        let shared = Arc::clone(obj.as_arc());
        let (go_tx, go_rx) = unbounded::<()>();

        std::thread::scope(|scope| {
            let dispatcher = scope.spawn(|| {
                let mut ctx = runtime.attach_thread("dispatcher");
                go_rx.recv().unwrap();
                let this = Arc::clone(&shared);
                shared.dispatch(&mut ctx, "poke", SourceLocation::native(), |ctx| {
                    this.set_member(ctx, "round", Value::Int(round))
                })
            });
            let deleter = scope.spawn(|| {
                let mut ctx = runtime.attach_thread("deleter");
                go_tx.send(()).unwrap();
                shared.delete(&mut ctx)
            });

            assert!(deleter.join().unwrap().is_ok());
            match dispatcher.join().unwrap() {
                Ok(_) => {}
                Err(err) => assert!(err.is_object_deleted(), "unexpected error: {err}"),
            }
        });

        assert_eq!(destructed.load(Ordering::SeqCst), 1);
        assert_eq!(shared.status(), ObjectStatus::Destroyed);
    }
    assert!(runtime.live_threads().is_empty());
}

// Closures across threads

#[test]
fn closure_created_on_one_thread_runs_on_another() {
    let runtime = Runtime::default();
    let program = Program::new("main");
    let x = VarId::new(1);
    let (closure_tx, closure_rx) = bounded(1);

    let creator = runtime
        .spawn("creator", Some(Arc::clone(&program)), move |ctx| {
            let slot = ctx.instantiate_closure_var(x, Value::Int(5));
            let template = ClosureTemplate::new(
                "getX",
                [x],
                SourceLocation::new("main.em", 2, 4),
                move |ctx, _| ctx.closure_var(x),
            );
            let closure = ctx.create_closure(&template)?;
            ctx.uninstantiate_closure_var(slot);
            assert!(ctx.closures().is_empty());
            closure_tx.send(closure).unwrap();
            Ok(())
        })
        .unwrap();
    let created = creator.join().unwrap();
    assert!(created.result.is_ok());
    assert!(created.errors.is_empty());

    let closure = closure_rx.recv().unwrap();
    let invoker = runtime
        .spawn("invoker", None, move |ctx| closure.call(ctx, &[]))
        .unwrap();
    assert_eq!(invoker.join().unwrap().result.unwrap(), Value::Int(5));
}

#[test]
fn captured_slot_freed_with_last_environment_on_other_thread() {
    let runtime = Runtime::default();
    let program = Program::new("main");
    let destructed = Arc::new(AtomicUsize::new(0));
    let held = VarId::new(3);
    let mut ctx = runtime.attach_thread("main");

    let slot = ctx.instantiate_closure_var(
        held,
        Value::from(Object::new(counted_class(2, "Resource", &destructed), None)),
    );
    let template = ClosureTemplate::new("keep", [held], SourceLocation::native(), move |ctx, _| {
        ctx.closure_var(held)
    });
    let closure = ctx
        .with_program(program, |ctx| ctx.create_closure(&template))
        .unwrap();
    ctx.uninstantiate_closure_var(slot);
    assert_eq!(destructed.load(Ordering::SeqCst), 0);

    let releaser = runtime
        .spawn("releaser", None, move |ctx| {
            Value::closure(closure).release(ctx);
            Ok(())
        })
        .unwrap();
    let exit = releaser.join().unwrap();
    assert!(exit.result.is_ok());
    assert!(exit.errors.is_empty());
    assert_eq!(destructed.load(Ordering::SeqCst), 1);
    assert!(ctx.finish().is_empty());
}

// Scope depth

#[test]
fn ten_thousand_nested_scopes_leave_block_count_unchanged() {
    let runtime = Runtime::default();
    let mut ctx = runtime.attach_thread("main");
    let before = ctx.locals().block_count();

    let slots: Vec<_> = (0..10_000u32)
        .map(|n| ctx.instantiate_local(VarId::new(n), Value::Int(i64::from(n))))
        .collect();
    assert!(ctx.locals().block_count() > before);
    assert_eq!(ctx.locals().depth(), 10_000);

    for slot in slots.into_iter().rev() {
        ctx.uninstantiate_local(slot);
    }
    assert_eq!(ctx.locals().block_count(), before);
    assert!(ctx.locals().is_empty());
}

// Private data

#[test]
fn concurrent_private_data_reads_on_different_keys() {
    let runtime = Runtime::default();
    let socket = Arc::new(Class::new(ClassId::new(1), "Socket"));
    let stream = Arc::new(Class::new(ClassId::new(2), "Stream").with_parent(Arc::clone(&socket)));
    let obj = Object::new(Arc::clone(&stream), None);
    obj.set_private(&socket, Arc::new(String::from("fd:7")), PrivateDataHooks::default())
        .unwrap();
    obj.set_private(&stream, Arc::new(4096usize), PrivateDataHooks::default())
        .unwrap();
    let shared = Arc::clone(obj.as_arc());

    std::thread::scope(|scope| {
        let sockets = scope.spawn(|| {
            let _ctx = runtime.attach_thread("socket-reader");
            (0..1_000)
                .map(|_| shared.get_referenced_private_data_as::<String>(socket.id()))
                .filter(|r| matches!(r, Ok(Some(s)) if s.as_str() == "fd:7"))
                .count()
        });
        let streams = scope.spawn(|| {
            let _ctx = runtime.attach_thread("stream-reader");
            (0..1_000)
                .map(|_| shared.get_referenced_private_data_as::<usize>(stream.id()))
                .filter(|r| matches!(r, Ok(Some(n)) if **n == 4096))
                .count()
        });
        assert_eq!(sockets.join().unwrap(), 1_000);
        assert_eq!(streams.join().unwrap(), 1_000);
    });
    assert_eq!(obj.private_data_keys(), vec![socket.id(), stream.id()]);
}

// Program teardown

#[test]
fn teardown_breaks_object_closure_program_loop() {
    let runtime = Runtime::default();
    let mut ctx = runtime.attach_thread("main");
    let program = Program::new("main");
    let widget = Object::new(Arc::new(Class::new(ClassId::new(1), "Widget")), Some(&program));
    let this = Arc::clone(widget.as_arc());

    let template = ClosureTemplate::new("onClick", [], SourceLocation::native(), |_, _| {
        Ok(Value::Nothing)
    });
    let handler = ctx
        .with_self(Arc::clone(&this), |ctx| ctx.create_closure(&template))
        .unwrap();
    let plain = ctx
        .with_program(Arc::clone(&program), |ctx| ctx.create_closure(&template))
        .unwrap();
    this.set_member(&ctx, "onClick", Value::closure(Arc::clone(&handler)))
        .unwrap();
    this.set_member(&ctx, "fallback", Value::closure(Arc::clone(&plain)))
        .unwrap();
    assert_eq!(Arc::strong_count(&program), 3);

    // The widget and the plain closure each held one program reference; the
    // bound handler only forwards to the widget.
    assert_eq!(program.teardown(), 2);
    assert_eq!(Arc::strong_count(&program), 1);
    assert!(handler.is_cycle_broken());
    assert!(plain.is_cycle_broken());
    assert_eq!(program.teardown(), 0);

    widget.release(&mut ctx).unwrap();
    assert_eq!(this.status(), ObjectStatus::Destroyed);
}

// Introspection

#[test]
fn snapshot_reports_every_live_thread() {
    ember_rt::init_tracing();
    let runtime = Runtime::default();
    let (ready_tx, ready_rx) = bounded::<()>(0);
    let (done_tx, done_rx) = bounded::<()>(0);

    let worker = runtime
        .spawn("worker", None, move |ctx| {
            let _frame = ctx.push_call(
                "poll",
                CallKind::Builtin,
                None,
                SourceLocation::new("net.em", 30, 30),
            )?;
            ready_tx.send(()).unwrap();
            done_rx.recv().unwrap();
            Ok(())
        })
        .unwrap();

    let main = runtime.attach_thread("main");
    let _main_frame = main
        .push_call("main", CallKind::User, None, SourceLocation::new("main.em", 1, 40))
        .unwrap();
    ready_rx.recv().unwrap();

    let snapshot = runtime.snapshot_all_stacks();
    assert_eq!(snapshot.len(), 2);
    let json = serde_json::to_value(&snapshot[&main.id()]).unwrap();
    assert_eq!(
        json,
        serde_json::json!([
            { "function": "main", "line": 1, "endline": 40, "file": "main.em", "type": "user" }
        ])
    );
    let worker_chain = snapshot
        .iter()
        .find(|(id, _)| **id != main.id())
        .map(|(_, chain)| chain.clone())
        .unwrap();
    let kinds: Vec<_> = worker_chain.iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![CallKind::Builtin, CallKind::NewThread]);

    done_tx.send(()).unwrap();
    assert!(worker.join().unwrap().result.is_ok());
}
