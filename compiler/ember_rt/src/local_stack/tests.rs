use super::*;
use pretty_assertions::assert_eq;

fn var(n: u32) -> VarId {
    VarId::new(n)
}

#[test]
fn instantiate_and_read() {
    let mut stack = LocalVariableStack::with_block_size(4);
    let slot = stack.instantiate(var(1), Value::Int(5));
    assert_eq!(stack.get(slot), Some(&Value::Int(5)));
    assert_eq!(stack.depth(), 1);
}

#[test]
fn set_returns_previous() {
    let mut stack = LocalVariableStack::with_block_size(4);
    let slot = stack.instantiate(var(1), Value::Int(5));
    assert_eq!(stack.set(slot, Value::Int(6)), Some(Value::Int(5)));
    assert_eq!(stack.get(slot), Some(&Value::Int(6)));
}

#[test]
fn find_prefers_innermost() {
    let mut stack = LocalVariableStack::with_block_size(2);
    let outer = stack.instantiate(var(1), Value::Int(1));
    stack.instantiate(var(2), Value::Int(2));
    let inner = stack.instantiate(var(1), Value::Int(3));
    assert_eq!(stack.find(var(1)), Some(inner));
    stack.uninstantiate(inner);
    assert_eq!(stack.find(var(1)), Some(outer));
    assert_eq!(stack.find(var(9)), None);
}

#[test]
fn skipped_slots_are_invisible() {
    let mut stack = LocalVariableStack::with_block_size(4);
    let outer = stack.instantiate(var(1), Value::Int(1));
    let inner = stack.instantiate(var(1), Value::Int(2));
    stack.set_skip(inner, true);
    assert_eq!(stack.find(var(1)), Some(outer));
    stack.set_skip(inner, false);
    assert_eq!(stack.find(var(1)), Some(inner));
}

#[test]
fn uninstantiate_returns_slot() {
    let mut stack = LocalVariableStack::with_block_size(4);
    let slot = stack.instantiate(var(3), Value::string("x"));
    let popped = stack.uninstantiate(slot).unwrap();
    assert_eq!(popped.id(), var(3));
    assert!(!popped.is_skipped());
    assert_eq!(popped.into_value(), Value::string("x"));
    assert!(stack.is_empty());
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "LIFO")]
fn out_of_order_release_asserts() {
    let mut stack = LocalVariableStack::with_block_size(4);
    let first = stack.instantiate(var(1), Value::Nothing);
    stack.instantiate(var(2), Value::Nothing);
    stack.uninstantiate(first);
}

#[test]
fn nested_scopes_restore_block_count() {
    let mut stack = LocalVariableStack::with_block_size(8);
    let initial = stack.block_count();
    let mut slots = Vec::new();
    for i in 0..10_000 {
        slots.push(stack.instantiate(var(i), Value::Int(i64::from(i))));
    }
    assert!(stack.block_count() > initial);
    while let Some(slot) = slots.pop() {
        stack.uninstantiate(slot);
    }
    assert_eq!(stack.block_count(), initial);
    assert_eq!(stack.depth(), 0);
}
