//! Integration tests for errors caught while a flow is being built.

use std::sync::Arc;

use flightdeck_flow::{Arg, Flow, FlowError, OperationError, OperationRegistry, OperationSet, value};

struct Storage;

impl Storage {
    fn create(&self, name: String) -> Result<String, OperationError> {
        Ok(format!("gs://{name}"))
    }

    fn delete(&self, _name: String) -> Result<(), OperationError> {
        Ok(())
    }

    fn tag(&self, _url: String, _tag: String) -> Result<(), OperationError> {
        Ok(())
    }

    fn forgotten(&self, name: String) -> Result<String, OperationError> {
        Ok(name)
    }

    fn orphaned(&self, name: String) -> Result<String, OperationError> {
        Ok(name)
    }

    fn mismatched(&self, name: String, _size: u64) -> Result<String, OperationError> {
        Ok(name)
    }

    fn size(&self) -> Result<u64, OperationError> {
        Ok(10)
    }
}

impl OperationSet for Storage {
    fn register(registry: &mut OperationRegistry<Self>) {
        registry.operation("create", Self::create).undo_with("delete");
        registry.undo("delete", Self::delete);
        registry.operation("tag", Self::tag).no_undo();
        registry.operation("forgotten", Self::forgotten);
        registry.operation("orphaned", Self::orphaned).undo_with("missing");
        registry.operation("mismatched", Self::mismatched).undo_with("delete");
        registry.operation("size", Self::size).no_undo();
    }

    fn set_name() -> &'static str {
        "Storage"
    }
}

struct Broken;

impl Broken {
    fn ping(&self) -> Result<(), OperationError> {
        Ok(())
    }
}

impl OperationSet for Broken {
    fn register(registry: &mut OperationRegistry<Self>) {
        registry.operation("ping", Self::ping).no_undo();
        registry.undo("ping_back", Self::ping);
        registry.undo("ping_back", Self::ping);
    }
}

fn storage() -> Arc<Storage> {
    Arc::new(Storage)
}

#[test]
fn undeclared_compensation_is_rejected() {
    let storage = storage();
    let mut flow = Flow::new("undeclared");

    let err = flow
        .step(&storage)
        .call::<_, String>("forgotten", value("a".to_string()))
        .expect_err("no compensation declared");

    assert_eq!(
        err,
        FlowError::CompensationUndeclared {
            operation: "forgotten".to_string()
        }
    );
    assert!(flow.is_empty());
}

#[test]
fn missing_undo_is_rejected() {
    let storage = storage();
    let mut flow = Flow::new("orphaned");

    let err = flow
        .step(&storage)
        .call::<_, String>("orphaned", value("a".to_string()))
        .expect_err("undo does not exist");

    assert!(matches!(err, FlowError::UndoNotFound { ref undo, .. } if undo == "missing"));
}

#[test]
fn undo_must_take_the_operation_arguments() {
    let storage = storage();
    let mut flow = Flow::new("mismatched");

    let err = flow
        .step(&storage)
        .call::<_, String>("mismatched", (value("a".to_string()), value(3_u64)))
        .expect_err("delete takes one argument");

    assert!(matches!(err, FlowError::UndoSignatureMismatch { ref undo, .. } if undo == "delete"));
}

#[test]
fn argument_types_must_match_the_registration() {
    let storage = storage();
    let mut flow = Flow::new("wrong_args");

    let err = flow
        .step(&storage)
        .call::<_, String>("create", value(42_i64))
        .expect_err("create takes a String");

    assert!(matches!(err, FlowError::SignatureMismatch { ref operation, .. } if operation == "create"));
    assert!(err.to_string().contains("i64"));
}

#[test]
fn output_type_must_match_the_registration() {
    let storage = storage();
    let mut flow = Flow::new("wrong_output");

    let err = flow
        .step(&storage)
        .call::<_, u32>("size", ())
        .expect_err("size returns u64");

    assert!(matches!(err, FlowError::SignatureMismatch { .. }));
}

#[test]
fn unknown_operation_names_the_set() {
    let storage = storage();
    let mut flow = Flow::new("unknown");

    let err = flow
        .step(&storage)
        .call_unit("resize", ())
        .expect_err("no such operation");

    assert_eq!(err.to_string(), "operation set Storage has no operation 'resize'");
}

#[test]
fn unit_and_value_operations_use_their_own_call() {
    let storage = storage();
    let mut flow = Flow::new("calls");

    let unit = flow
        .step(&storage)
        .call::<_, ()>("tag", (value("gs://a".to_string()), value("x".to_string())))
        .expect_err("tag returns nothing");
    let valued = flow
        .step(&storage)
        .call_unit("create", value("a".to_string()))
        .expect_err("create returns a value");

    assert!(matches!(unit, FlowError::UnitOperation { .. }));
    assert!(matches!(valued, FlowError::ValueOperation { .. }));
}

#[test]
fn handle_registers_exactly_one_call() -> anyhow::Result<()> {
    let storage = storage();
    let mut flow = Flow::new("reuse");

    let mut handle = flow.step(&storage);
    handle.call::<_, String>("create", value("a".to_string()))?;
    let err = handle
        .call::<_, String>("create", value("b".to_string()))
        .expect_err("handle already used");

    assert_eq!(
        err,
        FlowError::HandleReused {
            first: "create".to_string(),
            second: "create".to_string()
        }
    );
    assert_eq!(flow.len(), 1);
    Ok(())
}

#[test]
fn tokens_from_another_flow_are_rejected() -> anyhow::Result<()> {
    let storage = storage();
    let mut other = Flow::new("other");
    let foreign = other
        .step(&storage)
        .call::<_, String>("create", value("a".to_string()))?;

    let mut flow = Flow::new("mine");
    flow.step(&storage)
        .call::<_, String>("create", value("b".to_string()))?;

    let as_arg = flow
        .step(&storage)
        .call_unit("tag", (Arg::from(foreign), value("x".to_string())))
        .expect_err("argument is foreign");
    let as_result = flow.set_result(&foreign).expect_err("result is foreign");

    assert_eq!(as_arg, FlowError::ForeignToken { index: 0 });
    assert_eq!(as_result, FlowError::ForeignToken { index: 0 });
    Ok(())
}

#[test]
fn build_reports_the_first_construction_error() -> anyhow::Result<()> {
    let storage = storage();
    let mut flow = Flow::new("first_error");

    flow.step(&storage)
        .call::<_, String>("create", value("a".to_string()))?;
    let _ = flow.step(&storage).call_unit("resize", ());
    let _ = flow
        .step(&storage)
        .call::<_, String>("forgotten", value("b".to_string()));

    let err = flow.build().expect_err("flow has errors");

    assert!(matches!(err, FlowError::OperationNotFound { ref operation, .. } if operation == "resize"));
    Ok(())
}

#[test]
fn empty_flow_cannot_be_built() {
    let err = Flow::new("nothing").build().expect_err("no steps");

    assert_eq!(
        err,
        FlowError::Empty {
            flow: "nothing".to_string()
        }
    );
}

#[test]
fn registry_errors_surface_on_first_use() {
    let broken = Arc::new(Broken);
    let mut flow = Flow::new("broken");

    let err = flow
        .step(&broken)
        .call_unit("ping", ())
        .expect_err("registry has a duplicate undo");

    assert!(matches!(err, FlowError::DuplicateUndo { ref undo, .. } if undo == "ping_back"));
}
