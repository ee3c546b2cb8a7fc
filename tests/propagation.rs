//! End-to-end propagation scenarios against the in-memory pool.

use std::thread;

use txscope::config::ManagerConfig;
use txscope::resource::{ConnectionPool, ResourceEvent};
use txscope::transaction::{
    Failure, FailureKind, Propagation, TemplateError, TransactionAttribute, TransactionDefinition,
    TransactionError, TransactionManager, TransactionTemplate,
};

fn setup() -> (ConnectionPool, TransactionManager) {
    let pool = ConnectionPool::new(4);
    let manager = TransactionManager::new(pool.clone());
    (pool, manager)
}

#[derive(Debug)]
struct InventoryError;

impl Failure for InventoryError {
    fn kind(&self) -> FailureKind {
        FailureKind::Unchecked
    }
}

#[derive(Debug)]
struct PaymentDeclined;

impl Failure for PaymentDeclined {
    fn kind(&self) -> FailureKind {
        FailureKind::Checked
    }
}

// ==================== Basic scopes ====================

#[test]
fn commit() {
    let (pool, manager) = setup();
    let mut ctx = manager.new_context();

    let mut status = manager.begin(&mut ctx, Propagation::Required).unwrap();
    manager.commit(&mut ctx, &mut status).unwrap();

    assert_eq!(pool.commit_count(), 1);
    assert_eq!(pool.rollback_count(), 0);
    assert_eq!(pool.in_use(), 0);
}

#[test]
fn rollback() {
    let (pool, manager) = setup();
    let mut ctx = manager.new_context();

    let mut status = manager.begin(&mut ctx, Propagation::Required).unwrap();
    manager.rollback(&mut ctx, &mut status).unwrap();

    assert_eq!(pool.commit_count(), 0);
    assert_eq!(pool.rollback_count(), 1);
}

#[test]
fn sequential_transactions_are_independent() {
    let (pool, manager) = setup();
    let mut ctx = manager.new_context();

    let mut first = manager.begin(&mut ctx, Propagation::Required).unwrap();
    manager.commit(&mut ctx, &mut first).unwrap();

    let mut second = manager.begin(&mut ctx, Propagation::Required).unwrap();
    assert!(second.is_new_transaction());
    assert_ne!(first.transaction_id(), second.transaction_id());
    manager.rollback(&mut ctx, &mut second).unwrap();

    assert_eq!(pool.commit_count(), 1);
    assert_eq!(pool.rollback_count(), 1);
    // The released connection was reused.
    assert_eq!(pool.created(), 1);
}

#[test]
fn double_commit_is_illegal() {
    let (pool, manager) = setup();
    let mut ctx = manager.new_context();

    let mut status = manager.begin(&mut ctx, Propagation::Required).unwrap();
    manager.commit(&mut ctx, &mut status).unwrap();

    let err = manager.commit(&mut ctx, &mut status).unwrap_err();
    assert!(matches!(err, TransactionError::IllegalTransactionState(_)));
    assert_eq!(pool.commit_count(), 1);
}

#[test]
fn rollback_after_commit_is_illegal() {
    let (pool, manager) = setup();
    let mut ctx = manager.new_context();

    let mut status = manager.begin(&mut ctx, Propagation::Required).unwrap();
    manager.commit(&mut ctx, &mut status).unwrap();

    let err = manager.rollback(&mut ctx, &mut status).unwrap_err();
    assert!(err.is_illegal_state());
    assert_eq!(pool.rollback_count(), 0);

    let mut other = manager.begin(&mut ctx, Propagation::Required).unwrap();
    manager.rollback(&mut ctx, &mut other).unwrap();
    assert!(manager.rollback(&mut ctx, &mut other).unwrap_err().is_illegal_state());
}

#[test]
fn commit_after_rollback_is_illegal() {
    let (pool, manager) = setup();
    let mut ctx = manager.new_context();

    let mut status = manager.begin(&mut ctx, Propagation::Required).unwrap();
    manager.rollback(&mut ctx, &mut status).unwrap();

    let err = manager.commit(&mut ctx, &mut status).unwrap_err();
    assert!(err.is_illegal_state());
    assert_eq!(pool.commit_count(), 0);
    assert_eq!(pool.rollback_count(), 1);
}

// ==================== Joined scopes ====================

#[test]
fn inner_commit_has_no_physical_effect() {
    let (pool, manager) = setup();
    let mut ctx = manager.new_context();

    let mut outer = manager.begin(&mut ctx, Propagation::Required).unwrap();
    assert!(outer.is_new_transaction());

    let mut inner = manager.begin(&mut ctx, Propagation::Required).unwrap();
    assert!(!inner.is_new_transaction());
    assert_eq!(inner.transaction_id(), outer.transaction_id());

    manager.commit(&mut ctx, &mut inner).unwrap();
    assert_eq!(pool.commit_count(), 0);

    manager.commit(&mut ctx, &mut outer).unwrap();
    assert_eq!(pool.commit_count(), 1);
}

#[test]
fn outer_rollback_discards_inner_work() {
    let (pool, manager) = setup();
    let mut ctx = manager.new_context();

    let mut outer = manager.begin(&mut ctx, Propagation::Required).unwrap();
    let mut inner = manager.begin(&mut ctx, Propagation::Required).unwrap();
    manager.commit(&mut ctx, &mut inner).unwrap();
    manager.rollback(&mut ctx, &mut outer).unwrap();

    assert_eq!(pool.commit_count(), 0);
    assert_eq!(pool.rollback_count(), 1);
}

#[test]
fn inner_rollback_makes_outer_commit_unexpected() {
    let (pool, manager) = setup();
    let mut ctx = manager.new_context();

    let mut outer = manager.begin(&mut ctx, Propagation::Required).unwrap();
    let mut inner = manager.begin(&mut ctx, Propagation::Required).unwrap();

    manager.rollback(&mut ctx, &mut inner).unwrap();
    assert_eq!(pool.rollback_count(), 0);
    assert!(outer.is_rollback_only());
    assert!(outer.is_global_rollback_only());

    let err = manager.commit(&mut ctx, &mut outer).unwrap_err();
    match err {
        TransactionError::UnexpectedRollback { ref tx_id } => {
            assert_eq!(Some(tx_id.as_str()), outer.transaction_id());
        }
        other => panic!("expected UnexpectedRollback, got {other:?}"),
    }
    assert_eq!(pool.commit_count(), 0);
    assert_eq!(pool.rollback_count(), 1);
    assert!(!ctx.has_active_transaction());
}

#[test]
fn inner_requires_new_rollback_keeps_outer() {
    let (pool, manager) = setup();
    let mut ctx = manager.new_context();

    let mut outer = manager.begin(&mut ctx, Propagation::Required).unwrap();
    let mut inner = manager.begin(&mut ctx, Propagation::RequiresNew).unwrap();
    assert!(inner.is_new_transaction());
    assert_ne!(inner.connection_id(), outer.connection_id());

    manager.rollback(&mut ctx, &mut inner).unwrap();
    assert!(!outer.is_rollback_only());

    manager.commit(&mut ctx, &mut outer).unwrap();
    assert_eq!(pool.commit_count(), 1);
    assert_eq!(pool.rollback_count(), 1);
}

#[test]
fn nested_rollback_undoes_only_the_savepoint() {
    let (pool, manager) = setup();
    let mut ctx = manager.new_context();

    let mut outer = manager.begin(&mut ctx, Propagation::Required).unwrap();
    let mut nested = manager.begin(&mut ctx, Propagation::Nested).unwrap();
    assert!(nested.has_savepoint());

    manager.rollback(&mut ctx, &mut nested).unwrap();
    manager.commit(&mut ctx, &mut outer).unwrap();

    let conn = outer.connection_id().unwrap();
    let events = pool.take_events();
    let physical: Vec<_> = events
        .iter()
        .filter(|e| !matches!(e, ResourceEvent::Acquired { .. } | ResourceEvent::Released { .. }))
        .cloned()
        .collect();
    assert_eq!(
        physical,
        vec![
            ResourceEvent::Began { connection: conn, read_only: false },
            ResourceEvent::SavepointCreated { connection: conn, name: "SAVEPOINT_1".into() },
            ResourceEvent::RolledBackToSavepoint { connection: conn, name: "SAVEPOINT_1".into() },
            ResourceEvent::SavepointReleased { connection: conn, name: "SAVEPOINT_1".into() },
            ResourceEvent::Committed { connection: conn },
        ]
    );
}

// ==================== Extension modes ====================

#[test]
fn mandatory_and_never() {
    let (_pool, manager) = setup();
    let mut ctx = manager.new_context();

    assert!(manager
        .begin(&mut ctx, Propagation::Mandatory)
        .unwrap_err()
        .is_illegal_state());

    let mut outer = manager.begin(&mut ctx, Propagation::Required).unwrap();
    assert!(manager
        .begin(&mut ctx, Propagation::Never)
        .unwrap_err()
        .is_illegal_state());
    manager.commit(&mut ctx, &mut outer).unwrap();
}

#[test]
fn not_supported_suspends_and_resumes() {
    let (pool, manager) = setup();
    let mut ctx = manager.new_context();

    let mut outer = manager.begin(&mut ctx, Propagation::Required).unwrap();
    let mut plain = manager.begin(&mut ctx, Propagation::NotSupported).unwrap();
    assert!(!ctx.has_active_transaction());

    manager.commit(&mut ctx, &mut plain).unwrap();
    assert_eq!(ctx.current_transaction_id(), outer.transaction_id());

    manager.commit(&mut ctx, &mut outer).unwrap();
    assert_eq!(pool.commit_count(), 1);
}

#[test]
fn exhausted_pool_resumes_suspended_transaction() {
    let pool = ConnectionPool::new(1);
    let manager = TransactionManager::new(pool.clone());
    let mut ctx = manager.new_context();

    let mut outer = manager.begin(&mut ctx, Propagation::Required).unwrap();
    let err = manager.begin(&mut ctx, Propagation::RequiresNew).unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(ctx.suspended_count(), 0);

    manager.commit(&mut ctx, &mut outer).unwrap();
    assert_eq!(pool.commit_count(), 1);
}

#[test]
fn read_only_definition_reaches_the_resource() {
    let (pool, manager) = setup();
    let mut ctx = manager.new_context();

    let definition = TransactionDefinition::new(Propagation::Required)
        .name("report")
        .read_only(true);
    let mut status = manager.begin(&mut ctx, definition).unwrap();
    let info = manager
        .transaction_info(status.transaction_id().unwrap())
        .unwrap();
    assert_eq!(info.name.as_deref(), Some("report"));
    assert!(info.read_only);

    manager.commit(&mut ctx, &mut status).unwrap();
    assert!(pool
        .events()
        .iter()
        .any(|e| matches!(e, ResourceEvent::Began { read_only: true, .. })));
}

// ==================== Declarative boundaries ====================

#[test]
fn template_unchecked_failure_rolls_back() {
    let (pool, manager) = setup();
    let mut ctx = manager.new_context();

    let result: Result<(), _> = manager.with_transaction(&mut ctx, |_ctx, _status| Err(InventoryError));
    assert!(matches!(result, Err(TemplateError::Failed(InventoryError))));
    assert_eq!(pool.rollback_count(), 1);
    assert_eq!(pool.commit_count(), 0);
}

#[test]
fn template_checked_failure_commits() {
    let (pool, manager) = setup();
    let mut ctx = manager.new_context();

    let result: Result<(), _> = manager.with_transaction(&mut ctx, |_ctx, _status| Err(PaymentDeclined));
    assert!(result.is_err());
    assert_eq!(pool.commit_count(), 1);
    assert_eq!(pool.rollback_count(), 0);
}

#[test]
fn template_rollback_for_overrides_checked() {
    let (pool, manager) = setup();
    let mut ctx = manager.new_context();

    let attribute = TransactionAttribute::new(Propagation::Required).rollback_for::<PaymentDeclined>();
    let template = TransactionTemplate::new(manager.clone(), attribute);
    let result: Result<(), _> = template.execute(&mut ctx, |_ctx, _status| Err(PaymentDeclined));

    assert!(result.is_err());
    assert_eq!(pool.commit_count(), 0);
    assert_eq!(pool.rollback_count(), 1);
}

#[test]
fn template_nested_requires_new_survives_outer_failure() {
    let (pool, manager) = setup();
    let mut ctx = manager.new_context();
    let audit = TransactionTemplate::new(
        manager.clone(),
        TransactionAttribute::new(Propagation::RequiresNew),
    );

    let result: Result<(), _> = manager.with_transaction(&mut ctx, |ctx, _status| {
        audit
            .execute(ctx, |_ctx, status| -> Result<(), InventoryError> {
                assert!(status.is_new_transaction());
                Ok(())
            })
            .map_err(|_| InventoryError)?;
        Err(InventoryError)
    });

    assert!(result.is_err());
    assert_eq!(pool.commit_count(), 1);
    assert_eq!(pool.rollback_count(), 1);
}

// ==================== Contexts ====================

#[test]
fn contexts_on_different_threads_are_independent() {
    let pool = ConnectionPool::new(8);
    let manager = TransactionManager::new(pool.clone());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let manager = manager.clone();
            thread::spawn(move || {
                let mut ctx = manager.new_context();
                let mut outer = manager.begin(&mut ctx, Propagation::Required).unwrap();
                let mut inner = manager.begin(&mut ctx, Propagation::Required).unwrap();
                assert!(!inner.is_new_transaction());

                if i % 2 == 0 {
                    manager.commit(&mut ctx, &mut inner).unwrap();
                    manager.commit(&mut ctx, &mut outer).unwrap();
                } else {
                    manager.rollback(&mut ctx, &mut inner).unwrap();
                    let err = manager.commit(&mut ctx, &mut outer).unwrap_err();
                    assert!(err.is_unexpected_rollback());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(pool.commit_count(), 2);
    assert_eq!(pool.rollback_count(), 2);
    assert_eq!(manager.active_count(), 0);
    assert_eq!(pool.in_use(), 0);
}

#[test]
fn config_changes_participation_semantics() {
    let pool = ConnectionPool::new(2);
    let config = ManagerConfig::from_json(r#"{"global_rollback_on_participation_failure": false}"#).unwrap();
    let manager = TransactionManager::with_config(pool.clone(), config);
    let mut ctx = manager.new_context();

    let mut outer = manager.begin(&mut ctx, Propagation::Required).unwrap();
    let mut inner = manager.begin(&mut ctx, Propagation::Required).unwrap();
    manager.rollback(&mut ctx, &mut inner).unwrap();
    manager.commit(&mut ctx, &mut outer).unwrap();

    assert_eq!(pool.commit_count(), 1);
}
