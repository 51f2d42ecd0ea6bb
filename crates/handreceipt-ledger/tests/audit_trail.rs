use std::sync::Arc;

use handreceipt_core::*;
use handreceipt_ledger::{AuditLedgerRecorder, InMemoryLedger, LedgerClient, RecorderConfig};

const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);
const NOW: i64 = 1_700_000_000_000;

type Recorder = AuditLedgerRecorder<InMemoryCustodyStore, InMemoryLedger>;

fn setup() -> (CustodyEngine<InMemoryCustodyStore>, Recorder) {
    let store = Arc::new(InMemoryCustodyStore::new());
    let recorder = AuditLedgerRecorder::new(
        store.clone(),
        Arc::new(InMemoryLedger::new()),
        RecorderConfig::default(),
    );
    let engine = CustodyEngine::new(
        store,
        CredentialKey::derive(b"audit-secret"),
        EngineConfig::default(),
    );
    (engine, recorder)
}

fn names(records: &[handreceipt_ledger::LedgerRecord]) -> Vec<&'static str> {
    records.iter().map(|r| r.event.name()).collect()
}

#[tokio::test]
async fn test_qr_handover_audit_trail() {
    let (engine, recorder) = setup();
    let rifle = engine
        .register_property(
            NewProperty::new("RIFLE-001", "M4", "rifle", ALICE).attachable([
                AttachmentPoint::new("rail-top").with_capacity(1).accepting(["optic"]),
            ]),
            ALICE,
            NOW,
        )
        .unwrap()
        .id;
    let optic = engine
        .register_property(NewProperty::new("OPTIC-7", "ACOG", "optic", ALICE), ALICE, NOW)
        .unwrap()
        .id;
    engine
        .attach(AttachRequest::new(rifle, optic, ALICE).at_slot("rail-top"), NOW)
        .unwrap();

    let payload = engine
        .issue_credential(rifle, ALICE, NOW)
        .unwrap()
        .encode()
        .unwrap();
    let request = engine
        .create_transfer(
            NewTransfer::new(rifle, BOB, BOB, InitiationMethod::QrScan)
                .including_components()
                .with_credential(payload),
            NOW + 1_000,
        )
        .unwrap();
    engine.approve_transfer(request.id, ALICE, NOW + 2_000).unwrap();

    let report = recorder.flush().await.unwrap();
    assert_eq!(report.delivered, 7);

    let ledger = recorder.ledger();
    ledger.verify_chain().unwrap();

    let transfer = ledger
        .history(EntityRef::Transfer(request.id))
        .await
        .unwrap();
    assert_eq!(
        names(&transfer),
        vec![
            "TransferCreated",
            "OwnershipChanged",
            "OwnershipChanged",
            "TransferApproved"
        ]
    );

    let optic_history = ledger.history(EntityRef::Property(optic)).await.unwrap();
    assert_eq!(
        names(&optic_history),
        vec![
            "PropertyRegistered",
            "ComponentAttached",
            "OwnershipChanged",
            "TransferApproved"
        ]
    );
    match &optic_history[2].event.kind {
        LedgerEventKind::OwnershipChanged { from, to, .. } => {
            assert_eq!((*from, *to), (ALICE, BOB));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_lost_ack_does_not_duplicate() {
    let (engine, recorder) = setup();
    engine
        .register_property(NewProperty::new("RIFLE-001", "M4", "rifle", ALICE), ALICE, NOW)
        .unwrap();

    // Append without acknowledging, as if the process died in between.
    let pending = engine.store().read(|tx| tx.outbox(10)).unwrap();
    let outcome = recorder.record(&pending).await;
    assert_eq!(outcome.delivered.len(), 1);

    let report = recorder.flush().await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(recorder.ledger().len(), 1);
}

#[tokio::test]
async fn test_rejected_transfer_is_audited() {
    let (engine, recorder) = setup();
    let rifle = engine
        .register_property(NewProperty::new("RIFLE-001", "M4", "rifle", ALICE), ALICE, NOW)
        .unwrap()
        .id;
    let request = engine
        .create_transfer(
            NewTransfer::new(rifle, BOB, BOB, InitiationMethod::ManualRequest),
            NOW,
        )
        .unwrap();
    engine.reject_transfer(request.id, ALICE, NOW).unwrap();
    recorder.flush().await.unwrap();

    let history = recorder
        .ledger()
        .history(EntityRef::Property(rifle))
        .await
        .unwrap();
    assert_eq!(
        names(&history),
        vec!["PropertyRegistered", "TransferCreated", "TransferRejected"]
    );
    assert_eq!(history[2].event.actor, ALICE);
}
