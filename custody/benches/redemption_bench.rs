//! Benchmarks the hot redemption path: fixed-order validation plus the
//! atomic cross-ledger commit, against a pre-funded zone with a verified
//! vendor.

use std::sync::Arc;

use chrono::Duration;
use criterion::{criterion_group, criterion_main, Criterion};
use tokio::runtime::Runtime;

use amparo_custody::authority::AuthorityRegistry;
use amparo_custody::redemption::{RedemptionEngine, RedemptionRequest};
use amparo_ledger::content::{evidence_hash_of, InMemoryContentStore};
use amparo_ledger::event::{EventBus, GeoPoint};
use amparo_ledger::submit::{RecordingLedgerClient, SubmitOptions};

fn build_engine() -> RedemptionEngine {
    let authority = Arc::new(AuthorityRegistry::new());
    authority.grant_all("relief-admin");
    RedemptionEngine::new(
        authority,
        Arc::new(RecordingLedgerClient::new()),
        Arc::new(InMemoryContentStore::new()),
        EventBus::new(1024),
        SubmitOptions::default(),
    )
}

fn bench_redeem(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");

    let engine = build_engine();
    let zone_id = rt.block_on(async {
        let zone = engine
            .create_zone(
                "Bench Zone",
                GeoPoint::new(-26.92, -49.07),
                25_000.0,
                u64::MAX / 2,
                "relief-admin",
            )
            .await
            .unwrap();
        engine
            .register_vendor(
                "ven-bench",
                "Bench Vendor",
                GeoPoint::new(-26.92, -49.07),
                &zone.zone_id,
                &evidence_hash_of(b"kyc"),
            )
            .await
            .unwrap();
        engine
            .verify_vendor("ven-bench", &zone.zone_id, "relief-admin")
            .await
            .unwrap();
        zone.zone_id
    });

    c.bench_function("redeem_voucher", |b| {
        b.iter_batched(
            || {
                rt.block_on(async {
                    engine
                        .issue_voucher(
                            "hh-bench",
                            1_500,
                            &zone_id,
                            vec!["food".to_string()],
                            Duration::days(30),
                        )
                        .await
                        .unwrap()
                        .voucher_id
                })
            },
            |voucher_id| {
                rt.block_on(async {
                    engine
                        .redeem(RedemptionRequest {
                            voucher_id,
                            vendor_id: "ven-bench".into(),
                            amount: 1_500,
                            category: "food".into(),
                            geo: None,
                        })
                        .await
                        .unwrap()
                })
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_redeem);
criterion_main!(benches);
