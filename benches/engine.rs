use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use settle_eng::{
    Amount, ChargeRequest, EngineConfig, InMemoryBackend, PassTier, PaymentModel,
    SettlementEngine,
};
use tokio::runtime::Runtime;

/// Generates a repeating mix of charges across subjects.
///
/// Pattern per subject (repeating):
/// 1. Standard pass with a referral code
/// 2. Direct charge of 15.00
/// 3. Basic pass, self-service
pub struct ChargeGenerator {
    num_subjects: u32,
    total: u64,
    produced: u64,
}

impl ChargeGenerator {
    pub fn new(num_subjects: u32, total: u64) -> Self {
        Self {
            num_subjects,
            total,
            produced: 0,
        }
    }
}

impl Iterator for ChargeGenerator {
    type Item = ChargeRequest;

    fn next(&mut self) -> Option<Self::Item> {
        if self.produced >= self.total {
            return None;
        }
        let n = self.produced;
        self.produced += 1;

        let subject = format!("cust-{}", n % self.num_subjects as u64);
        let (staff, charge_type, model) = match n % 3 {
            0 => (
                Some("staff-1".to_string()),
                None,
                PaymentModel::TieredPass {
                    tier: PassTier::Standard,
                    promoter_code: Some("NOVA".into()),
                },
            ),
            1 => (
                Some("staff-1".to_string()),
                Some("bar_tab".to_string()),
                PaymentModel::Direct {
                    amount: Amount::from_minor(1_500),
                },
            ),
            _ => (
                None,
                None,
                PaymentModel::TieredPass {
                    tier: PassTier::Basic,
                    promoter_code: None,
                },
            ),
        };
        Some(ChargeRequest {
            venue: "venue-1".into(),
            subject,
            staff,
            charge_type,
            model,
        })
    }
}

async fn engine(num_subjects: u32) -> Arc<SettlementEngine> {
    let config = EngineConfig::default();
    let backend = InMemoryBackend::new(&config);
    backend.directory.assign_operator("staff-1", "venue-1").await;
    backend.promoters.register("promo-1", "NOVA").await;
    for i in 0..num_subjects {
        let id = format!("cust-{i}");
        backend.directory.register_subject(id.clone(), id.clone()).await;
        backend.ledger.seed(id, Amount::from_minor(i64::MAX / 4)).await;
    }
    let engine = SettlementEngine::new(config, backend.stores()).expect("default config is valid");
    Arc::new(engine)
}

fn bench_sequential(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("sequential");

    for count in [1_000u64, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.to_async(&runtime).iter(|| async move {
                let engine = engine(100).await;
                for request in ChargeGenerator::new(100, count) {
                    let _ = black_box(engine.charge(request).await);
                }
                engine
            });
        });
    }

    group.finish();
}

fn bench_concurrent(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("concurrent");

    // Few subjects means many version conflicts.
    for subjects in [1u32, 10, 1_000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(subjects),
            &subjects,
            |b, &subjects| {
                b.to_async(&runtime).iter(|| async move {
                    let engine = engine(subjects).await;
                    let handles: Vec<_> = ChargeGenerator::new(subjects, 5_000)
                        .map(|request| {
                            let engine = engine.clone();
                            tokio::spawn(async move { engine.charge(request).await.is_ok() })
                        })
                        .collect();
                    for handle in handles {
                        let _ = black_box(handle.await);
                    }
                    engine
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_sequential, bench_concurrent);
criterion_main!(benches);
