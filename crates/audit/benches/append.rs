use clasper_audit::{AuditChain, Linkage};
use clasper_core::identity::TenantId;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

fn bench_append(c: &mut Criterion) {
    c.bench_function("audit_append", |b| {
        b.iter_batched(
            || {
                let dir = tempfile::tempdir().unwrap();
                let chain = AuditChain::open(dir.path()).unwrap();
                (dir, chain)
            },
            |(_dir, chain)| {
                chain
                    .append(&TenantId::from("t1"), "tool_execution_completed", serde_json::json!({"tool": "read"}), Linkage::default())
                    .unwrap();
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_append);
criterion_main!(benches);
