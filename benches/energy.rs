use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rustdock_screen::energy::{first_record_energy, scan_results};

/// A Uni-Dock style result with `modes` poses
fn result_text(energy: f64, modes: usize) -> String {
    let mut text = String::new();
    for mode in 0..modes {
        text.push_str("ligand\n  Uni-Dock\n\n");
        for _ in 0..40 {
            text.push_str("    1.0000    2.0000    3.0000 C   0  0  0  0  0  0\n");
        }
        text.push_str("M  END\n> <Uni-Dock RESULT>\n");
        text.push_str(&format!(
            "ENERGY= {:.3} LOWER_BOUND= 0.000 UPPER_BOUND= 0.000\n\n$$$$\n",
            energy + mode as f64
        ));
    }
    text
}

fn bench_first_record_energy(c: &mut Criterion) {
    let text = result_text(-9.25, 9);

    c.bench_function("first_record_energy", |b| {
        b.iter(|| black_box(first_record_energy(black_box(&text))))
    });
}

fn bench_scan_results(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..500 {
        let path = dir.path().join(format!("{:05}_lig_out.sdf", i));
        std::fs::write(path, result_text(-5.0 - (i % 37) as f64 * 0.1, 9)).unwrap();
    }

    c.bench_function("scan_results_500", |b| {
        b.iter(|| black_box(scan_results(dir.path(), "sdf").unwrap()))
    });
}

criterion_group!(energy_benches, bench_first_record_energy, bench_scan_results);
criterion_main!(energy_benches);
