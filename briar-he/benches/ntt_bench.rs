use briar_he::NttContext;
use briar_math::generate_primes;
use criterion::{criterion_group, criterion_main, Criterion};

fn ntt_forward_inverse(c: &mut Criterion) {
	let degree = 4096;
	let prime = generate_primes(&[50], false, degree).unwrap()[0];
	let context = NttContext::new(degree, prime).unwrap();
	let values: Vec<u64> = (0..degree as u64).map(|i| i * 31 % prime).collect();

	c.bench_function("ntt_forward_4096", |b| {
		b.iter(|| {
			let mut row = values.clone();
			context.forward(&mut row);
			row
		})
	});

	c.bench_function("ntt_round_trip_4096", |b| {
		b.iter(|| {
			let mut row = values.clone();
			context.forward(&mut row);
			context.inverse(&mut row);
			row
		})
	});
}

criterion_group!(benches, ntt_forward_inverse);
criterion_main!(benches);
