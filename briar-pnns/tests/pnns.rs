//! End-to-end nearest-neighbor tests.

use std::sync::Arc;

use briar_he::bfv::{BfvContext, BfvParameters, EvaluationKey, Plaintext, SecretKey};
use briar_math::Array2d;
use briar_pnns::{
	bsgs_multiply, evaluation_key_config, extract_dense_row, BabyStepGiantStep, DiagonalMatrix,
	DistanceMetric, MatrixDimensions, MatrixPacking, PlaintextMatrix, PnnsClient, PnnsConfig,
	PnnsServer, VectorDatabase,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn batching_context(degree: usize, plaintext_modulus: u64) -> Arc<BfvContext> {
	BfvContext::new(
		BfvParameters::insecure_testing(degree, plaintext_modulus, 3).unwrap(),
	)
	.unwrap()
}

/// The BSGS product on a known 4x4 matrix: diagonal packing with baby and
/// giant steps of two must reproduce the plain matrix-vector product.
#[test]
fn bsgs_product_matches_known_matrix() {
	let mut rng = StdRng::seed_from_u64(31);
	let context = batching_context(16, 257);
	let secret_key = SecretKey::generate(&context, &mut rng);

	let matrix_values = Array2d::new((1..=16u64).collect(), 4, 4).unwrap();
	let bsgs = BabyStepGiantStep::with_steps(4, 2, 2).unwrap();
	let dimensions = MatrixDimensions::new(4, 4).unwrap();
	let matrix = PlaintextMatrix::new(
		&context,
		dimensions,
		MatrixPacking::Diagonal(bsgs),
		&matrix_values,
	)
	.unwrap();
	let database = DiagonalMatrix::new(&matrix).unwrap();

	let config = evaluation_key_config(&context, dimensions, &bsgs).unwrap();
	let evaluation_key =
		EvaluationKey::generate(&secret_key, &config, &mut rng).unwrap();

	// The query vector [1, 2, 3, 4], tiled across both SIMD rows.
	let vector_values = Array2d::new(vec![1u64, 2, 3, 4], 1, 4).unwrap();
	let vector = PlaintextMatrix::new(
		&context,
		MatrixDimensions::new(1, 4).unwrap(),
		MatrixPacking::DenseRow,
		&vector_values,
	)
	.unwrap()
	.encrypt(&secret_key, &mut rng)
	.unwrap();
	let broadcast = extract_dense_row(&vector, 0, &evaluation_key).unwrap();

	let scores = bsgs_multiply(&database, &broadcast, &evaluation_key).unwrap();
	assert_eq!(scores.len(), 1);
	let slots = secret_key
		.decrypt(&scores[0])
		.unwrap()
		.decode_simd()
		.unwrap();
	// M * v = [30, 70, 110, 150] in the leading slots of both rows.
	assert_eq!(&slots[..4], &[30, 70, 110, 150]);
	assert_eq!(&slots[8..12], &[30, 70, 110, 150]);
}

#[test]
fn extracted_rows_broadcast_across_all_slots() {
	let mut rng = StdRng::seed_from_u64(32);
	let context = batching_context(16, 257);
	let secret_key = SecretKey::generate(&context, &mut rng);
	let values = Array2d::new((10..22u64).collect(), 3, 4).unwrap();
	let matrix = PlaintextMatrix::new(
		&context,
		MatrixDimensions::new(3, 4).unwrap(),
		MatrixPacking::DenseRow,
		&values,
	)
	.unwrap()
	.encrypt(&secret_key, &mut rng)
	.unwrap();
	let bsgs = BabyStepGiantStep::with_steps(4, 2, 2).unwrap();
	let config =
		evaluation_key_config(&context, MatrixDimensions::new(3, 4).unwrap(), &bsgs).unwrap();
	let evaluation_key =
		EvaluationKey::generate(&secret_key, &config, &mut rng).unwrap();

	for row in 0..3 {
		let extracted = extract_dense_row(&matrix, row, &evaluation_key).unwrap();
		let slots = secret_key
			.decrypt(&extracted)
			.unwrap()
			.decode_simd()
			.unwrap();
		let expected: Vec<u64> = values.row(row).iter().copied().cycle().take(16).collect();
		assert_eq!(slots, expected, "row {row}");
	}
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
	let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
	let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
	let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
	dot / (norm_a * norm_b)
}

#[test]
fn cosine_similarity_pipeline_end_to_end() {
	let mut rng = StdRng::seed_from_u64(33);
	// Two plaintext moduli for CRT widening; both support batching at
	// degree 16 (both are 1 mod 32).
	let contexts = [batching_context(16, 257), batching_context(16, 12289)];

	let vectors = Array2d::new(
		vec![
			1.0f32, 0.0, 0.0, 0.0, //
			0.0, 1.0, 0.0, 0.0, //
			0.5, 0.5, 0.5, 0.5, //
			-1.0, 2.0, -3.0, 4.0, //
			0.1, 0.2, 0.3, 0.4, //
		],
		5,
		4,
	)
	.unwrap();
	let database = VectorDatabase {
		vectors: vectors.clone(),
		entry_ids: (100..105).collect(),
		entry_metadatas: (0..5).map(|i| vec![i as u8; 2]).collect(),
	};
	let config = PnnsConfig {
		distance_metric: DistanceMetric::CosineSimilarity,
		scaling_factor: 100,
		baby_step_giant_step: None,
	};
	let server = PnnsServer::process(&contexts, &config, &database).unwrap();
	let client =
		PnnsClient::new(&contexts, server.parameter().clone(), &mut rng).unwrap();
	let evaluation_keys = client.generate_evaluation_keys(&mut rng).unwrap();

	let queries = Array2d::new(
		vec![
			1.0f32, 1.0, 0.0, 0.0, //
			0.0, 0.0, 0.0, 2.0, //
		],
		2,
		4,
	)
	.unwrap();
	let query = client.generate_query(&queries, &mut rng).unwrap();
	// Exercise the wire format on the way through.
	let query = briar_pnns::PnnsQuery::from_bytes(&contexts, &query.to_bytes()).unwrap();
	let response = server.compute_response(&query, &evaluation_keys).unwrap();
	let response =
		briar_pnns::PnnsResponse::from_bytes(&contexts, &response.to_bytes()).unwrap();
	let result = client.decrypt_response(&response).unwrap();

	assert_eq!(result.entry_ids, (100..105).collect::<Vec<u64>>());
	assert_eq!(result.scores.row_count(), 5);
	assert_eq!(result.scores.column_count(), 2);
	// Fixed-point error: each side rounds to 1/100, so scores are within
	// a few hundredths of the exact cosine.
	for entry in 0..5 {
		for query_index in 0..2 {
			let expected = cosine(vectors.row(entry), queries.row(query_index));
			let actual = *result.scores.get(entry, query_index);
			assert!(
				(actual - expected).abs() < 0.05,
				"entry {entry} query {query_index}: {actual} vs {expected}"
			);
		}
	}
}

#[test]
fn mismatched_query_dimensions_are_rejected() {
	let mut rng = StdRng::seed_from_u64(34);
	let contexts = [batching_context(16, 257)];
	let database = VectorDatabase {
		vectors: Array2d::new(vec![1.0f32; 8], 2, 4).unwrap(),
		entry_ids: vec![1, 2],
		entry_metadatas: vec![vec![], vec![]],
	};
	let config = PnnsConfig {
		distance_metric: DistanceMetric::CosineSimilarity,
		scaling_factor: 50,
		baby_step_giant_step: None,
	};
	let server = PnnsServer::process(&contexts, &config, &database).unwrap();
	let client =
		PnnsClient::new(&contexts, server.parameter().clone(), &mut rng).unwrap();
	let wrong = Array2d::new(vec![1.0f32; 3], 1, 3).unwrap();
	assert!(client.generate_query(&wrong, &mut rng).is_err());
}

#[test]
fn tall_databases_pack_into_multiple_result_blocks() {
	let mut rng = StdRng::seed_from_u64(35);
	let contexts = [batching_context(16, 12289)];
	// 11 entries exceed the 8 slots of one SIMD row, forcing two result
	// blocks in the dense-column output.
	let vectors = Array2d::new(
		(0..44).map(|i| ((i % 7) as f32) - 3.0).collect(),
		11,
		4,
	)
	.unwrap();
	let database = VectorDatabase {
		vectors: vectors.clone(),
		entry_ids: (0..11).collect(),
		entry_metadatas: (0..11).map(|i| vec![i as u8]).collect(),
	};
	let config = PnnsConfig {
		distance_metric: DistanceMetric::CosineSimilarity,
		scaling_factor: 64,
		baby_step_giant_step: None,
	};
	let server = PnnsServer::process(&contexts, &config, &database).unwrap();
	let client =
		PnnsClient::new(&contexts, server.parameter().clone(), &mut rng).unwrap();
	let evaluation_keys = client.generate_evaluation_keys(&mut rng).unwrap();
	let queries = Array2d::new(vec![1.0f32, -1.0, 1.0, -1.0], 1, 4).unwrap();
	let query = client.generate_query(&queries, &mut rng).unwrap();
	let response = server.compute_response(&query, &evaluation_keys).unwrap();
	let result = client.decrypt_response(&response).unwrap();
	for entry in 0..11 {
		let expected = cosine(vectors.row(entry), queries.row(0));
		let actual = *result.scores.get(entry, 0);
		assert!(
			(actual - expected).abs() < 0.08,
			"entry {entry}: {actual} vs {expected}"
		);
	}
}

#[test]
fn simd_constant_sanity() {
	// Guard that plaintext CRT moduli agree across contexts on a trivial
	// encoding.
	let context = batching_context(16, 257);
	let plaintext = Plaintext::encode_simd(&context, &[7; 16]).unwrap();
	assert_eq!(plaintext.coefficients()[0], 7);
}
