//! End-to-end index-PIR tests.

use std::sync::Arc;

use briar_he::bfv::{BfvContext, BfvParameters, SecretKey};
use briar_pir::{
	generate_parameter, IndexPirConfig, KeyCompression, MulPirClient, MulPirServer,
	ProcessedDatabase, Query, Response,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn test_context() -> Arc<BfvContext> {
	BfvContext::new(BfvParameters::insecure_testing(32, 17, 3).unwrap()).unwrap()
}

fn random_database(rng: &mut StdRng, entry_count: usize, entry_size: usize) -> Vec<Vec<u8>> {
	(0..entry_count)
		.map(|_| (0..entry_size).map(|_| rng.gen()).collect())
		.collect()
}

fn run_round_trip(
	config: &IndexPirConfig,
	entries: &[Vec<u8>],
	indices: &[usize],
	seed: u64,
) -> Vec<Vec<u8>> {
	let mut rng = StdRng::seed_from_u64(seed);
	let context = test_context();
	let parameter = generate_parameter(config, &context).unwrap();
	let database = ProcessedDatabase::new(&context, &parameter, entries).unwrap();
	let server = MulPirServer::new(&context, parameter.clone(), database).unwrap();

	let secret_key = SecretKey::generate(&context, &mut rng);
	let client = MulPirClient::new(&context, parameter, secret_key);
	let evaluation_key = client.generate_evaluation_key(&mut rng).unwrap();

	let query = client.generate_query(indices, &mut rng).unwrap();
	// Exercise the wire format on the way through.
	let query = Query::from_bytes(&context, &query.to_bytes()).unwrap();
	let response = server.compute_response(&query, &evaluation_key).unwrap();
	let response = Response::from_bytes(&context, &response.to_bytes()).unwrap();
	client.decrypt_response(&response, indices).unwrap()
}

#[test]
fn two_dimensional_batched_lookup() {
	// 100 one-byte entries, two dimensions, batch of two, no compression.
	let mut rng = StdRng::seed_from_u64(1);
	let entries = random_database(&mut rng, 100, 1);
	let config = IndexPirConfig {
		entry_count: 100,
		entry_size_in_bytes: 1,
		dimension_count: 2,
		batch_size: 2,
		uneven_dimensions: false,
		key_compression: KeyCompression::NoCompression,
		encoding_entry_size: false,
	};
	let indices = [0usize, 99];
	let retrieved = run_round_trip(&config, &entries, &indices, 2);
	assert_eq!(retrieved[0], entries[0]);
	assert_eq!(retrieved[1], entries[99]);
}

#[test]
fn large_entries_with_length_prefix_and_hybrid_keys() {
	// 24-byte entries spanning two plaintexts, variable lengths, hybrid
	// key compression, one dimension.
	let mut rng = StdRng::seed_from_u64(3);
	let mut entries = random_database(&mut rng, 100, 24);
	for (index, entry) in entries.iter_mut().enumerate() {
		entry.truncate(3 + index % 22);
		// Keep decoded contents distinguishable from padding.
		if let Some(first) = entry.first_mut() {
			*first = (index + 1) as u8;
		}
	}
	let config = IndexPirConfig {
		entry_count: 100,
		entry_size_in_bytes: 24,
		dimension_count: 1,
		batch_size: 1,
		uneven_dimensions: false,
		key_compression: KeyCompression::Hybrid,
		encoding_entry_size: true,
	};
	for index in [0usize, 1, 31, 77, 99] {
		let retrieved = run_round_trip(&config, &entries, &[index], index as u64);
		assert_eq!(retrieved[0], entries[index], "index {index}");
	}
}

#[test]
fn every_index_of_a_small_database_decodes() {
	let mut rng = StdRng::seed_from_u64(4);
	let entries = random_database(&mut rng, 40, 2);
	let config = IndexPirConfig {
		entry_count: 40,
		entry_size_in_bytes: 2,
		dimension_count: 2,
		batch_size: 1,
		uneven_dimensions: true,
		key_compression: KeyCompression::Max,
		encoding_entry_size: false,
	};
	for index in 0..40 {
		let retrieved = run_round_trip(&config, &entries, &[index], 100 + index as u64);
		assert_eq!(retrieved[0], entries[index], "index {index}");
	}
}

#[test]
fn rejects_out_of_contract_queries() {
	let mut rng = StdRng::seed_from_u64(5);
	let context = test_context();
	let entries = random_database(&mut rng, 10, 1);
	let config = IndexPirConfig {
		entry_count: 10,
		entry_size_in_bytes: 1,
		dimension_count: 1,
		batch_size: 2,
		uneven_dimensions: false,
		key_compression: KeyCompression::NoCompression,
		encoding_entry_size: false,
	};
	let parameter = generate_parameter(&config, &context).unwrap();
	let _database = ProcessedDatabase::new(&context, &parameter, &entries).unwrap();
	let secret_key = SecretKey::generate(&context, &mut rng);
	let client = MulPirClient::new(&context, parameter, secret_key);
	assert!(client.generate_query(&[0, 1, 2], &mut rng).is_err());
	assert!(client.generate_query(&[10], &mut rng).is_err());
	assert!(client.generate_query(&[], &mut rng).is_err());
}
