//! End-to-end behavior of the Temporal Memory and its connection graph.
//!
//! Run with: `cargo test --test temporal_memory_behavior`

use mnemos::prelude::*;

fn columns(num_columns: u32, active: &[u32]) -> Sdr {
    let mut sdr = Sdr::new(&[num_columns]);
    sdr.set_sparse(active).unwrap();
    sdr
}

fn max_permanence(tm: &TemporalMemory) -> Permanence {
    let connections = tm.connections();
    let mut max = 0.0;
    for cell in 0..connections.num_cells() as CellIdx {
        for &segment in connections.segments_for_cell(cell) {
            for &synapse in connections.synapses_for_segment(segment) {
                max = connections.data_for_synapse(synapse).permanence.max(max);
            }
        }
    }
    max
}

// =============================================================================
// SINGLE COLUMN SCENARIOS
// =============================================================================

mod single_column {
    use super::*;

    fn small_params() -> TemporalMemoryParams {
        TemporalMemoryParams {
            column_dimensions: vec![2],
            cells_per_column: 4,
            seed: 42,
            ..Default::default()
        }
    }

    #[test]
    fn test_repeated_column_bursts_with_default_thresholds() {
        let mut tm = TemporalMemory::new(small_params()).unwrap();
        let input = columns(2, &[0]);

        for _ in 0..3 {
            tm.compute(&input, true).unwrap();
            assert_eq!(tm.active_cells(), &[0, 1, 2, 3]);
            assert_eq!(tm.winner_cells().len(), 1);
            assert!(tm.winner_cells()[0] < 4);
        }

        // Segments grow from the second step on, one per step.
        assert_eq!(tm.connections().num_segments(), 2);
    }

    #[test]
    fn test_repeated_column_is_deterministic() {
        let mut a = TemporalMemory::new(small_params()).unwrap();
        let mut b = TemporalMemory::new(small_params()).unwrap();
        let input = columns(2, &[0]);

        for _ in 0..3 {
            a.compute(&input, true).unwrap();
            b.compute(&input, true).unwrap();
            assert_eq!(a.active_cells(), b.active_cells());
            assert_eq!(a.winner_cells(), b.winner_cells());
        }
        assert_eq!(a, b);
    }

    #[test]
    fn test_learned_transition_is_predicted() {
        let mut tm = TemporalMemory::new(TemporalMemoryParams {
            activation_threshold: 1,
            min_threshold: 1,
            initial_permanence: 0.6,
            ..small_params()
        })
        .unwrap();
        let input = columns(2, &[0]);

        tm.compute(&input, true).unwrap();
        tm.compute(&input, true).unwrap();
        let learned_winner = tm.winner_cells()[0];

        tm.activate_dendrites(true);
        assert_eq!(tm.predictive_cells(), vec![learned_winner]);

        tm.compute(&input, true).unwrap();
        assert_eq!(tm.active_cells(), &[learned_winner]);
        assert_eq!(tm.winner_cells(), &[learned_winner]);
    }
}

// =============================================================================
// CAPACITY
// =============================================================================

mod capacity {
    use super::*;

    #[test]
    fn test_segment_limit_evicts_least_recently_used() {
        let mut connections = Connections::new(ConnectionsParams {
            num_cells: 4,
            max_segments_per_cell: 2,
            ..Default::default()
        });

        let first = connections.create_segment(0, 0);
        connections.create_segment(0, 1);
        connections.touch_segment(first, 5);
        connections.create_segment(0, 6);

        assert_eq!(connections.num_segments_on_cell(0), 2);
        let created: Vec<u64> = connections
            .segments_for_cell(0)
            .iter()
            .map(|&s| connections.data_for_segment(s).created_iteration)
            .collect();
        assert_eq!(created, vec![0, 6]);
    }

    #[test]
    fn test_synapse_limit_evicts_weakest() {
        let mut connections = Connections::new(ConnectionsParams {
            num_cells: 8,
            max_synapses_per_segment: 3,
            ..Default::default()
        });

        let segment = connections.create_segment(0, 0);
        connections.create_synapse(segment, 1, 0.4, 0);
        connections.create_synapse(segment, 2, 0.2, 0);
        connections.create_synapse(segment, 3, 0.6, 0);
        connections.create_synapse(segment, 4, 0.3, 0);

        assert_eq!(connections.num_synapses_on_segment(segment), 3);
        assert_eq!(connections.presynaptic_cells_for_segment(segment), vec![1, 3, 4]);
    }

    #[test]
    fn test_tm_respects_segment_limit() {
        let mut tm = TemporalMemory::new(TemporalMemoryParams {
            column_dimensions: vec![4],
            cells_per_column: 1,
            max_segments_per_cell: 2,
            seed: 3,
            ..Default::default()
        })
        .unwrap();

        // Column 0 bursts after a different column each time, growing a new
        // segment on its single cell.
        for previous in [1, 2, 3, 1, 2, 3] {
            tm.compute(&columns(4, &[previous]), true).unwrap();
            tm.compute(&columns(4, &[0]), true).unwrap();
            tm.reset();
            assert!(tm.connections().num_segments_on_cell(0) <= 2);
        }
        assert_eq!(tm.connections().num_segments_on_cell(0), 2);
    }
}

// =============================================================================
// SEQUENCE LEARNING
// =============================================================================

mod sequence_learning {
    use super::*;

    const A: [u32; 8] = [0, 1, 2, 3, 4, 5, 6, 7];
    const B: [u32; 8] = [8, 9, 10, 11, 12, 13, 14, 15];

    fn sequence_params() -> TemporalMemoryParams {
        TemporalMemoryParams {
            column_dimensions: vec![32],
            cells_per_column: 4,
            activation_threshold: 6,
            min_threshold: 4,
            max_new_synapse_count: 8,
            seed: 42,
            ..Default::default()
        }
    }

    #[test]
    fn test_transition_stops_bursting() {
        let mut tm = TemporalMemory::new(sequence_params()).unwrap();
        let a = columns(32, &A);
        let b = columns(32, &B);

        let mut previous_max = 0.0;
        let mut b_active_counts = Vec::new();

        for _ in 0..15 {
            tm.reset();
            tm.compute(&a, true).unwrap();
            assert_eq!(tm.active_cells().len(), 32);

            tm.compute(&b, true).unwrap();
            b_active_counts.push(tm.active_cells().len());

            let max = max_permanence(&tm);
            assert!(max >= previous_max, "max permanence dropped: {max} < {previous_max}");
            previous_max = max;
        }

        assert_eq!(b_active_counts[0], 32);
        assert!(b_active_counts[6..].iter().all(|&n| n == 8), "{b_active_counts:?}");
        assert!(previous_max >= 0.999);
    }

    #[test]
    fn test_prediction_covers_next_pattern() {
        let mut tm = TemporalMemory::new(sequence_params()).unwrap();
        let a = columns(32, &A);
        let b = columns(32, &B);

        for _ in 0..10 {
            tm.reset();
            tm.compute(&a, true).unwrap();
            tm.compute(&b, true).unwrap();
        }

        tm.reset();
        tm.compute(&a, false).unwrap();
        tm.activate_dendrites(false);

        let predicted_columns: Vec<u32> = tm
            .predictive_cells()
            .iter()
            .map(|&cell| tm.column_for_cell(cell).unwrap())
            .collect();
        assert_eq!(predicted_columns, B.to_vec());
    }

    #[test]
    fn test_random_sequences_are_deterministic() {
        let params = TemporalMemoryParams {
            column_dimensions: vec![64],
            cells_per_column: 8,
            activation_threshold: 3,
            min_threshold: 2,
            max_new_synapse_count: 6,
            seed: 11,
            ..Default::default()
        };
        let mut first = TemporalMemory::new(params.clone()).unwrap();
        let mut second = TemporalMemory::new(params).unwrap();

        let mut rng = Random::new(7);
        let mut input = Sdr::new(&[64]);
        for _ in 0..50 {
            input.randomize(0.1, &mut rng);
            first.compute(&input, true).unwrap();
            second.compute(&input, true).unwrap();
            assert_eq!(first.active_cells(), second.active_cells());
            assert_eq!(first.winner_cells(), second.winner_cells());
        }
        assert_eq!(first, second);
    }
}

// =============================================================================
// PERSISTENCE
// =============================================================================

#[cfg(feature = "serde")]
mod persistence {
    use super::*;

    fn trained() -> (TemporalMemory, Vec<Sdr>) {
        let mut tm = TemporalMemory::new(TemporalMemoryParams {
            column_dimensions: vec![48],
            cells_per_column: 4,
            activation_threshold: 3,
            min_threshold: 2,
            max_new_synapse_count: 5,
            seed: 5,
            ..Default::default()
        })
        .unwrap();

        let mut rng = Random::new(99);
        let inputs: Vec<Sdr> = (0..6)
            .map(|_| {
                let mut sdr = Sdr::new(&[48]);
                sdr.randomize(0.1, &mut rng);
                sdr
            })
            .collect();

        for _ in 0..4 {
            for input in &inputs {
                tm.compute(input, true).unwrap();
            }
        }
        (tm, inputs)
    }

    fn assert_same_future(mut a: TemporalMemory, mut b: TemporalMemory, inputs: &[Sdr]) {
        let mut rng = Random::new(1234);
        let mut noisy = Sdr::new(&[48]);
        for _ in 0..3 {
            for input in inputs {
                a.compute(input, true).unwrap();
                b.compute(input, true).unwrap();
                assert_eq!(a.active_cells(), b.active_cells());
                assert_eq!(a.winner_cells(), b.winner_cells());
            }
            // Unseen inputs exercise the tie-break draws.
            noisy.randomize(0.1, &mut rng);
            a.compute(&noisy, true).unwrap();
            b.compute(&noisy, true).unwrap();
            assert_eq!(a.winner_cells(), b.winner_cells());
        }
        assert_eq!(a, b);
    }

    #[test]
    fn test_binary_round_trip_replays_future() {
        let (tm, inputs) = trained();
        let bytes = tm.to_bytes(SerializableFormat::Binary).unwrap();
        let restored = TemporalMemory::from_bytes(&bytes, SerializableFormat::Binary).unwrap();

        assert_eq!(restored, tm);
        assert_eq!(restored.iteration(), tm.iteration());
        assert_same_future(tm, restored, &inputs);
    }

    #[test]
    fn test_json_round_trip_replays_future() {
        let (tm, inputs) = trained();
        let json = tm.to_json().unwrap();
        let restored = TemporalMemory::from_json(&json).unwrap();

        assert_eq!(restored, tm);
        assert_same_future(tm, restored, &inputs);
    }

    #[test]
    fn test_truncated_stream_fails() {
        let (tm, _) = trained();
        let bytes = tm.to_bytes(SerializableFormat::Binary).unwrap();

        let err = TemporalMemory::from_bytes(&bytes[..bytes.len() - 5], SerializableFormat::Binary)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Serialization);
        assert!(matches!(err, MnemosError::SerializationError { .. }));
    }

    #[test]
    fn test_version_mismatch_fails() {
        let (tm, _) = trained();
        let json = tm
            .to_json()
            .unwrap()
            .replacen("\"version\": 3", "\"version\": 2", 1);

        let err = TemporalMemory::from_json(&json).unwrap_err();
        assert!(matches!(err, MnemosError::VersionMismatch { .. }));
    }

    fn load_edited(
        tm: &TemporalMemory,
        edit: impl FnOnce(&mut serde_json::Value),
    ) -> mnemos::Result<TemporalMemory> {
        let mut value: serde_json::Value = serde_json::from_str(&tm.to_json().unwrap()).unwrap();
        edit(&mut value["payload"]);
        TemporalMemory::from_json(&value.to_string())
    }

    #[test]
    fn test_corrupt_handles_are_rejected() {
        let (tm, _) = trained();
        let connections = tm.connections();
        let cell = (0..connections.num_cells() as CellIdx)
            .find(|&c| connections.num_segments_on_cell(c) > 0)
            .unwrap() as usize;

        // Untouched JSON still loads.
        assert!(load_edited(&tm, |_| {}).is_ok());

        let err = load_edited(&tm, |payload| {
            payload["connections"]["cells"][cell]["segments"][0] = serde_json::json!(999_999);
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Serialization);

        let err = load_edited(&tm, |payload| {
            payload["connections"]["destroyed_synapses"] = serde_json::json!([0]);
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Serialization);
    }

    #[test]
    fn test_cell_count_mismatch_is_rejected() {
        let (tm, _) = trained();

        let err = load_edited(&tm, |payload| payload["extra"] = serde_json::json!(3)).unwrap_err();
        assert!(matches!(err, MnemosError::SerializationError { .. }));

        let err = load_edited(&tm, |payload| payload["cells_per_column"] = serde_json::json!(5))
            .unwrap_err();
        assert!(matches!(err, MnemosError::SerializationError { .. }));

        let err = load_edited(&tm, |payload| {
            payload["active_cells"] = serde_json::json!([48 * 4 + 1]);
        })
        .unwrap_err();
        assert!(matches!(err, MnemosError::SerializationError { .. }));
    }

    #[test]
    fn test_connections_round_trip_rebuilds_index() {
        let (tm, _) = trained();
        let bytes = tm
            .connections()
            .to_bytes(SerializableFormat::Binary)
            .unwrap();
        let restored = Connections::from_bytes(&bytes, SerializableFormat::Binary).unwrap();

        assert_eq!(&restored, tm.connections());
        for cell in 0..restored.num_cells() as CellIdx {
            assert_eq!(
                restored.synapses_for_presynaptic_cell(cell).len(),
                tm.connections().synapses_for_presynaptic_cell(cell).len()
            );
        }
    }
}
