mod common;

use pop_partition::remap::invert_order;
use pop_partition::table::int_table;
use pop_partition::{
    IdAssignment, IdRemapper, IdUpdate, JoinSettings, PopulationOffsets, Validator, ValidatorConfig,
};
use proptest::collection::vec as prop_vec;
use proptest::prelude::*;

fn remapper(num_partitions: usize) -> IdRemapper {
    IdRemapper::new(JoinSettings {
        num_partitions,
        num_workers: 2,
        validate: true,
    })
}

fn permutation(max: usize) -> impl Strategy<Value = Vec<usize>> {
    (1..max).prop_flat_map(|n| Just((0..n).collect::<Vec<usize>>()).prop_shuffle())
}

// Property: reordering a key space and propagating it is undone by the inverse update
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

    #[test]
    fn prop_propagate_then_inverse_restores_visits(
        (order, picks) in permutation(60).prop_flat_map(|order| {
            let n = order.len();
            (Just(order), prop_vec(0..n, 0..120))
        }),
        shards in 1usize..16,
    ) {
        let n = order.len();
        let rows: Vec<Vec<i64>> = (0..n).map(|l| vec![l as i64, 100 + l as i64]).collect();
        let refs: Vec<&[i64]> = rows.iter().map(|r| r.as_slice()).collect();
        let locations = int_table("locations", &["lid", "capacity"], &refs);

        let visit_rows: Vec<Vec<i64>> = picks
            .iter()
            .enumerate()
            .map(|(i, &l)| vec![i as i64, l as i64])
            .collect();
        let visit_refs: Vec<&[i64]> = visit_rows.iter().map(|r| r.as_slice()).collect();
        let visits = int_table("visits", &["pid", "lid"], &visit_refs);

        let r = remapper(shards);
        let (reordered, update) = r
            .remap(&locations, "lid", &IdAssignment::Reorder(order.clone()))
            .unwrap();
        prop_assert_eq!(reordered.int_column("lid").unwrap(), (0..n as i64).collect::<Vec<_>>());

        let moved = r.propagate(&visits, "lid", &update).unwrap();
        prop_assert_eq!(moved.len(), visits.len());
        let position = invert_order(&order);
        let expected: Vec<i64> = picks.iter().map(|&l| position[l] as i64).collect();
        prop_assert_eq!(moved.int_column("lid").unwrap(), expected);
        // payload follows its row
        let capacity = reordered.int_column("capacity").unwrap();
        for (new_id, &old_row) in order.iter().enumerate() {
            prop_assert_eq!(capacity[new_id], 100 + old_row as i64);
        }

        let restored = r.propagate(&moved, "lid", &update.inverse()).unwrap();
        prop_assert_eq!(restored, visits);
    }

    #[test]
    fn prop_remap_then_inverse_restores_primary_table(order in permutation(60)) {
        let n = order.len();
        let rows: Vec<Vec<i64>> = (0..n).map(|l| vec![l as i64, 7 * l as i64 - 3]).collect();
        let refs: Vec<&[i64]> = rows.iter().map(|r| r.as_slice()).collect();
        let locations = int_table("locations", &["lid", "capacity"], &refs);
        let r = remapper(3);

        let (reordered, _) = r
            .remap(&locations, "lid", &IdAssignment::Reorder(order.clone()))
            .unwrap();
        let (restored, _) = r
            .remap(&reordered, "lid", &IdAssignment::Reorder(invert_order(&order)))
            .unwrap();
        prop_assert_eq!(restored, locations);
    }

    #[test]
    fn prop_offset_update_inverts(shift in -1_000i64..1_000, ids in prop_vec(0i64..500, 0..50)) {
        let rows: Vec<Vec<i64>> = ids.iter().map(|&i| vec![i]).collect();
        let refs: Vec<&[i64]> = rows.iter().map(|r| r.as_slice()).collect();
        let visits = int_table("visits", &["pid"], &refs);
        let r = remapper(4);
        let update = IdUpdate::Offset(shift);
        let moved = r.propagate(&visits, "pid", &update).unwrap();
        let restored = r.propagate(&moved, "pid", &update.inverse()).unwrap();
        prop_assert_eq!(restored, visits);
    }
}

// Property: remapping a consistent population keeps it consistent
proptest! {
    #![proptest_config(ProptestConfig { cases: 16, ..ProptestConfig::default() })]

    #[test]
    fn prop_remapped_population_validates(
        seed in any::<u64>(),
        person_order in Just((0..40usize).collect::<Vec<_>>()).prop_shuffle(),
        location_order in Just((0..24usize).collect::<Vec<_>>()).prop_shuffle(),
    ) {
        let population = common::synthetic_population(40, 24, seed);
        let remapped = remapper(5)
            .with_original_ids(true)
            .remap_population(&population, Some(&person_order), Some(&location_order))
            .unwrap();
        let out = &remapped.population;
        prop_assert_eq!(out.visits.len(), population.visits.len());

        let validator = Validator::new(ValidatorConfig::default(), JoinSettings::default());
        let report = validator.validate(out, &PopulationOffsets::default(), None).unwrap();
        prop_assert!(report.is_clean(), "findings: {:?}", report.findings);
        prop_assert_eq!(report.warnings().count(), 0);
        prop_assert_eq!(report.integrity_violations(), 0);

        // each person keeps their own home, under its new id
        let old_pid = out.people.int_column("old_pid").unwrap();
        let new_hid = out.people.int_column("hid").unwrap();
        let old_hid = population.people.int_column("hid").unwrap();
        let old_lid = out.locations.int_column("old_lid").unwrap();
        for (p, &original) in old_pid.iter().enumerate() {
            prop_assert_eq!(old_lid[new_hid[p] as usize], old_hid[original as usize]);
        }
    }
}
