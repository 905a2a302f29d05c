use std::{collections::BTreeSet, io::Cursor, ops::Range};

use ancestry_pipeline::{
    AllelePair, AncestryTable, GenotypeFormat, GenotypeModel, codec, qtable::QTableError,
};
use proptest::prelude::*;

fn locus_names() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::btree_set("[A-Z][A-Z0-9]{0,5}", 1..8)
        .prop_map(|set| set.into_iter().collect())
}

fn allele() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["1", "2", "3", "4", "-9"]).prop_map(String::from)
}

proptest! {
    #[test]
    fn parsers_never_panic(data in proptest::collection::vec(any::<u8>(), 0..1024)) {
        for format in [GenotypeFormat::Comma, GenotypeFormat::Tab, GenotypeFormat::Native] {
            let _ = codec::parse(Cursor::new(data.clone()), format);
        }
        let _ = AncestryTable::parse(Cursor::new(data.clone()));
        let _ = AncestryTable::open(Cursor::new(data));
    }

    #[test]
    fn native_write_then_parse_preserves_genotypes(
        loci in locus_names(),
        samples in proptest::collection::btree_set("[a-z][a-z0-9_]{0,6}", 1..6),
        seed in proptest::collection::vec((allele(), allele()), 48),
    ) {
        let mut model = GenotypeModel::new();
        let mut cells = seed.iter().cycle();
        for sample in &samples {
            let genotypes: Vec<AllelePair> = loci
                .iter()
                .map(|_| {
                    let (a, b) = cells.next().unwrap();
                    AllelePair::new(a.clone(), b.clone())
                })
                .collect();
            model.add(sample, &loci, genotypes).unwrap();
        }

        let mut out = Vec::new();
        codec::write(&model, &mut out).unwrap();
        let parsed = codec::parse(Cursor::new(out), GenotypeFormat::Native).unwrap();

        prop_assert_eq!(parsed.samples(), model.samples());
        prop_assert_eq!(parsed.loci().collect::<Vec<_>>(), model.loci().collect::<Vec<_>>());
        for sample in model.samples() {
            for locus in model.loci() {
                prop_assert_eq!(parsed.get(sample, locus), model.get(sample, locus));
            }
        }
    }

    #[test]
    fn combine_unions_loci_and_concatenates_samples(
        left_loci in locus_names(),
        right_loci in locus_names(),
    ) {
        let mut left = GenotypeModel::new();
        let genotypes = vec![AllelePair::new("1", "2"); left_loci.len()];
        left.add("left", &left_loci, genotypes).unwrap();
        let mut right = GenotypeModel::new();
        let genotypes = vec![AllelePair::new("2", "2"); right_loci.len()];
        right.add("right", &right_loci, genotypes).unwrap();

        let combined = GenotypeModel::combine(&left, &right);
        let expected: BTreeSet<&str> = left.loci().chain(right.loci()).collect();
        prop_assert_eq!(combined.loci().collect::<BTreeSet<_>>(), expected);
        prop_assert_eq!(combined.samples(), ["left", "right"]);
        prop_assert_eq!(left.n_samples(), 1);
        prop_assert_eq!(right.n_samples(), 1);
    }

    #[test]
    fn summarise_replaces_covered_rows(
        rows in 1usize..20,
        width in 1usize..5,
        cuts in proptest::collection::vec((0usize..20, 1usize..5), 0..4),
    ) {
        let mut table = AncestryTable::new();
        for i in 0..rows {
            table.add(format!("S{i}"), vec![i as f64; width]).unwrap();
        }

        let ranges: Vec<Range<usize>> = cuts
            .iter()
            .map(|&(start, len)| start..start + len)
            .collect();
        let labels: Vec<String> = (0..ranges.len()).map(|i| format!("G{i}")).collect();
        let valid = ranges.iter().all(|range| range.start < rows);

        let result = table.summarise(&labels, &ranges);
        if !valid {
            prop_assert!(
                matches!(result, Err(QTableError::EmptyRange { .. })),
                "expected EmptyRange error"
            );
            return Ok(());
        }
        result.unwrap();

        let covered: BTreeSet<usize> = ranges
            .iter()
            .flat_map(|range| range.start..range.end.min(rows))
            .collect();
        prop_assert_eq!(table.n_samples(), rows - covered.len() + labels.len());
        prop_assert_eq!(&table.samples()[rows - covered.len()..], labels.as_slice());
        for (name, ancestry) in table.iter().take(rows - covered.len()) {
            let index: usize = name[1..].parse().unwrap();
            prop_assert!(!covered.contains(&index));
            prop_assert!(ancestry.iter().all(|&v| v == index as f64));
        }
    }
}
