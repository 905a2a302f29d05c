#![no_main]

use libfuzzer_sys::fuzz_target;

use ancestry_pipeline::{AncestryTable, GenotypeFormat, codec};

fuzz_target!(|data: &[u8]| {
    for format in [GenotypeFormat::Comma, GenotypeFormat::Tab] {
        if let Ok(model) = codec::parse(data, format) {
            for (_, genotypes) in model.iter() {
                assert!(genotypes.len() <= model.n_loci());
            }
        }
    }

    if let Ok(table) = AncestryTable::parse(data) {
        assert_eq!(table.to_barplot().len(), table.n_ancestries());
    }
});
