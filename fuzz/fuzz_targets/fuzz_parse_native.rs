#![no_main]

use libfuzzer_sys::fuzz_target;

use ancestry_pipeline::{GenotypeFormat, codec};

fuzz_target!(|data: &[u8]| {
    let Ok(model) = codec::parse(data, GenotypeFormat::Native) else {
        return;
    };

    // Whatever parsed must survive a write and re-read unchanged.
    let mut out = Vec::new();
    codec::write(&model, &mut out).unwrap();
    let reparsed = codec::parse(out.as_slice(), GenotypeFormat::Native).unwrap();
    assert_eq!(reparsed.samples(), model.samples());
});
