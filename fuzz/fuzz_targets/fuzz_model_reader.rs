#![no_main]

use lib3mf_core::parser::read_model;
use lib3mf_core::{ParserConfig, Warnings};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Lenient and strict reads must both return instead of panicking
    for config in [ParserConfig::default(), ParserConfig::default().strict(true)] {
        let mut warnings = Warnings::new();
        if let Ok(model) = read_model(data, &config, &mut warnings) {
            // Anything the reader accepts must be writable and readable again
            let xml = model.to_xml().expect("accepted model must serialize");
            let mut again = Warnings::new();
            read_model(&xml, &config, &mut again).expect("written model must parse");
        }
    }
});
