#![no_main]

use lib3mf_core::parser::read_keystore;
use lib3mf_core::writer::write_keystore;
use lib3mf_core::{KeyStore, ParserConfig, Warnings};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut keystore = KeyStore::new();
    let mut warnings = Warnings::new();
    if read_keystore(data, &mut keystore, &ParserConfig::default(), &mut warnings).is_ok() {
        let mut xml = Vec::new();
        write_keystore(&keystore, &mut xml).expect("accepted keystore must serialize");

        let mut copy = KeyStore::new();
        read_keystore(&xml, &mut copy, &ParserConfig::default(), &mut warnings)
            .expect("written keystore must parse");
        assert_eq!(copy.resource_data_entries(), keystore.resource_data_entries());
    }
});
