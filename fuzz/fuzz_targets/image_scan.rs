#![no_main]
use libfuzzer_sys::fuzz_target;

use libident::{ImageModule, LabelMap, ScanConfig, Scanner, SignatureStore};

fuzz_target!(|data: &[u8]| {
    let Ok(module) = ImageModule::parse_with_limit(data, 1 << 20) else {
        return;
    };
    let Ok(store) = SignatureStore::from_source_str("5589315dc3+1 strlen\n5583e8835dc3_5!5 main\n")
    else {
        return;
    };
    let config = ScanConfig {
        bitness: module.bitness(),
        min_function_size: 1,
        ..ScanConfig::default()
    };
    if let Ok(scanner) = Scanner::new(&store, config) {
        let _ = scanner.scan_similarity(&module, &mut LabelMap::new());
    }
});
