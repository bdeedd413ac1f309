#![no_main]
use libfuzzer_sys::fuzz_target;

use libident::disasm::IcedDecoder;
use libident::Fingerprinter;

fuzz_target!(|data: &[u8]| {
    for bitness in [16, 32, 64] {
        if let Ok(decoder) = IcedDecoder::new(bitness) {
            let fpr = Fingerprinter::new(decoder);
            if let Ok(fp) = fpr.fingerprint(data, 0x1000, 0x100, true) {
                assert_eq!(fp.hex_len(), fp.len() * 2);
            }
        }
    }
});
