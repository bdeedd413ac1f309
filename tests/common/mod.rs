//! Shared fixtures for the integration tests.
//!
//! Modules are hand-assembled x86-64 so every fingerprint below can be
//! checked by reading the bytes.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use libident::{FunctionRange, InMemoryModule, ScanConfig};

pub const BASE: u64 = 0x140000000;

/// push rbp; sub rsp, 0x20; call main; add rsp, 0x20; pop rbp; ret
/// Fingerprint `5583e8835dc3`; the call sits 5 bytes in and targets 0x80.
pub const STARTUP_RVA: u64 = 0x10;
pub const STARTUP: [u8; 16] = [
    0x55, 0x48, 0x83, 0xEC, 0x20, 0xE8, 0x66, 0x00, 0x00, 0x00, 0x48, 0x83, 0xC4, 0x20, 0x5D, 0xC3,
];

/// xor eax, eax; ret
pub const MAIN_RVA: u64 = 0x80;
pub const MAIN: [u8; 3] = [0x31, 0xC0, 0xC3];

/// push rbp; mov rbp, rsp; xor eax, eax; pop rbp; ret (`5589315dc3`)
pub const LIBFN_RVA: u64 = 0x100;
pub const LIBFN: [u8; 8] = [0x55, 0x48, 0x89, 0xE5, 0x31, 0xC0, 0x5D, 0xC3];

/// LIBFN with an extra `xor ecx, ecx` (`558931315dc3`)
pub const VARIANT_RVA: u64 = 0x200;
pub const VARIANT: [u8; 10] = [
    0x55, 0x48, 0x89, 0xE5, 0x31, 0xC0, 0x31, 0xC9, 0x5D, 0xC3,
];

pub const SIGNATURES: &str = "5589315dc3+1 strlen\n5583e8835dc3_5!5 main\n";

fn range(rva: u64, len: usize) -> FunctionRange {
    FunctionRange::new(rva, rva + len as u64 - 1)
}

/// Module with the startup routine as its entry point, main, a library
/// function and a variant of it. `with_startup` controls whether the host
/// reports the startup routine as a function.
pub fn sample_module(with_startup: bool) -> InMemoryModule {
    let mut memory = vec![0xCCu8; 0x300];
    let place = |mem: &mut Vec<u8>, rva: u64, code: &[u8]| {
        let start = rva as usize;
        mem[start..start + code.len()].copy_from_slice(code);
    };
    place(&mut memory, STARTUP_RVA, &STARTUP);
    place(&mut memory, MAIN_RVA, &MAIN);
    place(&mut memory, LIBFN_RVA, &LIBFN);
    place(&mut memory, VARIANT_RVA, &VARIANT);

    let mut functions = Vec::new();
    if with_startup {
        functions.push(range(STARTUP_RVA, STARTUP.len()));
    }
    functions.push(range(MAIN_RVA, MAIN.len()));
    functions.push(range(LIBFN_RVA, LIBFN.len()));
    functions.push(range(VARIANT_RVA, VARIANT.len()));

    InMemoryModule {
        base: BASE,
        memory,
        functions,
        entry_point: BASE + STARTUP_RVA,
    }
}

/// Default configuration with the size floor lowered for tiny fixtures.
pub fn small_function_config() -> ScanConfig {
    ScanConfig {
        min_function_size: 1,
        ..ScanConfig::default()
    }
}

pub fn write_file(path: &Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

/// Poll `check` until it returns true or five seconds pass.
pub fn wait_for<F: FnMut() -> bool>(mut check: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}

/// Minimal ELF64 executable: one PT_LOAD covering the whole file at
/// 0x400000, `code` at file offset 0x78, entry at `0x400078 + entry`.
pub fn tiny_elf(code: &[u8], entry: u64) -> Vec<u8> {
    let total = 0x78 + code.len() as u64;
    let mut f = Vec::new();
    f.extend_from_slice(&[0x7F, b'E', b'L', b'F', 2, 1, 1, 0]);
    f.extend_from_slice(&[0; 8]);
    f.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    f.extend_from_slice(&0x3Eu16.to_le_bytes()); // x86-64
    f.extend_from_slice(&1u32.to_le_bytes());
    f.extend_from_slice(&(0x400078u64 + entry).to_le_bytes());
    f.extend_from_slice(&64u64.to_le_bytes()); // e_phoff
    f.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
    f.extend_from_slice(&0u32.to_le_bytes());
    f.extend_from_slice(&64u16.to_le_bytes());
    f.extend_from_slice(&56u16.to_le_bytes());
    f.extend_from_slice(&1u16.to_le_bytes());
    f.extend_from_slice(&64u16.to_le_bytes());
    f.extend_from_slice(&0u16.to_le_bytes());
    f.extend_from_slice(&0u16.to_le_bytes());
    f.extend_from_slice(&1u32.to_le_bytes()); // PT_LOAD
    f.extend_from_slice(&5u32.to_le_bytes()); // R+X
    f.extend_from_slice(&0u64.to_le_bytes());
    f.extend_from_slice(&0x400000u64.to_le_bytes());
    f.extend_from_slice(&0x400000u64.to_le_bytes());
    f.extend_from_slice(&total.to_le_bytes());
    f.extend_from_slice(&total.to_le_bytes());
    f.extend_from_slice(&0x1000u64.to_le_bytes());
    assert_eq!(f.len(), 0x78);
    f.extend_from_slice(code);
    f
}
