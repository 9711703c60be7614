//! Configuration read once at `MemoryManager` construction (spec §6).
//!
//! Grounded on the teacher's `Options`/`MMTKOption<T>` pattern in
//! `util/options.rs`: environment variables are scanned once, invalid
//! values are warned about and fall back to the default rather than
//! panicking. Hand-written rather than macro-generated, since this
//! substrate has four knobs, not the teacher's several dozen.

use std::env;

const ENV_AGGRESSIVE_GC: &str = "QV4_MM_AGGRESSIVE_GC";
const ENV_STATS: &str = "QV4_MM_STATS";
const ENV_MAXBLOCK_SHIFT: &str = "QV4_MM_MAXBLOCK_SHIFT";
const ENV_MAX_CHUNK_SIZE: &str = "QV4_MM_MAX_CHUNK_SIZE";

const DEFAULT_MAX_SHIFT: u8 = 6;
const MAX_ALLOWED_SHIFT: u8 = 11;
const DEFAULT_MAX_CHUNK_SIZE: usize = 32 * crate::util::BYTES_IN_KBYTE;

#[derive(Debug, Clone)]
pub struct Options {
    pub aggressive_gc: bool,
    pub stats: bool,
    pub max_shift: u8,
    pub max_chunk_size: usize,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            aggressive_gc: false,
            stats: false,
            max_shift: DEFAULT_MAX_SHIFT,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
        }
    }
}

impl Options {
    pub fn from_env() -> Options {
        let mut opts = Options::default();

        opts.aggressive_gc = env_is_set(ENV_AGGRESSIVE_GC);
        opts.stats = env_is_set(ENV_STATS);

        if let Ok(raw) = env::var(ENV_MAXBLOCK_SHIFT) {
            match raw.parse::<u8>() {
                Ok(v) if v > 0 && v <= MAX_ALLOWED_SHIFT => opts.max_shift = v,
                _ => log::warn!(
                    "{ENV_MAXBLOCK_SHIFT}={raw:?} is not an integer in (0, {MAX_ALLOWED_SHIFT}], \
                     keeping default {DEFAULT_MAX_SHIFT}"
                ),
            }
        }

        if let Ok(raw) = env::var(ENV_MAX_CHUNK_SIZE) {
            match raw.parse::<usize>() {
                Ok(v) if v > 0 => opts.max_chunk_size = v,
                _ => log::warn!(
                    "{ENV_MAX_CHUNK_SIZE}={raw:?} is not a positive integer, \
                     keeping default {DEFAULT_MAX_CHUNK_SIZE}"
                ),
            }
        }

        opts
    }
}

fn env_is_set(name: &str) -> bool {
    matches!(env::var(name), Ok(v) if !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let opts = Options::default();
        assert!(!opts.aggressive_gc);
        assert!(!opts.stats);
        assert_eq!(opts.max_shift, 6);
        assert_eq!(opts.max_chunk_size, 32 * 1024);
    }
}
