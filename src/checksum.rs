//! Adler-32 checksum (RFC 1950 section 8.2)

/// Largest prime smaller than 65536
const ADLER32_BASE: u32 = 65521;

/// Largest n such that 255n(n+1)/2 + (n+1)(BASE-1) fits in 32 bits
const NMAX: usize = 5552;

/// Seed for a fresh checksum
pub const ADLER32_SEED: u32 = 1;

/// Continue an Adler-32 checksum from `seed` over `bytes`
pub fn adler32(seed: u32, bytes: &[u8]) -> u32 {
    let mut s1 = seed & 0xffff;
    let mut s2 = (seed >> 16) & 0xffff;

    for block in bytes.chunks(NMAX) {
        for &b in block {
            s1 += u32::from(b);
            s2 += s1;
        }
        s1 %= ADLER32_BASE;
        s2 %= ADLER32_BASE;
    }

    (s2 << 16) | s1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_seed() {
        assert_eq!(adler32(ADLER32_SEED, &[]), 1);
    }

    #[test]
    fn test_known_vectors() {
        // Reference values from zlib
        assert_eq!(adler32(1, b"a"), 0x0062_0062);
        assert_eq!(adler32(1, b"abc"), 0x024d_0127);
        assert_eq!(adler32(1, b"Wikipedia"), 0x11E6_0398);
    }

    #[test]
    fn test_large_run_of_ff_stays_reduced() {
        // Long runs of 0xFF are the worst case for accumulator overflow
        let data = vec![0xFFu8; 3 * NMAX + 11];
        let sum = adler32(ADLER32_SEED, &data);

        assert!((sum & 0xffff) < ADLER32_BASE);
        assert!((sum >> 16) < ADLER32_BASE);
    }
}
