//! `str-fill-az` — a random fixed-length string drawn from `[a-zA-Z]`,
//! using the "6 bits per character" bitmask trick: 52 letters fit in 6
//! bits (0..64), so each random `u64` yields up to 10 candidate
//! characters per draw, with out-of-range 6-bit groups (52..64) simply
//! skipped rather than remapped (which would bias the distribution).
//!
//! `gen_range` per character would cost a division per character instead
//! of amortizing one `u64` draw across up to ten.

use rand::{thread_rng, RngCore};

use super::{param_parse, Generator, Params};
use crate::error::FinchError;
use crate::scope::RunCount;
use crate::value::{Format, Value};

const ALPHABET: &[u8; 52] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const BITS: u32 = 6;
const MASK: u64 = (1 << BITS) - 1;
const CHUNKS_PER_DRAW: u32 = u64::BITS / BITS;

const DEFAULT_LENGTH: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct StrFillAzGenerator {
    length: usize,
}

impl StrFillAzGenerator {
    pub fn from_params(params: &Params) -> Result<Self, FinchError> {
        let length = param_parse(params, "length", DEFAULT_LENGTH)?;
        Ok(Self { length })
    }

    fn sample(&self) -> String {
        let mut out = Vec::with_capacity(self.length);
        let mut rng = thread_rng();
        while out.len() < self.length {
            let mut bits = rng.next_u64();
            for _ in 0..CHUNKS_PER_DRAW {
                if out.len() == self.length {
                    break;
                }
                let idx = (bits & MASK) as usize;
                if idx < ALPHABET.len() {
                    out.push(ALPHABET[idx]);
                }
                bits >>= BITS;
            }
        }
        // Safety: every pushed byte comes from `ALPHABET`, which is ASCII.
        String::from_utf8(out).expect("alphabet is ASCII")
    }
}

impl Generator for StrFillAzGenerator {
    fn name(&self) -> &'static str {
        "str-fill-az"
    }

    fn format(&self) -> Format {
        Format::new("'%s'")
    }

    fn values(&self, _rc: &RunCount) -> Vec<Value> {
        vec![Value::Str(self.sample())]
    }

    fn copy(&self) -> Box<dyn Generator> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_length_and_alphabet() {
        let g = StrFillAzGenerator::from_params(&Params::new()).unwrap();
        let Value::Str(s) = &g.values(&RunCount::new())[0] else { panic!() };
        assert_eq!(s.len(), DEFAULT_LENGTH);
        assert!(s.bytes().all(|b| b.is_ascii_alphabetic()));
    }

    #[test]
    fn configurable_length() {
        let mut params = Params::new();
        params.insert("length".into(), "7".into());
        let g = StrFillAzGenerator::from_params(&params).unwrap();
        let Value::Str(s) = &g.values(&RunCount::new())[0] else { panic!() };
        assert_eq!(s.len(), 7);
    }
}
