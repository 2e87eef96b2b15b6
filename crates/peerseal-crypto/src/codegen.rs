//! Random short-code generation.

use rand::Rng;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;

use crate::error::CryptoError;

const DIGITS: &[u8] = b"0123456789";
const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const SYMBOLS: &[u8] = b"!#$%&*+-=?@^_~";

/// How many characters of each class a generated code contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodeRecipe {
    pub digit_count: usize,
    pub letter_count: usize,
    pub symbol_count: usize,
}

impl CodeRecipe {
    /// Digits only.
    pub const fn digits(count: usize) -> Self {
        Self {
            digit_count: count,
            letter_count: 0,
            symbol_count: 0,
        }
    }

    pub const fn len(&self) -> usize {
        self.digit_count + self.letter_count + self.symbol_count
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Source of random codes.
pub trait CodeGenerator: Send + Sync {
    fn generate(&self, recipe: &CodeRecipe) -> Result<String, CryptoError>;
}

/// Draws every character independently from the OS RNG, then shuffles so
/// character classes are not positional.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self, recipe: &CodeRecipe) -> Result<String, CryptoError> {
        if recipe.is_empty() {
            return Err(CryptoError::CodeGeneration(
                "recipe requests zero characters".into(),
            ));
        }

        let mut rng = OsRng;
        let mut chars = Vec::with_capacity(recipe.len());
        for (alphabet, count) in [
            (DIGITS, recipe.digit_count),
            (LETTERS, recipe.letter_count),
            (SYMBOLS, recipe.symbol_count),
        ] {
            chars.extend((0..count).map(|_| alphabet[rng.gen_range(0..alphabet.len())]));
        }
        chars.shuffle(&mut rng);

        String::from_utf8(chars).map_err(|e| CryptoError::CodeGeneration(e.to_string()))
    }
}
