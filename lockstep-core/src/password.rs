//! Random password generation for `set pass` with an empty value.
//!
//! Policy (lengths, classes, pronounceable schemes) is the caller's
//! business; this is just a secure default.

use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!@#$%^&*()_+-=[]{}|;:,.<>?";

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("invalid generator config: {0}")]
    InvalidConfig(&'static str),
}

/// Which character classes to draw from, and how many characters.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorConfig {
    pub length: usize,
    pub lowercase: bool,
    pub uppercase: bool,
    pub digits: bool,
    pub symbols: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            length: 24,
            lowercase: true,
            uppercase: true,
            digits: true,
            symbols: true,
        }
    }
}

impl GeneratorConfig {
    fn classes(&self) -> Vec<&'static [u8]> {
        let mut classes = Vec::new();
        if self.lowercase {
            classes.push(LOWERCASE);
        }
        if self.uppercase {
            classes.push(UPPERCASE);
        }
        if self.digits {
            classes.push(DIGITS);
        }
        if self.symbols {
            classes.push(SYMBOLS);
        }
        classes
    }
}

/// Generate a password with at least one character from every enabled
/// class.
pub fn generate_password(config: &GeneratorConfig) -> Result<String, GeneratorError> {
    let classes = config.classes();
    if classes.is_empty() {
        return Err(GeneratorError::InvalidConfig(
            "at least one character class must be enabled",
        ));
    }
    if config.length < classes.len().max(8) {
        return Err(GeneratorError::InvalidConfig("password length too short"));
    }

    let pool: Vec<u8> = classes.iter().flat_map(|c| c.iter().copied()).collect();
    let mut rng = rand::thread_rng();

    let mut chars: Vec<u8> = Vec::with_capacity(config.length);
    for class in &classes {
        chars.push(class[rng.gen_range(0..class.len())]);
    }
    while chars.len() < config.length {
        chars.push(pool[rng.gen_range(0..pool.len())]);
    }
    chars.shuffle(&mut rng);

    Ok(String::from_utf8_lossy(&chars).into_owned())
}
