//! Password generation for the credential store.

use rand::Rng;
use rand::seq::SliceRandom;

use tierform_core::SecretValue;

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
/// Punctuation safe inside connection strings and shell env files.
const PUNCTUATION: &[u8] = b"!#$%&*+-.=?^_~";

const MIN_LENGTH: usize = 8;

/// Generate a random password of `length` characters containing at least
/// one lowercase letter, one uppercase letter and one digit, plus one
/// punctuation character unless `exclude_punctuation` is set.
pub fn generate_password(length: usize, exclude_punctuation: bool) -> SecretValue {
    let length = length.max(MIN_LENGTH);
    let mut classes: Vec<&[u8]> = vec![LOWER, UPPER, DIGITS];
    if !exclude_punctuation {
        classes.push(PUNCTUATION);
    }
    let alphabet: Vec<u8> = classes.iter().flat_map(|c| c.iter().copied()).collect();

    let mut rng = rand::thread_rng();
    let mut bytes: Vec<u8> = classes
        .iter()
        .map(|class| class[rng.gen_range(0..class.len())])
        .collect();
    while bytes.len() < length {
        bytes.push(alphabet[rng.gen_range(0..alphabet.len())]);
    }
    bytes.shuffle(&mut rng);

    SecretValue::new(bytes.into_iter().map(char::from).collect::<String>())
}
